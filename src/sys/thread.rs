//! Native thread identity and directed wakeup.
//!
//! `close` and the shutdown operations must unblock a thread that is mid
//! syscall on the endpoint's descriptor. The wakeup is a directed signal
//! (`SIGURG`, ignored by default process-wide) delivered with `pthread_kill`;
//! the one-time handler is installed without `SA_RESTART` so interrupted
//! syscalls return `EINTR` instead of silently restarting.

use std::mem;
use std::ptr;
use std::sync::Once;

/// Opaque identifier of a native thread. `0` means "no thread".
pub type NativeId = u64;

const WAKEUP_SIGNAL: libc::c_int = libc::SIGURG;

extern "C" fn wakeup_handler(_sig: libc::c_int) {}

fn ensure_wakeup_handler() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| unsafe {
        let handler: extern "C" fn(libc::c_int) = wakeup_handler;
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = 0; // no SA_RESTART: blocked syscalls must see EINTR
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(WAKEUP_SIGNAL, &action, ptr::null_mut());
    });
}

/// The calling thread's native identifier.
#[must_use]
pub fn current() -> NativeId {
    // SAFETY: pthread_self has no failure mode.
    unsafe { libc::pthread_self() as NativeId }
}

/// Delivers the wakeup signal to the given thread.
///
/// Delivery failures are ignored: the target may have left its syscall (or
/// exited) between being recorded and being signalled, in which case there is
/// nothing left to unblock.
pub fn signal(id: NativeId) {
    ensure_wakeup_handler();
    // SAFETY: pthread_kill with a valid signal number; a stale id yields an
    // error return that we deliberately discard.
    unsafe {
        libc::pthread_kill(id as libc::pthread_t, WAKEUP_SIGNAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_nonzero_and_stable() {
        let a = current();
        let b = current();
        assert_ne!(a, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn signal_interrupts_a_blocked_poll() {
        use crate::sys::{poll, Interest};
        use std::sync::mpsc;
        use std::time::{Duration, Instant};

        // an idle connected pair: nothing will ever arrive on sv[0], so only
        // the signal (or the 5s safety deadline) can end the wait
        let mut sv = [0 as libc::c_int; 2];
        let rc =
            unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, sv.as_mut_ptr()) };
        assert_eq!(rc, 0, "socketpair failed");

        let fd = sv[0];
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        let handle = std::thread::spawn(move || {
            tx.send(current()).expect("send id");
            poll::park(fd, Interest::Readable, 5_000_000_000).expect("park");
        });
        let id = rx.recv().expect("thread id");
        std::thread::sleep(Duration::from_millis(50));
        signal(id);
        handle.join().expect("join");
        assert!(
            start.elapsed() < Duration::from_secs(4),
            "park should have been interrupted well before its deadline"
        );
        unsafe {
            libc::close(sv[0]);
            libc::close(sv[1]);
        }
    }
}
