//! Termination-signal handling for the patched window.
//!
//! While a [`ForwardGuard`] is alive, SIGINT, SIGTERM and SIGHUP no longer kill
//! the harness. A signal is recorded as pending and, when a test process is
//! running, re-sent to it. The harness survives to restore the snapshot.
//!
//! Guards nest: handlers are installed by the first live guard and the
//! previous dispositions come back when the last one is dropped.

#[cfg(unix)]
mod imp {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::{Mutex, PoisonError};
    use tracing::debug;

    const FORWARDED: [libc::c_int; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP];

    static CHILD: AtomicI32 = AtomicI32::new(0);
    static PENDING: AtomicI32 = AtomicI32::new(0);
    static INSTALLED: Mutex<Installed> = Mutex::new(Installed {
        guards: 0,
        previous: Vec::new(),
    });

    struct Installed {
        guards: usize,
        previous: Vec<(libc::c_int, libc::sighandler_t)>,
    }

    extern "C" fn forward(sig: libc::c_int) {
        PENDING.store(sig, Ordering::SeqCst);
        let pid = CHILD.load(Ordering::SeqCst);
        if pid > 0 {
            // SAFETY: kill(2) is async-signal-safe.
            unsafe {
                libc::kill(pid, sig);
            }
        }
    }

    pub struct ForwardGuard {
        _private: (),
    }

    impl ForwardGuard {
        pub fn install() -> Self {
            let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
            if installed.guards == 0 {
                CHILD.store(0, Ordering::SeqCst);
                PENDING.store(0, Ordering::SeqCst);
                let handler = forward as extern "C" fn(libc::c_int) as libc::sighandler_t;
                installed.previous = FORWARDED
                    .iter()
                    .map(|&sig| {
                        // SAFETY: the handler only touches atomics and calls kill(2).
                        let prev = unsafe { libc::signal(sig, handler) };
                        (sig, prev)
                    })
                    .collect();
                debug!("signal forwarding installed");
            }
            installed.guards += 1;
            Self { _private: () }
        }
    }

    impl Drop for ForwardGuard {
        fn drop(&mut self) {
            let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
            installed.guards = installed.guards.saturating_sub(1);
            if installed.guards > 0 {
                return;
            }
            CHILD.store(0, Ordering::SeqCst);
            PENDING.store(0, Ordering::SeqCst);
            for (sig, prev) in std::mem::take(&mut installed.previous) {
                if prev != libc::SIG_ERR {
                    // SAFETY: reinstates the disposition that was active before install.
                    unsafe {
                        libc::signal(sig, prev);
                    }
                }
            }
            debug!("signal forwarding removed");
        }
    }

    /// Route forwarded signals to `pid` until [`clear_child`] is called. A
    /// signal that arrived before the child existed is sent to it at once.
    pub fn set_child(pid: u32) {
        let pid = i32::try_from(pid).unwrap_or(0);
        CHILD.store(pid, Ordering::SeqCst);
        let sig = PENDING.load(Ordering::SeqCst);
        if pid > 0 && sig != 0 {
            debug!(signal = sig, pid, "signal arrived before spawn; forwarding");
            // SAFETY: kill(2) on a child that has not been reaped yet.
            unsafe {
                libc::kill(pid, sig);
            }
        }
    }

    pub fn clear_child() {
        CHILD.store(0, Ordering::SeqCst);
    }

    /// The last signal received while a guard was alive.
    pub fn pending() -> Option<i32> {
        match PENDING.load(Ordering::SeqCst) {
            0 => None,
            sig => Some(sig),
        }
    }
}

#[cfg(not(unix))]
mod imp {
    /// Console control events reach the whole process group on this platform.
    pub struct ForwardGuard;

    impl ForwardGuard {
        pub fn install() -> Self {
            ForwardGuard
        }
    }

    pub fn set_child(_pid: u32) {}

    pub fn clear_child() {}

    pub fn pending() -> Option<i32> {
        None
    }
}

pub use imp::{ForwardGuard, clear_child, pending, set_child};
