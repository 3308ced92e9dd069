//! The host global lock.
//!
//! Host objects (closures, reference counts) are only touched while this lock
//! is held. It is released while the engine runs foreign code and reacquired
//! before results are converted. Calls coming back from the engine acquire it
//! again, so it is reentrant on the owning thread.

use std::cell::Cell;
use std::time::Duration;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard, const_reentrant_mutex};

static HOST_LOCK: ReentrantMutex<()> = const_reentrant_mutex(());

thread_local! {
    /// Levels of `HOST_LOCK` held through live `HostGuard`s on this thread.
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Holds the host lock until dropped.
///
/// The guard is `!Send`: the lock belongs to the thread that acquired it.
pub struct HostGuard {
    guard: ReentrantMutexGuard<'static, ()>,
}

impl HostGuard {
    fn new(guard: ReentrantMutexGuard<'static, ()>) -> Self {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self { guard }
    }

    /// Releases the lock completely for the duration of `f`, then reacquires
    /// every level the thread held.
    ///
    /// Outer levels taken by enclosing guards on this thread are released
    /// too, so other threads can take the lock while `f` runs no matter how
    /// deeply engine and host calls are nested.
    pub fn suspend<T>(&mut self, f: impl FnOnce() -> T) -> T {
        let held = DEPTH.with(|depth| depth.replace(0));
        let outer = held.saturating_sub(1);
        for _ in 0..outer {
            // SAFETY: each level belongs to a live HostGuard on this thread and
            // is restored below before any of those guards can drop
            unsafe { HOST_LOCK.force_unlock() };
        }
        let _restore = scopeguard::guard((), |_| {
            for _ in 0..outer {
                std::mem::forget(HOST_LOCK.lock());
            }
            DEPTH.with(|depth| depth.set(held));
        });
        ReentrantMutexGuard::unlocked(&mut self.guard, f)
    }
}

impl Drop for HostGuard {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Blocks until the host lock is held by the current thread.
pub fn acquire() -> HostGuard {
    HostGuard::new(HOST_LOCK.lock())
}

/// Tries to take the host lock, giving up after `timeout`.
pub fn try_acquire_for(timeout: Duration) -> Option<HostGuard> {
    HOST_LOCK.try_lock_for(timeout).map(HostGuard::new)
}

/// Whether the current thread holds the host lock.
pub fn is_held() -> bool {
    HOST_LOCK.is_owned_by_current_thread()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    #[serial]
    fn reentrant_on_owning_thread() {
        let _outer = acquire();
        let _inner = acquire();
        assert!(is_held());
    }

    #[test]
    #[serial]
    fn suspend_releases_to_other_threads() {
        let mut guard = acquire();
        let acquired_elsewhere = guard.suspend(|| {
            thread::spawn(|| try_acquire_for(Duration::from_secs(1)).is_some())
                .join()
                .unwrap()
        });
        assert!(acquired_elsewhere);
        assert!(is_held());
    }

    #[test]
    #[serial]
    fn suspend_releases_every_nested_level() {
        let _outer = acquire();
        let middle = acquire();
        let mut inner = acquire();
        let acquired_elsewhere = inner.suspend(|| {
            assert!(!is_held());
            thread::spawn(|| try_acquire_for(Duration::from_secs(1)).is_some())
                .join()
                .unwrap()
        });
        assert!(acquired_elsewhere);
        assert!(is_held());

        // All three levels are back: releasing two still leaves the lock held
        drop(inner);
        drop(middle);
        assert!(is_held());
    }

    #[test]
    #[serial]
    fn nested_suspend_inside_suspend() {
        let mut outer = acquire();
        outer.suspend(|| {
            let _callback = acquire();
            let mut again = acquire();
            let free = again.suspend(|| {
                thread::spawn(|| try_acquire_for(Duration::from_secs(1)).is_some())
                    .join()
                    .unwrap()
            });
            assert!(free);
            assert!(is_held());
        });
        assert!(is_held());
        drop(outer);
        assert!(!is_held());
    }

    #[test]
    #[serial]
    fn suspend_restores_levels_after_panic() {
        let _outer = acquire();
        let mut inner = acquire();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            inner.suspend(|| panic!("inside suspend"))
        }));
        assert!(result.is_err());
        drop(inner);
        assert!(is_held());
    }

    #[test]
    #[serial]
    fn held_lock_blocks_other_threads() {
        let _guard = acquire();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            tx.send(try_acquire_for(Duration::from_millis(50)).is_some())
                .unwrap();
        });
        assert!(!rx.recv().unwrap());
    }

    #[test]
    #[serial]
    fn released_after_drop() {
        drop(acquire());
        assert!(!is_held());
    }
}
