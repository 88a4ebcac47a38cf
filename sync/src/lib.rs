//! Locking primitives for the per-virtual-device page caches.
//!
//! The teacher's `SpinNoIrqLock` exists because a `no_std` kernel cannot
//! block a hart on a real mutex. This workspace runs on OS threads, so a
//! blocking `std::sync::Mutex` is the right primitive, but the teacher's
//! reason for padding its lock type still applies: one physical cache line
//! per virtual device keeps adjacent devices' locks from false-sharing
//! under concurrent `streamStart`/`find` fan-out.

use std::sync::{Mutex, MutexGuard, Once};
use std::time::Duration;

use crossbeam_utils::CachePadded;

static CACHE_LINE_CHECK: Once = Once::new();

/// A `Mutex<T>` padded out to its own cache line.
///
/// One of these guards each virtual device's page cache. Pad rather than
/// rely on allocator luck: a `Vec<PaddedMutex<_>>` packs every lock
/// contiguously, and without padding two adjacent locks can share a line.
pub struct PaddedMutex<T> {
    inner: CachePadded<Mutex<T>>,
}

impl<T> PaddedMutex<T> {
    pub fn new(value: T) -> Self {
        CACHE_LINE_CHECK.call_once(|| {
            let actual = std::mem::align_of::<CachePadded<Mutex<T>>>();
            if actual < config::mem::ASSUMED_CACHE_LINE_SIZE {
                log::warn!(
                    "CachePadded<Mutex<_>> alignment {actual} is narrower than the assumed cache line size {}; \
                     adjacent virtual device locks on this target may false-share",
                    config::mem::ASSUMED_CACHE_LINE_SIZE,
                );
            }
        });
        Self {
            inner: CachePadded::new(Mutex::new(value)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::error!("recovering mutex poisoned by a panicked holder");
                poisoned.into_inner()
            }
        }
    }
}

/// Spin briefly, then fall back to yielding, while waiting on a condition
/// that an in-flight accelerator transfer will flip (an event's completion
/// flag). Matches the busy-wait-on-event-status loop `updatePage` in the
/// original implementation uses instead of blocking: a transfer usually
/// finishes within a handful of spins, and yielding first avoids burning a
/// full OS scheduling quantum when it does not.
pub fn spin_wait_until(mut condition: impl FnMut() -> bool) {
    const SPIN_ATTEMPTS: u32 = 1000;

    for _ in 0..SPIN_ATTEMPTS {
        if condition() {
            return;
        }
        std::hint::spin_loop();
    }

    while !condition() {
        std::thread::yield_now();
    }
}

/// As [`spin_wait_until`], but gives up after `timeout` and returns `false`
/// instead of spinning forever on a transfer that never completes.
pub fn spin_wait_until_timeout(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn padded_mutex_basic_lock_unlock() {
        let m = PaddedMutex::new(0usize);
        *m.lock() += 1;
        assert_eq!(*m.lock(), 1);
    }

    #[test]
    fn padded_mutex_survives_concurrent_increment() {
        let m = Arc::new(PaddedMutex::new(0usize));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *m.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*m.lock(), 8000);
    }

    #[test]
    fn spin_wait_until_returns_once_flag_flips() {
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag2 = Arc::clone(&flag);
        let h = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            flag2.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        spin_wait_until(|| flag.load(std::sync::atomic::Ordering::SeqCst));
        h.join().unwrap();
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn spin_wait_until_timeout_gives_up() {
        let ok = spin_wait_until_timeout(|| false, Duration::from_millis(10));
        assert!(!ok);
    }
}
