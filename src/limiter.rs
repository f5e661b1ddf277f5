//! Counting limiter for expensive species builds.
//!
//! A permit is held for the whole lifetime of one worker process. Permits are
//! returned on drop, so an early `?` return or a panic in the guarded build
//! cannot leak capacity.

use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Slots {
    in_use: usize,
    peak: usize,
}

/// Semaphore with a fixed number of slots and high-water-mark tracking.
#[derive(Debug)]
pub struct Semaphore {
    capacity: usize,
    slots: Mutex<Slots>,
    cvar: Condvar,
}

impl Semaphore {
    /// Creates a limiter with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        Semaphore {
            capacity: capacity.max(1),
            slots: Mutex::new(Slots::default()),
            cvar: Condvar::new(),
        }
    }

    /// Blocks until a slot is free and takes it.
    pub fn acquire(&self) -> Permit<'_> {
        let mut slots = self.lock();
        while slots.in_use >= self.capacity {
            slots = self
                .cvar
                .wait(slots)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        slots.in_use += 1;
        slots.peak = slots.peak.max(slots.in_use);
        Permit { sem: self }
    }

    /// Takes a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut slots = self.lock();
        if slots.in_use >= self.capacity {
            return None;
        }
        slots.in_use += 1;
        slots.peak = slots.peak.max(slots.in_use);
        Some(Permit { sem: self })
    }

    fn release(&self) {
        let mut slots = self.lock();
        slots.in_use = slots.in_use.saturating_sub(1);
        self.cvar.notify_one();
    }

    // A panicking holder still releases through Drop, so the count stays valid.
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.lock().in_use
    }

    /// Largest number of slots ever held at once.
    pub fn peak(&self) -> usize {
        self.lock().peak
    }
}

/// A held slot; released on drop.
#[derive(Debug)]
pub struct Permit<'a> {
    sem: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.sem.release();
    }
}

/// Default build capacity: one build per eight threads.
pub fn default_build_slots(threads: usize) -> usize {
    (threads / 8).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_is_clamped() {
        let sem = Semaphore::new(0);
        assert_eq!(sem.capacity(), 1);
        let _p = sem.acquire();
        assert!(sem.try_acquire().is_none());
    }

    #[test]
    fn test_permit_released_on_drop() {
        let sem = Semaphore::new(2);
        {
            let _a = sem.acquire();
            let _b = sem.acquire();
            assert_eq!(sem.in_use(), 2);
            assert!(sem.try_acquire().is_none());
        }
        assert_eq!(sem.in_use(), 0);
        assert_eq!(sem.peak(), 2);
    }

    #[test]
    fn test_permit_released_on_error_path() {
        fn guarded(sem: &Semaphore) -> anyhow::Result<()> {
            let _permit = sem.acquire();
            anyhow::bail!("build failed")
        }

        let sem = Semaphore::new(1);
        assert!(guarded(&sem).is_err());
        assert!(guarded(&sem).is_err());
        assert_eq!(sem.in_use(), 0);
    }

    #[test]
    fn test_permit_released_on_panic() {
        let sem = Semaphore::new(1);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _permit = sem.acquire();
            panic!("worker crashed");
        }));
        assert!(result.is_err());
        assert!(sem.try_acquire().is_some());
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let sem = Semaphore::new(3);
        let active = AtomicUsize::new(0);
        let max_seen = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..24 {
                s.spawn(|| {
                    let _permit = sem.acquire();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert!(max_seen.load(Ordering::SeqCst) <= 3);
        assert!(sem.peak() <= 3);
        assert_eq!(sem.in_use(), 0);
    }

    #[test]
    fn test_default_build_slots() {
        assert_eq!(default_build_slots(1), 1);
        assert_eq!(default_build_slots(16), 2);
        assert_eq!(default_build_slots(64), 8);
    }
}
