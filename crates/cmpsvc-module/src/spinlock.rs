//! Test-and-set spinlock usable across processes
//!
//! The lock word is a single `AtomicBool` inside a `#[repr(C)]` struct, so
//! a `SpinLock<T>` can be placed in a shared mapping and contended by
//! several processes. Waiters spin with a pause hint, then sleep with a
//! randomized, growing delay. A waiter that has slept more than
//! `SpinPolicy::max_delays` times gives up with `LockStuck`, which the
//! caller treats as fatal.
//!
//! Critical sections must stay short: flip a bit, bump a counter. Never
//! hold a guard across a blocking send or receive.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use cmpsvc_core::error::{CmpError, Result};
use rand::Rng;

const MIN_SPINS_PER_DELAY: u32 = 10;
const MAX_SPINS_PER_DELAY: u32 = 1000;
const DEFAULT_SPINS_PER_DELAY: u32 = 100;

/// Spins between sleeps, tuned per process.
///
/// Raised when a contended acquire succeeded without sleeping (spinning
/// pays off, e.g. on multi-core), lowered when it had to sleep.
static SPINS_PER_DELAY: AtomicU32 = AtomicU32::new(DEFAULT_SPINS_PER_DELAY);

/// Backoff parameters for a contended acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinPolicy {
    /// Sleeps tolerated before the lock is declared stuck
    pub max_delays: u32,
    /// First sleep
    pub min_delay: Duration,
    /// Sleeps beyond this wrap back to `min_delay`
    pub max_delay: Duration,
}

impl Default for SpinPolicy {
    fn default() -> Self {
        Self {
            max_delays: 1000,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl SpinPolicy {
    pub fn with_max_delays(max_delays: u32) -> Self {
        Self { max_delays, ..Self::default() }
    }
}

/// Wait state of one contended acquire
struct SpinDelay<'p> {
    policy: &'p SpinPolicy,
    site: &'static str,
    spins: u32,
    delays: u32,
    cur_delay_us: u64,
}

impl<'p> SpinDelay<'p> {
    fn new(policy: &'p SpinPolicy, site: &'static str) -> Self {
        Self { policy, site, spins: 0, delays: 0, cur_delay_us: 0 }
    }

    fn perform(&mut self) -> Result<()> {
        core::hint::spin_loop();

        self.spins += 1;
        if self.spins < SPINS_PER_DELAY.load(Ordering::Relaxed) {
            return Ok(());
        }

        self.delays += 1;
        if self.delays > self.policy.max_delays {
            return Err(CmpError::LockStuck { site: self.site, delays: self.delays - 1 });
        }

        let min_us = self.policy.min_delay.as_micros() as u64;
        let max_us = self.policy.max_delay.as_micros() as u64;
        if self.cur_delay_us == 0 {
            self.cur_delay_us = min_us;
        }

        std::thread::sleep(Duration::from_micros(self.cur_delay_us));

        // Grow by a random fraction between 1x and 2x
        let frac: f64 = rand::thread_rng().gen();
        self.cur_delay_us += (self.cur_delay_us as f64 * frac + 0.5) as u64;
        if self.cur_delay_us > max_us {
            self.cur_delay_us = min_us;
        }

        self.spins = 0;
        Ok(())
    }

    fn finish(&self) {
        let current = SPINS_PER_DELAY.load(Ordering::Relaxed);
        let next = if self.cur_delay_us == 0 {
            (current + 100).min(MAX_SPINS_PER_DELAY)
        } else {
            current.saturating_sub(1).max(MIN_SPINS_PER_DELAY)
        };
        SPINS_PER_DELAY.store(next, Ordering::Relaxed);
    }
}

/// Current adaptive spin count (for diagnostics)
pub fn spins_per_delay() -> u32 {
    SPINS_PER_DELAY.load(Ordering::Relaxed)
}

/// A spinlock protecting `T`
///
/// `#[repr(C)]` so the layout is identical in every process mapping it.
#[repr(C)]
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// Safety: access to T is serialized by the lock word
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create an unlocked spinlock containing the given value
    #[inline]
    pub const fn new(value: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Initialize a spinlock in place (e.g. in freshly mapped memory)
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes and suitably aligned, and no other
    /// thread or process may touch it until this returns.
    pub unsafe fn init_at(ptr: *mut Self, value: T) {
        core::ptr::write(ptr, Self::new(value));
    }

    #[inline]
    fn tas(&self) -> bool {
        self.locked.swap(true, Ordering::Acquire)
    }

    /// Test, then test-and-set: avoid the bus-locking swap while held
    #[inline]
    fn tas_spin(&self) -> bool {
        self.locked.load(Ordering::Relaxed) || self.tas()
    }

    /// Acquire the lock, backing off per `policy`
    ///
    /// Fails with `LockStuck` (naming `site`) once the waiter has slept
    /// more than `policy.max_delays` times.
    pub fn lock(&self, policy: &SpinPolicy, site: &'static str) -> Result<SpinLockGuard<'_, T>> {
        if !self.tas() {
            return Ok(SpinLockGuard { lock: self });
        }

        let mut delay = SpinDelay::new(policy, site);
        while self.tas_spin() {
            delay.perform()?;
        }
        delay.finish();

        Ok(SpinLockGuard { lock: self })
    }

    /// Single attempt, no backoff
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.tas() {
            None
        } else {
            Some(SpinLockGuard { lock: self })
        }
    }

    /// Lock word as seen right now (racy, diagnostics only)
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// Exclusive access to the protected value; unlocks on drop
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: We hold the lock
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: We hold the lock
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Log a stuck lock and abort the process
///
/// A stuck lock means another process died holding it or a guard leaked;
/// shared state can no longer be trusted.
pub fn fatal_lock_stuck(err: &CmpError) -> ! {
    tracing::error!(error = %err, "stuck spinlock, aborting");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_and_mutate() {
        let lock = SpinLock::new(0u32);
        let policy = SpinPolicy::default();
        {
            let mut guard = lock.lock(&policy, "test").unwrap();
            *guard = 42;
        }
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(&policy, "test").unwrap(), 42);
    }

    #[test]
    fn test_try_lock_while_held() {
        let lock = SpinLock::new(0u8);
        let held = lock.try_lock();
        assert!(held.is_some() && lock.is_locked());
        assert!(lock.try_lock().is_none());
        drop(held);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_contended_increments() {
        let lock = Arc::new(SpinLock::new(0u32));
        let mut handles = vec![];

        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                let policy = SpinPolicy::default();
                for _ in 0..1000 {
                    let mut guard = lock.lock(&policy, "test").unwrap();
                    *guard += 1;
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*lock.try_lock().unwrap(), 4000);
        let spins = spins_per_delay();
        assert!((MIN_SPINS_PER_DELAY..=MAX_SPINS_PER_DELAY).contains(&spins));
    }

    #[test]
    fn test_stuck_lock_detected() {
        let lock = SpinLock::new(());
        let _held = lock.try_lock().unwrap();

        let policy = SpinPolicy {
            max_delays: 2,
            min_delay: Duration::from_micros(10),
            max_delay: Duration::from_micros(100),
        };
        let res = lock.lock(&policy, "slot table");
        match res {
            Err(CmpError::LockStuck { site, delays }) => {
                assert_eq!(site, "slot table");
                assert_eq!(delays, 2);
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("acquired a held lock"),
        }
    }

    #[test]
    fn test_init_at() {
        let mut slot = core::mem::MaybeUninit::<SpinLock<u64>>::uninit();
        unsafe { SpinLock::init_at(slot.as_mut_ptr(), 7) };
        let lock = unsafe { slot.assume_init() };
        assert!(!lock.is_locked());
        assert_eq!(*lock.try_lock().unwrap(), 7);
    }
}
