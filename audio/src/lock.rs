//! Spinlock guarding the device's session and ASRC state.
//!
//! ## Ordering
//!
//! The device holds three locks and the log one. A path that needs more than
//! one takes them by ascending [`LockId`]:
//!
//! | Id         | Held by                                      |
//! |------------|----------------------------------------------|
//! | `AudioIn`  | capture open/close/control                   |
//! | `AudioOut` | playback open/close/control, PA switching    |
//! | `Asrc`     | ASRC channel reservation and RAM banking      |
//! | `Klog`     | ring buffer pushes, always innermost         |
//!
//! PLL refcounts never sit behind one of these; they change inside
//! `critical_section::with` so an ISR can drop a reference too.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Place of a lock in the acquisition order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LockId {
    AudioIn = 1,
    AudioOut = 2,
    Asrc = 3,
    Klog = 4,
    /// Stand-alone lock, never nested
    Unordered = 255,
}

/// A debug build gives up on a lock after this many failed polls.
#[cfg(debug_assertions)]
const SPIN_LIMIT: u32 = 1 << 24;

/// Busy-wait mutual exclusion around `T`.
///
/// ```
/// use andes_audio::lock::Spinlock;
///
/// static OPEN_STREAMS: Spinlock<u8> = Spinlock::new(0);
///
/// fn stream_opened() -> u8 {
///     let mut count = OPEN_STREAMS.lock();
///     *count += 1;
///     *count
/// }
/// ```
pub struct Spinlock<T> {
    held: AtomicBool,
    id: LockId,
    value: UnsafeCell<T>,
}

// Safety: `held` serializes every access to `value`
unsafe impl<T: Send> Sync for Spinlock<T> {}
unsafe impl<T: Send> Send for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub const fn new(value: T) -> Self {
        Self::new_with_id(value, LockId::Unordered)
    }

    pub const fn new_with_id(value: T, id: LockId) -> Self {
        Self {
            held: AtomicBool::new(false),
            id,
            value: UnsafeCell::new(value),
        }
    }

    #[inline]
    fn acquire(&self) -> bool {
        self.held
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Spin until the lock is ours.
    #[inline]
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        #[cfg(debug_assertions)]
        let mut polls = 0u32;

        while !self.acquire() {
            // read-only wait keeps the cache line shared until release
            while self.held.load(Ordering::Relaxed) {
                core::hint::spin_loop();

                #[cfg(debug_assertions)]
                {
                    polls += 1;
                    if polls >= SPIN_LIMIT {
                        panic!("{:?} lock never released", self.id);
                    }
                }
            }
        }
        SpinlockGuard::new(self)
    }

    /// Take the lock only if it is free right now.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        if self.held.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SpinlockGuard::new(self))
        }
    }

    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    pub fn id(&self) -> LockId {
        self.id
    }
}

/// Access to the protected value; dropping it releases the lock.
pub struct SpinlockGuard<'a, T> {
    owner: &'a Spinlock<T>,
    // released on the context that acquired it
    _local: PhantomData<*const ()>,
}

impl<'a, T> SpinlockGuard<'a, T> {
    fn new(owner: &'a Spinlock<T>) -> Self {
        Self {
            owner,
            _local: PhantomData,
        }
    }
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard proves `held` is set by us
        unsafe { &*self.owner.value.get() }
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as above, and `&mut self` rules out a second borrow
        unsafe { &mut *self.owner.value.get() }
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = Spinlock::new(48u32);
        *lock.lock() = 44;
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 44);
    }

    #[test]
    fn test_try_lock_while_held() {
        let lock = Spinlock::new(());
        let guard = lock.try_lock();
        assert!(guard.is_some());
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_order_ids() {
        let lock = Spinlock::new_with_id(vec![0x10u8], LockId::AudioOut);
        assert_eq!(lock.id(), LockId::AudioOut);
        lock.lock().push(0x20);
        assert_eq!(*lock.lock(), vec![0x10, 0x20]);
        assert!(LockId::AudioIn < LockId::AudioOut);
        assert!(LockId::Asrc < LockId::Klog);
    }
}
