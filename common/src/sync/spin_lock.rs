use std::cell::UnsafeCell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// Busy-wait mutex for critical sections of a few instructions. Waiters never
/// park, so the holder must not suspend or perform I/O while the guard is
/// alive.
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> SpinLock<T> {
    pub fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        SpinLockGuard { lock: self }
    }
}

#[must_use = "if unused the SpinLock will immediately unlock"]
pub struct SpinLockGuard<'g, T> {
    lock: &'g SpinLock<T>,
}

impl<'g, T> Deref for SpinLockGuard<'g, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'g, T> DerefMut for SpinLockGuard<'g, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'g, T> Drop for SpinLockGuard<'g, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use itertools::Itertools;
    use rand::Rng;
    use test_log::test;

    use super::*;

    fn is_send_sync<T: Send + Sync>() {}

    #[test]
    fn ensure_send_sync() {
        is_send_sync::<SpinLock<Vec<u64>>>();
    }

    #[test]
    fn test_spin_lock_mutual_exclusion() {
        let lock = Arc::new(SpinLock::new(0u64));
        let handles = (0..100)
            .map(|_| {
                let lock_clone = lock.clone();
                std::thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    std::thread::sleep(Duration::from_micros(rng.gen_range(0..100)));
                    for _ in 0..1000 {
                        let mut guard = lock_clone.lock();
                        *guard += 1;
                    }
                })
            })
            .collect_vec();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), 100_000);
    }
}
