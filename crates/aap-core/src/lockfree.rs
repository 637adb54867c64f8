//! Realtime-safe synchronization.
//!
//! The only lock allowed on the audio thread is [`NanoSleepMutex`]: the realtime side calls
//! `try_lock()` and proceeds with empty input when it fails, while non-realtime producers call
//! `lock()`, which spins with 1µs sleeps instead of parking the thread.

use parking_lot::lock_api::{self, GuardSend, RawMutex};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use crate::instance_state::PluginInstantiationState;

const SPIN_SLEEP: Duration = Duration::from_nanos(1000);

/// Atomic flag lock backing [`NanoSleepMutex`].
pub struct RawNanoSleepLock {
    locked: AtomicBool,
}

unsafe impl RawMutex for RawNanoSleepLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        locked: AtomicBool::new(false),
    };

    type GuardMarker = GuardSend;

    fn lock(&self) {
        while !self.try_lock() {
            std::thread::sleep(SPIN_SLEEP);
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// Try-lock with bounded backoff.
pub type NanoSleepMutex<T> = lock_api::Mutex<RawNanoSleepLock, T>;
pub type NanoSleepMutexGuard<'a, T> = lock_api::MutexGuard<'a, RawNanoSleepLock, T>;

/// Cache-line aligned instantiation state, readable from any thread.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicInstantiationState {
    value: AtomicU8,
}

impl AtomicInstantiationState {
    pub fn new(state: PluginInstantiationState) -> Self {
        Self {
            value: AtomicU8::new(state as u8),
        }
    }

    #[inline]
    pub fn get(&self) -> PluginInstantiationState {
        PluginInstantiationState::from_u8(self.value.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, state: PluginInstantiationState) {
        self.value.store(state as u8, Ordering::Release);
    }
}

impl Default for AtomicInstantiationState {
    fn default() -> Self {
        Self::new(PluginInstantiationState::Initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_try_lock_fails_while_held() {
        let mutex = NanoSleepMutex::new(0u32);
        let guard = mutex.lock();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn test_try_lock_returns_immediately() {
        let mutex = Arc::new(NanoSleepMutex::new(()));
        let _held = mutex.lock();
        let start = Instant::now();
        for _ in 0..1000 {
            assert!(mutex.try_lock().is_none());
        }
        // A failed try_lock never sleeps.
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_lock_waits_for_release() {
        let mutex = Arc::new(NanoSleepMutex::new(0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *mutex.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*mutex.lock(), 4000);
    }

    #[test]
    fn test_atomic_state() {
        let state = AtomicInstantiationState::default();
        assert_eq!(state.get(), PluginInstantiationState::Initial);
        state.set(PluginInstantiationState::Active);
        assert_eq!(state.get(), PluginInstantiationState::Active);
    }
}
