//! Threading policies.
//!
//! Every container in this crate is parameterised by a [`Threading`] policy
//! that supplies the lock, the counter and the condition variable it uses.
//! [`MultiThreaded`] (the default) is backed by `parking_lot` and atomics.
//! [`SingleThreaded`] swaps all three for `Cell`-based stand-ins: containers
//! built on it cost no atomic operations but are `!Sync`, so the compiler keeps
//! them on one thread.
//!
//! Custom policies only need a `lock_api::RawMutex`, an [`AtomicCounter`] and a
//! [`ConditionVariable`] that work together:
//!
//! ```
//! use horizon_lattice_dispatch::threading::{MultiThreaded, Threading};
//! use horizon_lattice_dispatch::CallbackList;
//!
//! struct Instrumented;
//!
//! impl Threading for Instrumented {
//!     type RawMutex = <MultiThreaded as Threading>::RawMutex;
//!     type Counter = <MultiThreaded as Threading>::Counter;
//!     type Condvar = <MultiThreaded as Threading>::Condvar;
//! }
//!
//! let list: CallbackList<fn(&i32), Instrumented> = CallbackList::new();
//! assert!(list.is_empty());
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::lock_api::{self, GuardNoSend, RawMutex};

/// A mutex protecting `D` with the lock chosen by threading policy `T`.
pub type PolicyMutex<T, D> = lock_api::Mutex<<T as Threading>::RawMutex, D>;

/// Supplies the synchronization primitives a container is built from.
pub trait Threading: 'static {
    /// Lock protecting every mutable structure.
    type RawMutex: RawMutex;
    /// Counter used for insertion stamps and in-flight tracking.
    type Counter: AtomicCounter;
    /// Condition variable used by queues to park consumers.
    type Condvar: ConditionVariable<Self::RawMutex>;
}

/// The default policy: `parking_lot` locks and atomic counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiThreaded;

impl Threading for MultiThreaded {
    type RawMutex = parking_lot::RawMutex;
    type Counter = AtomicU64;
    type Condvar = parking_lot::Condvar;
}

/// A policy for containers that never leave their thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleThreaded;

impl Threading for SingleThreaded {
    type RawMutex = LocalRawMutex;
    type Counter = LocalCounter;
    type Condvar = LocalCondvar;
}

/// A 64-bit counter with atomic-style operations.
///
/// `increment` and `decrement` wrap on overflow and return the new value.
pub trait AtomicCounter: Default {
    /// Create a counter holding `value`.
    fn new(value: u64) -> Self;
    /// Read the current value.
    fn load(&self) -> u64;
    /// Replace the current value.
    fn store(&self, value: u64);
    /// Add one and return the new value.
    fn increment(&self) -> u64;
    /// Subtract one and return the new value.
    fn decrement(&self) -> u64;
}

impl AtomicCounter for AtomicU64 {
    fn new(value: u64) -> Self {
        AtomicU64::new(value)
    }

    fn load(&self) -> u64 {
        AtomicU64::load(self, Ordering::Acquire)
    }

    fn store(&self, value: u64) {
        AtomicU64::store(self, value, Ordering::Release);
    }

    fn increment(&self) -> u64 {
        self.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    fn decrement(&self) -> u64 {
        self.fetch_sub(1, Ordering::AcqRel).wrapping_sub(1)
    }
}

/// Condition variable operations used by event queues.
pub trait ConditionVariable<R: RawMutex>: Default {
    /// Block until notified, releasing the guard's lock while parked.
    fn wait<D: ?Sized>(&self, guard: &mut lock_api::MutexGuard<'_, R, D>);

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `true` if the wait ended because the timeout elapsed.
    fn wait_for<D: ?Sized>(
        &self,
        guard: &mut lock_api::MutexGuard<'_, R, D>,
        timeout: Duration,
    ) -> bool;

    /// Wake one parked waiter.
    fn notify_one(&self);

    /// Wake every parked waiter.
    fn notify_all(&self);
}

impl ConditionVariable<parking_lot::RawMutex> for parking_lot::Condvar {
    fn wait<D: ?Sized>(&self, guard: &mut lock_api::MutexGuard<'_, parking_lot::RawMutex, D>) {
        parking_lot::Condvar::wait(self, guard);
    }

    fn wait_for<D: ?Sized>(
        &self,
        guard: &mut lock_api::MutexGuard<'_, parking_lot::RawMutex, D>,
        timeout: Duration,
    ) -> bool {
        parking_lot::Condvar::wait_for(self, guard, timeout).timed_out()
    }

    fn notify_one(&self) {
        parking_lot::Condvar::notify_one(self);
    }

    fn notify_all(&self) {
        parking_lot::Condvar::notify_all(self);
    }
}

/// A lock for single-threaded containers.
///
/// Locking only flips a flag. Re-entrant locking is a bug in the caller and
/// panics instead of deadlocking.
#[derive(Debug)]
pub struct LocalRawMutex {
    locked: Cell<bool>,
}

// SAFETY: the flag is only reachable from one thread because `Cell` makes this
// type `!Sync`, and the guard is `!Send`, so lock and unlock always pair up on
// the owning thread.
unsafe impl RawMutex for LocalRawMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        locked: Cell::new(false),
    };

    type GuardMarker = GuardNoSend;

    fn lock(&self) {
        assert!(
            !self.locked.replace(true),
            "single-threaded container locked re-entrantly"
        );
    }

    fn try_lock(&self) -> bool {
        !self.locked.replace(true)
    }

    unsafe fn unlock(&self) {
        self.locked.set(false);
    }

    fn is_locked(&self) -> bool {
        self.locked.get()
    }
}

/// A non-atomic counter for single-threaded containers.
#[derive(Debug, Default)]
pub struct LocalCounter(Cell<u64>);

impl AtomicCounter for LocalCounter {
    fn new(value: u64) -> Self {
        Self(Cell::new(value))
    }

    fn load(&self) -> u64 {
        self.0.get()
    }

    fn store(&self, value: u64) {
        self.0.set(value);
    }

    fn increment(&self) -> u64 {
        let value = self.0.get().wrapping_add(1);
        self.0.set(value);
        value
    }

    fn decrement(&self) -> u64 {
        let value = self.0.get().wrapping_sub(1);
        self.0.set(value);
        value
    }
}

/// Condition variable for single-threaded queues.
///
/// No other thread can enqueue, so notifications are no-ops and waiting parks
/// the current thread until it is unparked externally or the timeout elapses.
#[derive(Debug, Default)]
pub struct LocalCondvar {
    _not_sync: PhantomData<Cell<()>>,
}

impl ConditionVariable<LocalRawMutex> for LocalCondvar {
    fn wait<D: ?Sized>(&self, guard: &mut lock_api::MutexGuard<'_, LocalRawMutex, D>) {
        lock_api::MutexGuard::unlocked(guard, std::thread::park);
    }

    fn wait_for<D: ?Sized>(
        &self,
        guard: &mut lock_api::MutexGuard<'_, LocalRawMutex, D>,
        timeout: Duration,
    ) -> bool {
        let started = Instant::now();
        lock_api::MutexGuard::unlocked(guard, || std::thread::park_timeout(timeout));
        started.elapsed() >= timeout
    }

    fn notify_one(&self) {}

    fn notify_all(&self) {}
}

/// Increments a counter for as long as the guard lives.
///
/// Used to mark "work in flight" so observers never see a transiently empty
/// state while a batch is being processed.
pub(crate) struct CounterGuard<'a, C: AtomicCounter> {
    counter: &'a C,
}

impl<'a, C: AtomicCounter> CounterGuard<'a, C> {
    pub(crate) fn new(counter: &'a C) -> Self {
        counter.increment();
        Self { counter }
    }
}

impl<C: AtomicCounter> Drop for CounterGuard<'_, C> {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}

static_assertions::assert_impl_all!(PolicyMutex<MultiThreaded, Vec<u8>>: Send, Sync);
static_assertions::assert_impl_all!(AtomicU64: AtomicCounter);
static_assertions::assert_not_impl_any!(PolicyMutex<SingleThreaded, Vec<u8>>: Sync);
static_assertions::assert_not_impl_any!(LocalCounter: Sync);
static_assertions::assert_not_impl_any!(LocalCondvar: Sync);

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_counter<C: AtomicCounter>() {
        let counter = C::new(5);
        assert_eq!(counter.increment(), 6);
        assert_eq!(counter.decrement(), 5);
        counter.store(u64::MAX);
        assert_eq!(counter.increment(), 0);
        assert_eq!(counter.decrement(), u64::MAX);
        assert_eq!(counter.load(), u64::MAX);
    }

    #[test]
    fn test_atomic_counter_wraps() {
        exercise_counter::<AtomicU64>();
    }

    #[test]
    fn test_local_counter_wraps() {
        exercise_counter::<LocalCounter>();
    }

    #[test]
    fn test_local_mutex_locks_and_unlocks() {
        let mutex: PolicyMutex<SingleThreaded, i32> = lock_api::Mutex::new(1);
        {
            let mut guard = mutex.lock();
            *guard += 1;
            assert!(mutex.try_lock().is_none());
        }
        assert_eq!(*mutex.lock(), 2);
    }

    #[test]
    #[should_panic(expected = "locked re-entrantly")]
    fn test_local_mutex_rejects_reentrant_lock() {
        let mutex: PolicyMutex<SingleThreaded, ()> = lock_api::Mutex::new(());
        let _outer = mutex.lock();
        let _inner = mutex.lock();
    }

    #[test]
    fn test_local_condvar_times_out() {
        let mutex: PolicyMutex<SingleThreaded, ()> = lock_api::Mutex::new(());
        let condvar = LocalCondvar::default();
        let mut guard = mutex.lock();
        let mut timed_out = false;
        // park_timeout may wake spuriously
        for _ in 0..100 {
            if condvar.wait_for(&mut guard, Duration::from_millis(1)) {
                timed_out = true;
                break;
            }
        }
        assert!(timed_out);
        assert!(mutex.is_locked());
    }

    #[test]
    fn test_parking_lot_condvar_times_out() {
        let mutex: PolicyMutex<MultiThreaded, ()> = lock_api::Mutex::new(());
        let condvar = parking_lot::Condvar::new();
        let mut guard = mutex.lock();
        assert!(ConditionVariable::wait_for(
            &condvar,
            &mut guard,
            Duration::from_millis(1)
        ));
    }

    #[test]
    fn test_counter_guard_restores_value() {
        let counter = AtomicU64::new(0);
        {
            let _guard = CounterGuard::new(&counter);
            assert_eq!(AtomicCounter::load(&counter), 1);
            let _nested = CounterGuard::new(&counter);
            assert_eq!(AtomicCounter::load(&counter), 2);
        }
        assert_eq!(AtomicCounter::load(&counter), 0);
    }
}
