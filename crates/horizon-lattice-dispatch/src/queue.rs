//! Event queue.
//!
//! An [`EventQueue`] is an [`EventDispatcher`] with deferred delivery:
//! producers [`enqueue`](EventQueue::enqueue) events from any thread, and a
//! consumer later drains them with [`process`](EventQueue::process), which
//! dispatches each one to its listeners in FIFO order. Consumers can block in
//! [`wait`](EventQueue::wait) until something arrives.
//!
//! The queue dereferences to its dispatcher, so listeners and filters are
//! registered exactly as on a dispatcher, and synchronous dispatch stays
//! available.
//!
//! # Buffer Reuse
//!
//! `process` swaps the whole pending buffer out under the lock and dispatches
//! from the detached copy, so producers are never blocked by listeners. The
//! drained buffer is kept as a spare and swapped back in on the next
//! `process`, so a steady-state queue enqueues without allocating.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use horizon_lattice_dispatch::EventQueue;
//!
//! let queue = EventQueue::<&'static str, (&'static str, i32)>::new();
//! let total = Arc::new(AtomicI32::new(0));
//!
//! let sum = Arc::clone(&total);
//! queue.append_listener("add", move |&(_, value): &(&'static str, i32)| {
//!     sum.fetch_add(value, Ordering::SeqCst);
//! });
//!
//! queue.enqueue(("add", 2));
//! queue.enqueue(("add", 3));
//! assert_eq!(total.load(Ordering::SeqCst), 0);
//!
//! assert!(queue.process());
//! assert_eq!(total.load(Ordering::SeqCst), 5);
//! assert!(!queue.process());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::time::{Duration, Instant};

use parking_lot::lock_api;

use crate::dispatcher::{DispatcherConfig, EventDispatcher};
use crate::error::{DispatchError, Result};
use crate::logging::{PerfSpan, span_names, targets};
use crate::policy::{DefaultPolicies, ExcludesKey, FirstArgument, IncludesKey, KeyExtractor, Policies};
use crate::threading::{AtomicCounter, ConditionVariable, CounterGuard, PolicyMutex, Threading};

/// Default number of events the pending buffer holds before growing.
pub const DEFAULT_INITIAL_CAPACITY: usize = 64;

/// An event waiting in an [`EventQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent<K, Args> {
    /// Key the event will be dispatched under.
    pub key: K,
    /// Argument value listeners will receive.
    pub args: Args,
}

/// Configuration for an [`EventQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Name reported in tracing output.
    pub name: String,
    /// Initial capacity of the pending and spare buffers.
    pub initial_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "horizon-queue".to_string(),
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

impl QueueConfig {
    /// Create a new configuration with the given queue name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Builder for creating event queues with custom configuration.
///
/// ```
/// use horizon_lattice_dispatch::{EventQueue, EventQueueBuilder};
///
/// let queue: EventQueue<u8, (u8, bool)> = EventQueueBuilder::new()
///     .name("input")
///     .initial_capacity(256)
///     .can_continue_invoking(|args: &(u8, bool)| !args.1)
///     .build();
/// assert_eq!(queue.queue_config().name, "input");
/// ```
pub struct EventQueueBuilder<Args> {
    config: QueueConfig,
    dispatcher: DispatcherConfig<Args>,
}

impl<Args> EventQueueBuilder<Args> {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }

    /// Set the queue name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the initial buffer capacity.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_capacity = capacity;
        self
    }

    /// Set the predicate consulted after each listener call.
    pub fn can_continue_invoking<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Args) -> bool + Send + Sync + 'static,
    {
        self.dispatcher = self.dispatcher.can_continue_invoking(predicate);
        self
    }

    /// Replace the dispatcher configuration wholesale.
    pub fn dispatcher_config(mut self, config: DispatcherConfig<Args>) -> Self {
        self.dispatcher = config;
        self
    }

    /// Build the queue.
    pub fn build<K, P, E>(self) -> EventQueue<K, Args, P, E>
    where
        P: Policies<K, Args>,
        E: Default,
        Args: 'static,
    {
        self.build_with_extractor(E::default())
    }

    /// Build the queue with a custom key extractor.
    pub fn build_with_extractor<K, P, E>(self, extractor: E) -> EventQueue<K, Args, P, E>
    where
        P: Policies<K, Args>,
        Args: 'static,
    {
        let dispatcher = EventDispatcher::with_extractor(extractor).with_config(self.dispatcher);
        EventQueue::from_parts(dispatcher, self.config)
    }
}

impl<Args> Default for EventQueueBuilder<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args> fmt::Debug for EventQueueBuilder<Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueueBuilder")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

type QueueThreading<K, Args, P> = <P as Policies<K, Args>>::Threading;
type QueueCounter<K, Args, P> = <QueueThreading<K, Args, P> as Threading>::Counter;
type QueueCondvar<K, Args, P> = <QueueThreading<K, Args, P> as Threading>::Condvar;
type Buffer<K, Args> = VecDeque<QueuedEvent<K, Args>>;
type InFlight<'a, K, Args, P> = CounterGuard<'a, QueueCounter<K, Args, P>>;

/// An event dispatcher with a FIFO of deferred events.
pub struct EventQueue<K, Args, P = DefaultPolicies, E = FirstArgument>
where
    P: Policies<K, Args>,
{
    dispatcher: EventDispatcher<K, Args, P, E>,
    pending: PolicyMutex<P::Threading, Buffer<K, Args>>,
    /// Drained buffer kept for reuse by the next `process`.
    spare: PolicyMutex<P::Threading, Buffer<K, Args>>,
    available: QueueCondvar<K, Args, P>,
    /// Batches detached from `pending` but not yet fully dispatched.
    in_flight: QueueCounter<K, Args, P>,
    /// Live [`DisableQueueNotify`] guards.
    notify_suppressed: QueueCounter<K, Args, P>,
    config: QueueConfig,
}

impl<K, Args, P, E> EventQueue<K, Args, P, E>
where
    P: Policies<K, Args>,
    Args: 'static,
{
    /// Create an empty queue with default configuration.
    pub fn new() -> Self
    where
        E: Default,
    {
        Self::with_config(QueueConfig::default())
    }

    /// Create an empty queue with the given configuration.
    pub fn with_config(config: QueueConfig) -> Self
    where
        E: Default,
    {
        Self::from_parts(EventDispatcher::new(), config)
    }

    /// Create an empty queue with a custom key extractor.
    pub fn with_extractor(extractor: E) -> Self {
        Self::from_parts(EventDispatcher::with_extractor(extractor), QueueConfig::default())
    }

    fn from_parts(dispatcher: EventDispatcher<K, Args, P, E>, config: QueueConfig) -> Self {
        Self {
            dispatcher,
            pending: lock_api::Mutex::new(VecDeque::with_capacity(config.initial_capacity)),
            spare: lock_api::Mutex::new(VecDeque::with_capacity(config.initial_capacity)),
            available: Default::default(),
            in_flight: AtomicCounter::new(0),
            notify_suppressed: AtomicCounter::new(0),
            config,
        }
    }

    /// The queue configuration.
    pub fn queue_config(&self) -> &QueueConfig {
        &self.config
    }

    /// The underlying dispatcher.
    pub fn dispatcher(&self) -> &EventDispatcher<K, Args, P, E> {
        &self.dispatcher
    }

    /// Dispatch every event queued so far, in FIFO order.
    ///
    /// Events enqueued while this runs (including by listeners) are left for
    /// the next call. Returns `false` if the queue was empty.
    #[tracing::instrument(
        name = "horizon_lattice::process",
        target = "horizon_lattice_dispatch::queue",
        level = "trace",
        skip_all,
        fields(queue = %self.config.name)
    )]
    pub fn process(&self) -> bool {
        let Some((mut batch, _in_flight)) = self.take_batch() else {
            return false;
        };

        let count = batch.len();
        let _span = PerfSpan::new(span_names::PROCESS);
        for event in batch.drain(..) {
            self.dispatcher.dispatch_resolved(&event.key, event.args);
        }
        crate::dispatch_debug!(
            target: targets::QUEUE,
            queue = %self.config.name,
            count,
            "processed queued events"
        );

        self.recycle(batch);
        true
    }

    /// Dispatch the oldest queued event only.
    ///
    /// Returns `false` if the queue was empty.
    pub fn process_one(&self) -> bool {
        let (event, _in_flight) = {
            let mut pending = self.pending.lock();
            let Some(event) = pending.pop_front() else {
                return false;
            };
            (event, CounterGuard::new(&self.in_flight))
        };
        self.dispatcher.dispatch_resolved(&event.key, event.args);
        true
    }

    /// Dispatch the queued events whose arguments satisfy `predicate`.
    ///
    /// Skipped events go back to the front of the queue, ahead of anything
    /// enqueued meanwhile, in their original order. Returns `true` if at least
    /// one event was dispatched.
    pub fn process_if<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&Args) -> bool,
    {
        let Some((mut batch, _in_flight)) = self.take_batch() else {
            return false;
        };

        let mut skipped = VecDeque::new();
        let mut processed = false;
        for event in batch.drain(..) {
            if predicate(&event.args) {
                self.dispatcher.dispatch_resolved(&event.key, event.args);
                processed = true;
            } else {
                skipped.push_back(event);
            }
        }

        if !skipped.is_empty() {
            let mut pending = self.pending.lock();
            while let Some(event) = skipped.pop_back() {
                pending.push_front(event);
            }
        }
        self.recycle(batch);
        processed
    }

    /// Block until there is something to process and notifications are not
    /// disabled.
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while !self.can_process(&pending) {
            self.available.wait(&mut pending);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            crate::dispatch_warn!(
                target: targets::QUEUE,
                ?timeout,
                "wait timeout overflows the clock; waiting without one"
            );
            self.wait();
            return true;
        };

        let mut pending = self.pending.lock();
        while !self.can_process(&pending) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.available.wait_for(&mut pending, deadline - now);
        }
        true
    }

    /// Like [`wait_for`](Self::wait_for), reporting a timeout as an error.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        if self.wait_for(timeout) {
            Ok(())
        } else {
            Err(DispatchError::Timeout(timeout))
        }
    }

    /// Suppress consumer wake-ups until the returned guard is dropped.
    ///
    /// Useful when enqueueing a burst of events: waiters stay parked until the
    /// last guard goes away, then one of them is woken if events are pending.
    pub fn disable_notify(&self) -> DisableQueueNotify<'_> {
        self.notify_suppressed.increment();
        DisableQueueNotify { queue: self }
    }

    /// Whether nothing is pending and no batch is being processed.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty() && self.in_flight.load() == 0
    }

    /// Number of events waiting to be processed.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Remove and return the oldest queued event without dispatching it.
    pub fn take_event(&self) -> Option<QueuedEvent<K, Args>> {
        self.pending.lock().pop_front()
    }

    /// Dispatch an event obtained from [`take_event`](Self::take_event) or
    /// built by hand, bypassing the queue.
    pub fn dispatch_queued(&self, event: QueuedEvent<K, Args>) {
        self.dispatcher.dispatch_resolved(&event.key, event.args);
    }

    /// Drop every queued event without dispatching. Returns how many there
    /// were.
    pub fn clear_events(&self) -> usize {
        let Some((mut batch, _in_flight)) = self.take_batch() else {
            return 0;
        };
        let cleared = batch.len();
        batch.clear();
        self.recycle(batch);
        cleared
    }

    fn push(&self, event: QueuedEvent<K, Args>) {
        self.pending.lock().push_back(event);
        if self.notify_suppressed.load() == 0 {
            self.available.notify_one();
        }
    }

    fn can_process(&self, pending: &Buffer<K, Args>) -> bool {
        (!pending.is_empty() || self.in_flight.load() > 0) && self.notify_suppressed.load() == 0
    }

    /// Detach the pending buffer, leaving the spare in its place.
    ///
    /// The batch is marked in flight before the lock is released, so the
    /// queue never looks empty while its events are still being dispatched.
    fn take_batch(&self) -> Option<(Buffer<K, Args>, InFlight<'_, K, Args, P>)> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return None;
        }
        let in_flight = CounterGuard::new(&self.in_flight);
        let spare = mem::take(&mut *self.spare.lock());
        Some((mem::replace(&mut *pending, spare), in_flight))
    }

    /// Keep a drained buffer for reuse if it beats the current spare.
    fn recycle(&self, batch: Buffer<K, Args>) {
        let mut spare = self.spare.lock();
        if batch.capacity() > spare.capacity() {
            *spare = batch;
        }
    }
}

impl<K, Args, P, E> EventQueue<K, Args, P, E>
where
    P: Policies<K, Args>,
    P::ArgumentPassing: IncludesKey,
    E: KeyExtractor<K, Args>,
    Args: 'static,
{
    /// Queue `args` under the key extracted from it.
    pub fn enqueue(&self, args: Args) {
        let key = self.dispatcher.event_key(&args);
        self.push(QueuedEvent { key, args });
    }
}

impl<K, Args, P, E> EventQueue<K, Args, P, E>
where
    P: Policies<K, Args>,
    P::ArgumentPassing: ExcludesKey,
    Args: 'static,
{
    /// Queue `args` under `key`.
    pub fn enqueue_to(&self, key: K, args: Args) {
        self.push(QueuedEvent { key, args });
    }
}

impl<K, Args, P, E> EventQueue<K, Args, P, E>
where
    P: Policies<K, Args>,
    K: Clone,
    Args: Clone + 'static,
{
    /// A copy of the oldest queued event.
    pub fn peek_event(&self) -> Option<QueuedEvent<K, Args>> {
        self.pending.lock().front().cloned()
    }
}

impl<K, Args, P, E> Deref for EventQueue<K, Args, P, E>
where
    P: Policies<K, Args>,
{
    type Target = EventDispatcher<K, Args, P, E>;

    fn deref(&self) -> &Self::Target {
        &self.dispatcher
    }
}

impl<K, Args, P, E> Default for EventQueue<K, Args, P, E>
where
    P: Policies<K, Args>,
    E: Default,
    Args: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, Args, P, E> fmt::Debug for EventQueue<K, Args, P, E>
where
    P: Policies<K, Args>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("name", &self.config.name)
            .field("pending", &self.pending.lock().len())
            .field("in_flight", &self.in_flight.load())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

trait NotifyRelease {
    fn release_notify(&self);
}

impl<K, Args, P, E> NotifyRelease for EventQueue<K, Args, P, E>
where
    P: Policies<K, Args>,
{
    fn release_notify(&self) {
        if self.notify_suppressed.decrement() != 0 {
            return;
        }
        // Check under the lock so a waiter cannot slip between the check and
        // its park.
        let ready = {
            let pending = self.pending.lock();
            !pending.is_empty() || self.in_flight.load() > 0
        };
        if ready {
            self.available.notify_one();
        }
    }
}

/// Guard returned by [`EventQueue::disable_notify`].
///
/// While any guard is alive, enqueueing does not wake waiting consumers and
/// [`EventQueue::wait`] keeps blocking.
#[must_use = "notifications are re-enabled as soon as the guard is dropped"]
pub struct DisableQueueNotify<'a> {
    queue: &'a dyn NotifyRelease,
}

impl Drop for DisableQueueNotify<'_> {
    fn drop(&mut self) {
        self.queue.release_notify();
    }
}

impl fmt::Debug for DisableQueueNotify<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisableQueueNotify").finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(EventQueue<u32, (u32, String)>: Send, Sync);
static_assertions::assert_not_impl_any!(
    EventQueue<u32, (u32,), crate::policy::Policy<crate::threading::SingleThreaded>>: Sync
);
