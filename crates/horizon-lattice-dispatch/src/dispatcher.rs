//! Event dispatcher.
//!
//! An [`EventDispatcher`] keeps one [`ListenerList`] per event key and
//! delivers each dispatched event synchronously to the listeners registered
//! for its key. Lists are created lazily on first registration and are never
//! removed, so a key's list stays valid while it is being invoked without the
//! map lock held.
//!
//! # Filters
//!
//! Filters run before any listener. Each one receives the arguments mutably and
//! may rewrite them; the first filter returning `false` drops the event.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use horizon_lattice_dispatch::EventDispatcher;
//!
//! // Key is the first tuple element.
//! let dispatcher = EventDispatcher::<u32, (u32, i32)>::new();
//! let total = Arc::new(AtomicI32::new(0));
//!
//! let sum = Arc::clone(&total);
//! dispatcher.append_listener(3, move |&(_, value): &(u32, i32)| {
//!     sum.fetch_add(value, Ordering::SeqCst);
//! });
//!
//! // Negate every value before listeners see it.
//! dispatcher.append_filter(|args: &mut (u32, i32)| {
//!     args.1 = -args.1;
//!     true
//! });
//!
//! dispatcher.dispatch((3, 5));
//! dispatcher.dispatch((4, 100)); // nobody listens to 4
//! assert_eq!(total.load(Ordering::SeqCst), -5);
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::lock_api;

use crate::callback_list::{CallbackList, Handle, Listener, ListenerList};
use crate::error::{DispatchError, Result};
use crate::logging::targets;
use crate::policy::{
    DefaultPolicies, ExcludesKey, FirstArgument, IncludesKey, KeyExtractor, ListenerMap, Policies,
};
use crate::threading::PolicyMutex;

/// Shared filter closure. Returning `false` drops the event.
pub type Filter<Args> = Arc<dyn Fn(&mut Args) -> bool + Send + Sync>;

/// Identifies a filter registered with [`EventDispatcher::append_filter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FilterHandle(Handle);

/// Runtime options for an [`EventDispatcher`].
///
/// # Example
///
/// ```
/// use horizon_lattice_dispatch::{DispatcherConfig, EventDispatcher};
///
/// // Stop delivering an event once a listener marks it handled.
/// let config = DispatcherConfig::new()
///     .can_continue_invoking(|args: &(u8, bool)| !args.1);
/// let dispatcher = EventDispatcher::<u8, (u8, bool)>::new().with_config(config);
/// # let _ = dispatcher;
/// ```
pub struct DispatcherConfig<Args> {
    can_continue: Option<Arc<dyn Fn(&Args) -> bool + Send + Sync>>,
}

impl<Args> DispatcherConfig<Args> {
    /// Configuration that always continues to the next listener.
    pub fn new() -> Self {
        Self { can_continue: None }
    }

    /// Set the predicate consulted after each listener call.
    ///
    /// Dispatch stops when it returns `false`.
    pub fn can_continue_invoking<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Args) -> bool + Send + Sync + 'static,
    {
        self.can_continue = Some(Arc::new(predicate));
        self
    }

    /// Whether a can-continue predicate is set.
    pub fn has_can_continue(&self) -> bool {
        self.can_continue.is_some()
    }
}

impl<Args> Default for DispatcherConfig<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args> Clone for DispatcherConfig<Args> {
    fn clone(&self) -> Self {
        Self {
            can_continue: self.can_continue.clone(),
        }
    }
}

impl<Args> fmt::Debug for DispatcherConfig<Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherConfig")
            .field("can_continue", &self.can_continue.is_some())
            .finish()
    }
}

/// The listener list type a dispatcher with policies `P` stores per key.
pub(crate) type KeyListeners<K, Args, P> =
    Arc<ListenerList<Args, <P as Policies<K, Args>>::Threading>>;

/// Synchronous, key-based event dispatcher.
///
/// `K` is the event key and `Args` the argument value listeners receive. `P`
/// bundles the threading, argument passing and map policies (see
/// [`policy`](crate::policy)), and `E` extracts the key from `Args` for
/// [`dispatch`](Self::dispatch).
pub struct EventDispatcher<K, Args, P = DefaultPolicies, E = FirstArgument>
where
    P: Policies<K, Args>,
{
    listeners: PolicyMutex<P::Threading, P::Map>,
    filters: CallbackList<Filter<Args>, P::Threading>,
    extractor: E,
    config: DispatcherConfig<Args>,
    _key: PhantomData<fn() -> K>,
}

impl<K, Args, P, E> EventDispatcher<K, Args, P, E>
where
    P: Policies<K, Args>,
    Args: 'static,
{
    /// Create an empty dispatcher.
    pub fn new() -> Self
    where
        E: Default,
    {
        Self::with_extractor(E::default())
    }

    /// Create an empty dispatcher with a custom key extractor.
    pub fn with_extractor(extractor: E) -> Self {
        Self {
            listeners: lock_api::Mutex::new(P::Map::default()),
            filters: CallbackList::new(),
            extractor,
            config: DispatcherConfig::default(),
            _key: PhantomData,
        }
    }

    /// Replace the runtime configuration.
    pub fn with_config(mut self, config: DispatcherConfig<Args>) -> Self {
        self.config = config;
        self
    }

    /// The runtime configuration.
    pub fn config(&self) -> &DispatcherConfig<Args> {
        &self.config
    }

    /// Add a listener for `key` after its existing listeners.
    pub fn append_listener<F>(&self, key: K, listener: F) -> Handle
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.listeners_for(key).append(Arc::new(listener))
    }

    /// Add a listener for `key` before its existing listeners.
    pub fn prepend_listener<F>(&self, key: K, listener: F) -> Handle
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.listeners_for(key).prepend(Arc::new(listener))
    }

    /// Add a listener for `key` in front of `before`.
    ///
    /// Appends if `before` is not a live listener of `key`.
    pub fn insert_listener<F>(&self, key: K, listener: F, before: Handle) -> Handle
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.listeners_for(key).insert(Arc::new(listener), before)
    }

    /// Remove a listener. Returns `false` if it was not registered for `key`.
    pub fn remove_listener(&self, key: &K, handle: Handle) -> bool {
        self.find_listeners(key)
            .is_some_and(|listeners| listeners.remove(handle))
    }

    /// Remove a listener, distinguishing an unknown key from a stale handle.
    pub fn try_remove_listener(&self, key: &K, handle: Handle) -> Result<()> {
        self.find_listeners(key)
            .ok_or(DispatchError::UnknownEvent)?
            .try_remove(handle)
    }

    /// Whether `key` has at least one listener.
    pub fn has_listeners(&self, key: &K) -> bool {
        self.find_listeners(key)
            .is_some_and(|listeners| !listeners.is_empty())
    }

    /// Number of listeners registered for `key`.
    pub fn listener_count(&self, key: &K) -> usize {
        self.find_listeners(key)
            .map_or(0, |listeners| listeners.len())
    }

    /// Visit the listeners of `key` in order.
    pub fn for_each_listener<F>(&self, key: &K, f: F)
    where
        F: FnMut(Handle, &Listener<Args>),
    {
        if let Some(listeners) = self.find_listeners(key) {
            listeners.for_each(f);
        }
    }

    /// Visit the listeners of `key` until `f` returns `false`.
    ///
    /// Returns `true` if every listener was visited.
    pub fn for_each_listener_if<F>(&self, key: &K, f: F) -> bool
    where
        F: FnMut(Handle, &Listener<Args>) -> bool,
    {
        self.find_listeners(key)
            .is_none_or(|listeners| listeners.for_each_if(f))
    }

    /// Add a filter after the existing ones.
    pub fn append_filter<F>(&self, filter: F) -> FilterHandle
    where
        F: Fn(&mut Args) -> bool + Send + Sync + 'static,
    {
        FilterHandle(self.filters.append(Arc::new(filter)))
    }

    /// Remove a filter. Returns `false` if it was already removed.
    pub fn remove_filter(&self, handle: FilterHandle) -> bool {
        self.filters.remove(handle.0)
    }

    /// The listener list for `key`, created on first use.
    pub(crate) fn listeners_for(&self, key: K) -> KeyListeners<K, Args, P> {
        let mut listeners = self.listeners.lock();
        Arc::clone(listeners.get_or_insert_with(key, || Arc::new(CallbackList::new())))
    }

    pub(crate) fn find_listeners(&self, key: &K) -> Option<KeyListeners<K, Args, P>> {
        self.listeners.lock().get(key).cloned()
    }

    /// Run filters and listeners for an event whose key is already known.
    pub(crate) fn dispatch_resolved(&self, key: &K, mut args: Args) {
        if !self.filters.is_empty() && !self.filters.for_each_if(|_, filter| filter(&mut args)) {
            tracing::trace!(target: targets::DISPATCHER, "event dropped by filter");
            return;
        }

        let Some(listeners) = self.find_listeners(key) else {
            return;
        };
        match &self.config.can_continue {
            Some(can_continue) => {
                listeners.invoke_if(&args, |args| can_continue(args));
            }
            None => listeners.invoke(&args),
        }
    }
}

impl<K, Args, P, E> EventDispatcher<K, Args, P, E>
where
    P: Policies<K, Args>,
    P::ArgumentPassing: IncludesKey,
    E: KeyExtractor<K, Args>,
    Args: 'static,
{
    /// Dispatch `args` to the listeners of the key extracted from it.
    #[tracing::instrument(
        name = "horizon_lattice::dispatch",
        target = "horizon_lattice_dispatch::dispatcher",
        level = "trace",
        skip_all
    )]
    pub fn dispatch(&self, args: Args) {
        let key = self.extractor.event_key(&args);
        self.dispatch_resolved(&key, args);
    }

    /// The key `args` would be dispatched under.
    pub fn event_key(&self, args: &Args) -> K {
        self.extractor.event_key(args)
    }
}

impl<K, Args, P, E> EventDispatcher<K, Args, P, E>
where
    P: Policies<K, Args>,
    P::ArgumentPassing: ExcludesKey,
    Args: 'static,
{
    /// Dispatch `args` to the listeners of `key`.
    #[tracing::instrument(
        name = "horizon_lattice::dispatch",
        target = "horizon_lattice_dispatch::dispatcher",
        level = "trace",
        skip_all
    )]
    pub fn dispatch_to(&self, key: K, args: Args) {
        self.dispatch_resolved(&key, args);
    }
}

impl<K, Args, P, E> Default for EventDispatcher<K, Args, P, E>
where
    P: Policies<K, Args>,
    E: Default,
    Args: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, Args, P, E> Clone for EventDispatcher<K, Args, P, E>
where
    K: Clone,
    P: Policies<K, Args>,
    E: Clone,
    Args: 'static,
{
    /// Deep copy: every listener list and the filter list are duplicated, so
    /// registrations on the copy do not affect the original.
    fn clone(&self) -> Self {
        let mut listeners = P::Map::default();
        self.listeners.lock().for_each_entry(|key, list| {
            listeners.insert(key.clone(), Arc::new((**list).clone()));
        });
        Self {
            listeners: lock_api::Mutex::new(listeners),
            filters: self.filters.clone(),
            extractor: self.extractor.clone(),
            config: self.config.clone(),
            _key: PhantomData,
        }
    }
}

impl<K, Args, P, E> fmt::Debug for EventDispatcher<K, Args, P, E>
where
    P: Policies<K, Args>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("keys", &self.listeners.lock().len())
            .field("filters", &self.filters.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(EventDispatcher<u32, (u32, String)>: Send, Sync, Clone);
