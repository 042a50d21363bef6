//! Automatic listener removal.
//!
//! - [`ScopedRemover`] removes everything it registered when it goes out of
//!   scope, like a connection guard for a group of listeners.
//! - [`counter_remover`] registers listeners that remove themselves after a
//!   fixed number of calls.
//! - [`conditional_remover`] registers listeners that remove themselves the
//!   first time a condition holds.
//!
//! All of them work on any [`ListenerHost`]: a
//! [`ListenerList`](crate::ListenerList) (whose key is `()`), an
//! [`EventDispatcher`] or an [`EventQueue`].
//!
//! ```
//! use std::sync::Arc;
//! use horizon_lattice_dispatch::{counter_remover, EventDispatcher};
//!
//! let dispatcher = Arc::new(EventDispatcher::<u8, (u8,)>::new());
//! counter_remover(&dispatcher).append_listener(1, |_: &(u8,)| {}, 2);
//!
//! dispatcher.dispatch((1,));
//! assert!(dispatcher.has_listeners(&1));
//! dispatcher.dispatch((1,));
//! assert!(!dispatcher.has_listeners(&1));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::callback_list::{CallbackList, Handle, Listener};
use crate::dispatcher::EventDispatcher;
use crate::logging::targets;
use crate::policy::Policies;
use crate::queue::EventQueue;
use crate::threading::Threading;

/// Something listeners can be registered with and removed from by key.
pub trait ListenerHost {
    /// Key listeners are registered under.
    type Key: Clone + Send + Sync + 'static;
    /// Argument value listeners receive.
    type Args: 'static;

    /// Register `listener` after the key's existing listeners.
    fn append_entry(&self, key: Self::Key, listener: Listener<Self::Args>) -> Handle;

    /// Register `listener` before the key's existing listeners.
    fn prepend_entry(&self, key: Self::Key, listener: Listener<Self::Args>) -> Handle;

    /// Register `listener` in front of `before`, appending if it is not live.
    fn insert_entry(&self, key: Self::Key, listener: Listener<Self::Args>, before: Handle)
    -> Handle;

    /// Remove a listener. Returns `false` if it was not registered.
    fn remove_entry(&self, key: &Self::Key, handle: Handle) -> bool;
}

impl<Args: 'static, T: Threading> ListenerHost for CallbackList<Listener<Args>, T> {
    type Key = ();
    type Args = Args;

    fn append_entry(&self, _key: (), listener: Listener<Args>) -> Handle {
        self.append(listener)
    }

    fn prepend_entry(&self, _key: (), listener: Listener<Args>) -> Handle {
        self.prepend(listener)
    }

    fn insert_entry(&self, _key: (), listener: Listener<Args>, before: Handle) -> Handle {
        self.insert(listener, before)
    }

    fn remove_entry(&self, _key: &(), handle: Handle) -> bool {
        self.remove(handle)
    }
}

impl<K, Args, P, E> ListenerHost for EventDispatcher<K, Args, P, E>
where
    K: Clone + Send + Sync + 'static,
    Args: 'static,
    P: Policies<K, Args>,
{
    type Key = K;
    type Args = Args;

    fn append_entry(&self, key: K, listener: Listener<Args>) -> Handle {
        self.listeners_for(key).append(listener)
    }

    fn prepend_entry(&self, key: K, listener: Listener<Args>) -> Handle {
        self.listeners_for(key).prepend(listener)
    }

    fn insert_entry(&self, key: K, listener: Listener<Args>, before: Handle) -> Handle {
        self.listeners_for(key).insert(listener, before)
    }

    fn remove_entry(&self, key: &K, handle: Handle) -> bool {
        self.remove_listener(key, handle)
    }
}

impl<K, Args, P, E> ListenerHost for EventQueue<K, Args, P, E>
where
    K: Clone + Send + Sync + 'static,
    Args: 'static,
    P: Policies<K, Args>,
{
    type Key = K;
    type Args = Args;

    fn append_entry(&self, key: K, listener: Listener<Args>) -> Handle {
        self.dispatcher().append_entry(key, listener)
    }

    fn prepend_entry(&self, key: K, listener: Listener<Args>) -> Handle {
        self.dispatcher().prepend_entry(key, listener)
    }

    fn insert_entry(&self, key: K, listener: Listener<Args>, before: Handle) -> Handle {
        self.dispatcher().insert_entry(key, listener, before)
    }

    fn remove_entry(&self, key: &K, handle: Handle) -> bool {
        self.dispatcher().remove_entry(key, handle)
    }
}

/// Removes every listener it registered when dropped.
///
/// ```
/// use horizon_lattice_dispatch::{EventDispatcher, ScopedRemover};
///
/// let dispatcher = EventDispatcher::<u8, (u8,)>::new();
/// {
///     let scope = ScopedRemover::new(&dispatcher);
///     scope.append_listener(1, |_: &(u8,)| {});
///     assert!(dispatcher.has_listeners(&1));
/// }
/// assert!(!dispatcher.has_listeners(&1));
/// ```
pub struct ScopedRemover<'a, H: ListenerHost> {
    host: &'a H,
    registered: Mutex<Vec<(H::Key, Handle)>>,
}

impl<'a, H: ListenerHost> ScopedRemover<'a, H> {
    /// Create a remover registering through `host`.
    pub fn new(host: &'a H) -> Self {
        Self {
            host,
            registered: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener after the key's existing listeners.
    pub fn append_listener<F>(&self, key: H::Key, listener: F) -> Handle
    where
        F: Fn(&H::Args) + Send + Sync + 'static,
    {
        let handle = self.host.append_entry(key.clone(), Arc::new(listener));
        self.registered.lock().push((key, handle));
        handle
    }

    /// Register a listener before the key's existing listeners.
    pub fn prepend_listener<F>(&self, key: H::Key, listener: F) -> Handle
    where
        F: Fn(&H::Args) + Send + Sync + 'static,
    {
        let handle = self.host.prepend_entry(key.clone(), Arc::new(listener));
        self.registered.lock().push((key, handle));
        handle
    }

    /// Register a listener in front of `before`.
    pub fn insert_listener<F>(&self, key: H::Key, listener: F, before: Handle) -> Handle
    where
        F: Fn(&H::Args) + Send + Sync + 'static,
    {
        let handle = self.host.insert_entry(key.clone(), Arc::new(listener), before);
        self.registered.lock().push((key, handle));
        handle
    }

    /// Remove every listener registered so far. Returns how many were still
    /// registered.
    pub fn remove_all(&self) -> usize {
        let registered = std::mem::take(&mut *self.registered.lock());
        registered
            .into_iter()
            .filter(|(key, handle)| self.host.remove_entry(key, *handle))
            .count()
    }
}

impl<H: ListenerHost> Drop for ScopedRemover<'_, H> {
    fn drop(&mut self) {
        let removed = self.remove_all();
        if removed > 0 {
            crate::dispatch_trace!(
                target: targets::REMOVER,
                removed,
                "scoped listeners removed"
            );
        }
    }
}

impl<H: ListenerHost> fmt::Debug for ScopedRemover<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedRemover")
            .field("registered", &self.registered.lock().len())
            .finish_non_exhaustive()
    }
}

enum Placement {
    Back,
    Front,
    Before(Handle),
}

/// Shared between a self-removing listener and the code that registered it.
///
/// The listener may expire before registration has returned its handle, so
/// whichever side finishes last performs the removal.
struct AutoRemoval<H: ListenerHost> {
    host: Weak<H>,
    key: H::Key,
    handle: OnceLock<Handle>,
    expired: AtomicBool,
}

impl<H: ListenerHost> AutoRemoval<H> {
    fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    fn expire(&self) {
        self.expired.store(true, Ordering::SeqCst);
        self.detach();
    }

    fn attach(&self, handle: Handle) {
        let _ = self.handle.set(handle);
        if self.is_expired() {
            self.detach();
        }
    }

    fn detach(&self) {
        let (Some(host), Some(&handle)) = (self.host.upgrade(), self.handle.get()) else {
            return;
        };
        if host.remove_entry(&self.key, handle) {
            crate::dispatch_trace!(target: targets::REMOVER, ?handle, "listener removed itself");
        }
    }
}

fn register<H, M>(host: &Arc<H>, key: H::Key, placement: Placement, make: M) -> Handle
where
    H: ListenerHost,
    M: FnOnce(Arc<AutoRemoval<H>>) -> Listener<H::Args>,
{
    let removal = Arc::new(AutoRemoval {
        host: Arc::downgrade(host),
        key: key.clone(),
        handle: OnceLock::new(),
        expired: AtomicBool::new(false),
    });
    let listener = make(Arc::clone(&removal));
    let handle = match placement {
        Placement::Back => host.append_entry(key, listener),
        Placement::Front => host.prepend_entry(key, listener),
        Placement::Before(before) => host.insert_entry(key, listener, before),
    };
    removal.attach(handle);
    handle
}

/// Registers listeners that remove themselves after a number of calls.
///
/// Created by [`counter_remover`].
pub struct CounterRemover<H> {
    host: Arc<H>,
}

/// Register listeners on `host` that remove themselves after being called a
/// given number of times. A count of zero is treated as one.
pub fn counter_remover<H: ListenerHost>(host: &Arc<H>) -> CounterRemover<H> {
    CounterRemover {
        host: Arc::clone(host),
    }
}

impl<H> CounterRemover<H>
where
    H: ListenerHost + Send + Sync + 'static,
{
    /// Register a listener after the key's existing listeners.
    pub fn append_listener<F>(&self, key: H::Key, listener: F, count: usize) -> Handle
    where
        F: Fn(&H::Args) + Send + Sync + 'static,
    {
        self.register(key, Placement::Back, listener, count)
    }

    /// Register a listener before the key's existing listeners.
    pub fn prepend_listener<F>(&self, key: H::Key, listener: F, count: usize) -> Handle
    where
        F: Fn(&H::Args) + Send + Sync + 'static,
    {
        self.register(key, Placement::Front, listener, count)
    }

    /// Register a listener in front of `before`.
    pub fn insert_listener<F>(
        &self,
        key: H::Key,
        listener: F,
        before: Handle,
        count: usize,
    ) -> Handle
    where
        F: Fn(&H::Args) + Send + Sync + 'static,
    {
        self.register(key, Placement::Before(before), listener, count)
    }

    fn register<F>(&self, key: H::Key, placement: Placement, listener: F, count: usize) -> Handle
    where
        F: Fn(&H::Args) + Send + Sync + 'static,
    {
        let remaining = AtomicUsize::new(count.max(1));
        register(&self.host, key, placement, move |removal| -> Listener<H::Args> {
            Arc::new(move |args: &H::Args| {
                let claimed = remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    n.checked_sub(1)
                });
                match claimed {
                    Err(_) => return,
                    Ok(1) => removal.expire(),
                    Ok(_) => {}
                }
                listener(args);
            })
        })
    }
}

/// Registers listeners that remove themselves once a condition holds.
///
/// Created by [`conditional_remover`].
pub struct ConditionalRemover<H> {
    host: Arc<H>,
}

/// Register listeners on `host` that remove themselves the first time their
/// condition returns `true`. The listener is still called that time.
pub fn conditional_remover<H: ListenerHost>(host: &Arc<H>) -> ConditionalRemover<H> {
    ConditionalRemover {
        host: Arc::clone(host),
    }
}

impl<H> ConditionalRemover<H>
where
    H: ListenerHost + Send + Sync + 'static,
{
    /// Register a listener after the key's existing listeners.
    pub fn append_listener<F, C>(&self, key: H::Key, listener: F, condition: C) -> Handle
    where
        F: Fn(&H::Args) + Send + Sync + 'static,
        C: Fn(&H::Args) -> bool + Send + Sync + 'static,
    {
        self.register(key, Placement::Back, listener, condition)
    }

    /// Register a listener before the key's existing listeners.
    pub fn prepend_listener<F, C>(&self, key: H::Key, listener: F, condition: C) -> Handle
    where
        F: Fn(&H::Args) + Send + Sync + 'static,
        C: Fn(&H::Args) -> bool + Send + Sync + 'static,
    {
        self.register(key, Placement::Front, listener, condition)
    }

    /// Register a listener in front of `before`.
    pub fn insert_listener<F, C>(
        &self,
        key: H::Key,
        listener: F,
        before: Handle,
        condition: C,
    ) -> Handle
    where
        F: Fn(&H::Args) + Send + Sync + 'static,
        C: Fn(&H::Args) -> bool + Send + Sync + 'static,
    {
        self.register(key, Placement::Before(before), listener, condition)
    }

    fn register<F, C>(
        &self,
        key: H::Key,
        placement: Placement,
        listener: F,
        condition: C,
    ) -> Handle
    where
        F: Fn(&H::Args) + Send + Sync + 'static,
        C: Fn(&H::Args) -> bool + Send + Sync + 'static,
    {
        register(&self.host, key, placement, move |removal| -> Listener<H::Args> {
            Arc::new(move |args: &H::Args| {
                if removal.is_expired() {
                    return;
                }
                if condition(args) {
                    removal.expire();
                }
                listener(args);
            })
        })
    }
}
