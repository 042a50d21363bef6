//! Callback lists.
//!
//! A [`CallbackList`] is an ordered collection of callbacks that can be
//! invoked in insertion order. It is the building block for
//! [`EventDispatcher`](crate::EventDispatcher) and
//! [`EventQueue`](crate::EventQueue), and it is useful on its own wherever a
//! plain observer list is needed.
//!
//! # Key Types
//!
//! - [`CallbackList<C, T>`] - The list itself, generic over the callback type
//!   and the [`Threading`] policy
//! - [`Handle`] - Identifies one inserted callback
//! - [`Listener<Args>`] - Shared closure type used by dispatchers and queues
//! - [`Invoke`] - How a stored callback is called with an argument value
//!
//! # Mutation During Invocation
//!
//! Callbacks run without any internal lock held, so a callback may freely
//! append, insert or remove callbacks on the list that is invoking it:
//!
//! - A callback removed before its turn is not called.
//! - A callback added while an invocation is in progress is not called by
//!   that invocation, only by later ones.
//! - Removing the callback that is currently running is allowed; the running
//!   call finishes normally.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use horizon_lattice_dispatch::{listener, ListenerList};
//!
//! let list = ListenerList::<i32>::new();
//! let total = Arc::new(AtomicI32::new(0));
//!
//! let sum = Arc::clone(&total);
//! let handle = list.append(listener(move |value: &i32| {
//!     sum.fetch_add(*value, Ordering::SeqCst);
//! }));
//!
//! list.invoke(&5);
//! assert_eq!(total.load(Ordering::SeqCst), 5);
//!
//! assert!(list.remove(handle));
//! list.invoke(&5);
//! assert_eq!(total.load(Ordering::SeqCst), 5);
//! ```

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::lock_api;
use slotmap::{SlotMap, new_key_type};

use crate::error::{DispatchError, Result};
use crate::logging::targets;
use crate::threading::{AtomicCounter, MultiThreaded, PolicyMutex, Threading};

new_key_type! {
    /// Identifies a callback inside the list that issued it.
    ///
    /// A handle stays meaningful until the callback is removed. After that,
    /// operations taking the handle report that nothing was found. Handles are
    /// scoped to one list; passing a handle to a different list is not
    /// detected and may name an unrelated callback.
    pub struct Handle;
}

/// Shared, thread-safe listener closure taking `&Args`.
pub type Listener<Args> = Arc<dyn Fn(&Args) + Send + Sync>;

/// A callback list whose callbacks are [`Listener`]s.
pub type ListenerList<Args, T = MultiThreaded> = CallbackList<Listener<Args>, T>;

/// Wrap a closure as a [`Listener`].
///
/// Mostly a type-inference aid: the closure's argument type is fixed by the
/// `Args` parameter instead of needing an annotation at every call site.
pub fn listener<Args, F>(f: F) -> Listener<Args>
where
    F: Fn(&Args) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Calls a stored callback with a borrowed argument value.
pub trait Invoke<Args: ?Sized> {
    /// Call the callback.
    fn invoke(&self, args: &Args);
}

impl<Args: ?Sized, F: Fn(&Args) + ?Sized> Invoke<Args> for Arc<F> {
    fn invoke(&self, args: &Args) {
        (**self)(args)
    }
}

impl<Args: ?Sized, F: Fn(&Args) + ?Sized> Invoke<Args> for Rc<F> {
    fn invoke(&self, args: &Args) {
        (**self)(args)
    }
}

impl<Args: ?Sized> Invoke<Args> for fn(&Args) {
    fn invoke(&self, args: &Args) {
        (self)(args)
    }
}

/// Counter value marking a node that has been removed from the chain.
const REMOVED: u64 = 0;

struct Node<C> {
    callback: Option<C>,
    previous: Option<Handle>,
    next: Option<Handle>,
    /// Insertion stamp, or [`REMOVED`].
    counter: u64,
    /// Number of traversals currently positioned on this node.
    pins: u32,
}

impl<C> Node<C> {
    fn new(callback: C, counter: u64, previous: Option<Handle>, next: Option<Handle>) -> Self {
        Self {
            callback: Some(callback),
            previous,
            next,
            counter,
            pins: 0,
        }
    }
}

/// The doubly linked chain, stored in an arena.
///
/// Removed nodes that a traversal is still positioned on stay in the arena as
/// tombstones until the last traversal moves past them. A tombstone keeps its
/// `next` link, and that link is redirected whenever its target is removed, so
/// a traversal can always step forward to a node that is still in the chain
/// (or to the end).
struct Links<C> {
    nodes: SlotMap<Handle, Node<C>>,
    head: Option<Handle>,
    tail: Option<Handle>,
    live: usize,
    tombstones: Vec<Handle>,
}

impl<C> Links<C> {
    fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            head: None,
            tail: None,
            live: 0,
            tombstones: Vec::new(),
        }
    }

    fn is_live(&self, handle: Handle) -> bool {
        self.nodes
            .get(handle)
            .is_some_and(|node| node.counter != REMOVED)
    }

    fn live_handles(&self) -> impl Iterator<Item = Handle> + '_ {
        std::iter::successors(self.head, |&handle| {
            self.nodes.get(handle).and_then(|node| node.next)
        })
    }

    fn link_back(&mut self, callback: C, counter: u64) -> Handle {
        let previous = self.tail;
        let handle = self
            .nodes
            .insert(Node::new(callback, counter, previous, None));
        match previous.and_then(|tail| self.nodes.get_mut(tail)) {
            Some(tail) => tail.next = Some(handle),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
        self.live += 1;
        handle
    }

    fn link_front(&mut self, callback: C, counter: u64) -> Handle {
        let next = self.head;
        let handle = self.nodes.insert(Node::new(callback, counter, None, next));
        match next.and_then(|head| self.nodes.get_mut(head)) {
            Some(head) => head.previous = Some(handle),
            None => self.tail = Some(handle),
        }
        self.head = Some(handle);
        self.live += 1;
        handle
    }

    /// Link a new node in front of `before`, which must be live.
    fn link_before(&mut self, callback: C, counter: u64, before: Handle) -> Handle {
        let previous = self.nodes.get(before).and_then(|node| node.previous);
        let handle = self
            .nodes
            .insert(Node::new(callback, counter, previous, Some(before)));
        if let Some(node) = self.nodes.get_mut(before) {
            node.previous = Some(handle);
        }
        match previous.and_then(|previous| self.nodes.get_mut(previous)) {
            Some(previous) => previous.next = Some(handle),
            None => self.head = Some(handle),
        }
        self.live += 1;
        handle
    }

    /// Take a live node out of the chain and return its callback.
    ///
    /// The caller must drop the callback after releasing the lock.
    fn unlink(&mut self, handle: Handle) -> Option<C> {
        let node = self
            .nodes
            .get_mut(handle)
            .filter(|node| node.counter != REMOVED)?;
        node.counter = REMOVED;
        let callback = node.callback.take();
        let (previous, next, pinned) = (node.previous, node.next, node.pins > 0);

        match previous.and_then(|previous| self.nodes.get_mut(previous)) {
            Some(previous) => previous.next = next,
            None => self.head = next,
        }
        match next.and_then(|next| self.nodes.get_mut(next)) {
            Some(next) => next.previous = previous,
            None => self.tail = previous,
        }

        for &tombstone in &self.tombstones {
            if let Some(node) = self.nodes.get_mut(tombstone) {
                if node.next == Some(handle) {
                    node.next = next;
                }
            }
        }

        if pinned {
            self.tombstones.push(handle);
        } else {
            self.nodes.remove(handle);
        }
        self.live -= 1;
        callback
    }

    /// Position a traversal on `handle`.
    ///
    /// Returns a clone of the callback if the traversal should call it.
    fn pin(&mut self, handle: Handle, snapshot: u64) -> Option<C>
    where
        C: Clone,
    {
        let node = self.nodes.get_mut(handle)?;
        node.pins += 1;
        if node.counter != REMOVED && node.counter <= snapshot {
            node.callback.clone()
        } else {
            None
        }
    }

    fn unpin(&mut self, handle: Handle) {
        let Some(node) = self.nodes.get_mut(handle) else {
            return;
        };
        node.pins = node.pins.saturating_sub(1);
        if node.pins == 0 && node.counter == REMOVED {
            self.nodes.remove(handle);
            if let Some(index) = self.tombstones.iter().position(|&t| t == handle) {
                self.tombstones.swap_remove(index);
            }
            tracing::trace!(target: targets::CALLBACK_LIST, ?handle, "released tombstone");
        }
    }

    fn restamp(&mut self) {
        for node in self.nodes.values_mut() {
            if node.counter != REMOVED {
                node.counter = 1;
            }
        }
    }
}

/// An ordered, thread-safe list of callbacks.
///
/// `C` is the stored callback type. It must be `Clone` for traversal, since
/// each callback is cloned out of the list before it is called so that no lock
/// is held while user code runs. `Arc`-based callbacks such as [`Listener`]
/// make that clone cheap. `C::clone` must not access the list itself.
///
/// `T` selects the [`Threading`] policy.
pub struct CallbackList<C, T: Threading = MultiThreaded> {
    links: PolicyMutex<T, Links<C>>,
    current_counter: T::Counter,
}

impl<C, T: Threading> CallbackList<C, T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            links: lock_api::Mutex::new(Links::new()),
            current_counter: <T::Counter as AtomicCounter>::new(0),
        }
    }

    /// Add a callback at the end of the list.
    pub fn append(&self, callback: C) -> Handle {
        let mut links = self.links.lock();
        let counter = self.stamp(&mut links);
        links.link_back(callback, counter)
    }

    /// Add a callback at the front of the list.
    pub fn prepend(&self, callback: C) -> Handle {
        let mut links = self.links.lock();
        let counter = self.stamp(&mut links);
        links.link_front(callback, counter)
    }

    /// Add a callback directly in front of `before`.
    ///
    /// If `before` does not name a live callback, the new callback is appended
    /// instead.
    pub fn insert(&self, callback: C, before: Handle) -> Handle {
        let mut links = self.links.lock();
        let counter = self.stamp(&mut links);
        if links.is_live(before) {
            links.link_before(callback, counter, before)
        } else {
            tracing::trace!(
                target: targets::CALLBACK_LIST,
                ?before,
                "insert anchor is not live; appending"
            );
            links.link_back(callback, counter)
        }
    }

    /// Remove a callback.
    ///
    /// Returns `false` if the handle does not name a live callback. The
    /// callback value is dropped after the list's lock has been released.
    pub fn remove(&self, handle: Handle) -> bool {
        let removed = self.links.lock().unlink(handle);
        removed.is_some()
    }

    /// Remove a callback, reporting a stale handle as an error.
    pub fn try_remove(&self, handle: Handle) -> Result<()> {
        if self.remove(handle) {
            Ok(())
        } else {
            Err(DispatchError::StaleHandle)
        }
    }

    /// Whether `handle` names a live callback in this list.
    pub fn contains(&self, handle: Handle) -> bool {
        self.links.lock().is_live(handle)
    }

    /// Number of live callbacks.
    pub fn len(&self) -> usize {
        self.links.lock().live
    }

    /// Whether the list has no live callbacks.
    pub fn is_empty(&self) -> bool {
        self.links.lock().head.is_none()
    }

    /// Remove every callback.
    pub fn clear(&self) {
        let removed: Vec<C> = {
            let mut links = self.links.lock();
            let handles: Vec<Handle> = links.live_handles().collect();
            handles
                .into_iter()
                .filter_map(|handle| links.unlink(handle))
                .collect()
        };
        drop(removed);
    }

    /// Draw the next insertion stamp. Must be called with the lock held.
    fn stamp(&self, links: &mut Links<C>) -> u64 {
        let counter = self.current_counter.increment();
        if counter != REMOVED {
            return counter;
        }
        // Wrapped: older entries must stay visible to traversals that start
        // after this point, so collapse them all to the lowest stamp.
        links.restamp();
        tracing::trace!(
            target: targets::CALLBACK_LIST,
            "insertion counter wrapped; restamped live callbacks"
        );
        self.current_counter.increment()
    }
}

impl<C: Clone, T: Threading> CallbackList<C, T> {
    /// Visit every callback present when the traversal starts.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(Handle, &C),
    {
        self.for_each_if(|handle, callback| {
            f(handle, callback);
            true
        });
    }

    /// Visit callbacks until `f` returns `false`.
    ///
    /// Returns `true` if every callback was visited.
    pub fn for_each_if<F>(&self, mut f: F) -> bool
    where
        F: FnMut(Handle, &C) -> bool,
    {
        let mut cursor = Cursor::new(self);
        while let Some((handle, callback)) = cursor.advance() {
            if let Some(callback) = callback {
                if !f(handle, &callback) {
                    return false;
                }
            }
        }
        true
    }

    /// Call every callback with `args`, in list order.
    pub fn invoke<Args: ?Sized>(&self, args: &Args)
    where
        C: Invoke<Args>,
    {
        self.for_each(|_, callback| callback.invoke(args));
    }

    /// Call callbacks with `args` while `can_continue` approves.
    ///
    /// `can_continue` is consulted after each call. Returns `true` if no call
    /// was vetoed.
    pub fn invoke_if<Args: ?Sized, P>(&self, args: &Args, mut can_continue: P) -> bool
    where
        C: Invoke<Args>,
        P: FnMut(&Args) -> bool,
    {
        self.for_each_if(|_, callback| {
            callback.invoke(args);
            can_continue(args)
        })
    }
}

impl<C, T: Threading> Default for CallbackList<C, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clone, T: Threading> Clone for CallbackList<C, T> {
    /// Copy the live callbacks, in order, into an independent list.
    ///
    /// Handles from the source list do not refer to entries of the copy.
    fn clone(&self) -> Self {
        let callbacks: Vec<C> = {
            let links = self.links.lock();
            links
                .live_handles()
                .filter_map(|handle| links.nodes.get(handle))
                .filter_map(|node| node.callback.clone())
                .collect()
        };
        let cloned = Self::new();
        {
            let mut links = cloned.links.lock();
            let counter = cloned.stamp(&mut links);
            for callback in callbacks {
                links.link_back(callback, counter);
            }
        }
        cloned
    }
}

impl<C, T: Threading> fmt::Debug for CallbackList<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackList")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

enum Position {
    Start,
    At(Handle),
    Done,
}

/// A traversal over the chain that holds the lock only while stepping.
struct Cursor<'a, C, T: Threading> {
    list: &'a CallbackList<C, T>,
    position: Position,
    snapshot: u64,
}

impl<'a, C: Clone, T: Threading> Cursor<'a, C, T> {
    fn new(list: &'a CallbackList<C, T>) -> Self {
        Self {
            list,
            position: Position::Start,
            snapshot: 0,
        }
    }

    /// Step to the next node, returning its callback if it should be called.
    fn advance(&mut self) -> Option<(Handle, Option<C>)> {
        let mut links = self.list.links.lock();
        let next = match self.position {
            Position::Start => {
                self.snapshot = self.list.current_counter.load();
                links.head
            }
            Position::At(current) => {
                let next = links.nodes.get(current).and_then(|node| node.next);
                links.unpin(current);
                next
            }
            Position::Done => return None,
        };
        match next {
            Some(handle) => {
                let callback = links.pin(handle, self.snapshot);
                self.position = Position::At(handle);
                Some((handle, callback))
            }
            None => {
                self.position = Position::Done;
                None
            }
        }
    }
}

impl<C, T: Threading> Drop for Cursor<'_, C, T> {
    fn drop(&mut self) {
        if let Position::At(handle) = self.position {
            self.list.links.lock().unpin(handle);
        }
    }
}

#[cfg(test)]
impl<C: Clone, T: Threading> CallbackList<C, T> {
    fn set_counter(&self, value: u64) {
        self.current_counter.store(value);
    }

    /// Nodes held by the arena, tombstones included.
    fn allocated_nodes(&self) -> usize {
        self.links.lock().nodes.len()
    }

    /// Check that the forward and backward chains agree and return the
    /// callbacks in order.
    fn verify_links(&self) -> Vec<C> {
        let links = self.links.lock();
        let forward: Vec<Handle> = links.live_handles().collect();
        let mut backward = Vec::new();
        let mut cursor = links.tail;
        while let Some(handle) = cursor {
            backward.push(handle);
            cursor = links.nodes[handle].previous;
        }
        backward.reverse();
        assert_eq!(forward, backward, "forward and backward walks disagree");
        assert_eq!(forward.len(), links.live, "live count out of sync");
        forward
            .into_iter()
            .map(|handle| {
                let node = &links.nodes[handle];
                assert_ne!(node.counter, REMOVED);
                node.callback.clone().expect("live node without callback")
            })
            .collect()
    }
}

static_assertions::assert_impl_all!(ListenerList<(i32, String)>: Send, Sync);
static_assertions::assert_impl_all!(Handle: Send, Sync, Copy);
static_assertions::assert_not_impl_any!(
    ListenerList<i32, crate::threading::SingleThreaded>: Sync
);
