//! Policies configuring dispatchers and queues.
//!
//! An [`EventDispatcher`](crate::EventDispatcher) is assembled at compile time
//! from a [`Policies`] bundle and a [`KeyExtractor`]:
//!
//! - **Threading** picks the lock, counter and condition variable
//!   ([`MultiThreaded`] or [`SingleThreaded`](crate::threading::SingleThreaded)).
//! - **Argument passing** decides whether the event key travels inside the
//!   argument value ([`IncludeKey`]), separately ([`ExcludeKey`]), or
//!   either way ([`AutoDetect`]). Calling an entry point the mode does not
//!   allow is a compile error.
//! - **Map** picks the key-to-listeners container: [`Policy`] uses a
//!   `HashMap`, [`OrderedPolicy`] a `BTreeMap`.
//!
//! The key extractor derives the key from the arguments for the
//! key-included entry points. [`FirstArgument`] reads the first element of a
//! tuple; any `Fn(&Args) -> K` closure works too.
//!
//! ```
//! use horizon_lattice_dispatch::policy::{ExcludeKey, Policy};
//! use horizon_lattice_dispatch::threading::SingleThreaded;
//! use horizon_lattice_dispatch::EventDispatcher;
//!
//! type Local = Policy<SingleThreaded, ExcludeKey>;
//! let dispatcher: EventDispatcher<&'static str, String, Local> = EventDispatcher::new();
//! dispatcher.append_listener("greet", |name: &String| assert_eq!(name, "lattice"));
//! dispatcher.dispatch_to("greet", "lattice".to_string());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::callback_list::ListenerList;
use crate::threading::{MultiThreaded, Threading};

/// How the event key reaches a dispatcher.
pub trait ArgumentPassing: 'static {}

/// Argument passing modes that allow `dispatch(args)` with the key derived
/// from the arguments.
pub trait IncludesKey: ArgumentPassing {}

/// Argument passing modes that allow `dispatch_to(key, args)`.
pub trait ExcludesKey: ArgumentPassing {}

/// Both entry points are available.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDetect;

/// Only the key-derived entry points are available.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeKey;

/// Only the explicit-key entry points are available.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExcludeKey;

impl ArgumentPassing for AutoDetect {}
impl IncludesKey for AutoDetect {}
impl ExcludesKey for AutoDetect {}

impl ArgumentPassing for IncludeKey {}
impl IncludesKey for IncludeKey {}

impl ArgumentPassing for ExcludeKey {}
impl ExcludesKey for ExcludeKey {}

/// Derives the event key from an argument value.
pub trait KeyExtractor<K, Args> {
    /// Return the key `args` should be dispatched under.
    fn event_key(&self, args: &Args) -> K;
}

/// Uses the first element of a tuple argument as the key.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstArgument;

macro_rules! first_argument_tuple {
    ($($rest:ident),*) => {
        impl<K: Clone, $($rest),*> KeyExtractor<K, (K, $($rest,)*)> for FirstArgument {
            fn event_key(&self, args: &(K, $($rest,)*)) -> K {
                args.0.clone()
            }
        }
    };
}

first_argument_tuple!();
first_argument_tuple!(A);
first_argument_tuple!(A, B);
first_argument_tuple!(A, B, C);
first_argument_tuple!(A, B, C, D);
first_argument_tuple!(A, B, C, D, E);

impl<K, Args, F> KeyExtractor<K, Args> for F
where
    F: Fn(&Args) -> K,
{
    fn event_key(&self, args: &Args) -> K {
        self(args)
    }
}

/// The key-to-listeners container a dispatcher stores.
pub trait ListenerMap<K, V>: Default {
    /// Look up the entry for `key`.
    fn get(&self, key: &K) -> Option<&V>;
    /// Look up the entry for `key`, creating it with `make` if missing.
    fn get_or_insert_with<F: FnOnce() -> V>(&mut self, key: K, make: F) -> &mut V;
    /// Insert or replace an entry.
    fn insert(&mut self, key: K, value: V);
    /// Number of keys.
    fn len(&self) -> usize;
    /// Whether there are no keys.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Visit every entry.
    fn for_each_entry<F: FnMut(&K, &V)>(&self, f: F);
}

impl<K: Hash + Eq, V, S: BuildHasher + Default> ListenerMap<K, V> for HashMap<K, V, S> {
    fn get(&self, key: &K) -> Option<&V> {
        HashMap::get(self, key)
    }

    fn get_or_insert_with<F: FnOnce() -> V>(&mut self, key: K, make: F) -> &mut V {
        self.entry(key).or_insert_with(make)
    }

    fn insert(&mut self, key: K, value: V) {
        HashMap::insert(self, key, value);
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn for_each_entry<F: FnMut(&K, &V)>(&self, mut f: F) {
        for (key, value) in self {
            f(key, value);
        }
    }
}

impl<K: Ord, V> ListenerMap<K, V> for BTreeMap<K, V> {
    fn get(&self, key: &K) -> Option<&V> {
        BTreeMap::get(self, key)
    }

    fn get_or_insert_with<F: FnOnce() -> V>(&mut self, key: K, make: F) -> &mut V {
        self.entry(key).or_insert_with(make)
    }

    fn insert(&mut self, key: K, value: V) {
        BTreeMap::insert(self, key, value);
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    fn for_each_entry<F: FnMut(&K, &V)>(&self, mut f: F) {
        for (key, value) in self {
            f(key, value);
        }
    }
}

/// A complete policy bundle for events keyed by `K` carrying `Args`.
pub trait Policies<K, Args>: 'static {
    /// Threading policy shared by the map, every listener list and the queue.
    type Threading: Threading;
    /// Which dispatch and enqueue entry points exist.
    type ArgumentPassing: ArgumentPassing;
    /// Container mapping keys to listener lists.
    type Map: ListenerMap<K, Arc<ListenerList<Args, Self::Threading>>>;
}

/// Hash-map backed policies. Keys must be `Hash + Eq`.
pub struct Policy<T = MultiThreaded, A = AutoDetect>(PhantomData<fn() -> (T, A)>);

/// Ordered-map backed policies. Keys must be `Ord`.
pub struct OrderedPolicy<T = MultiThreaded, A = AutoDetect>(PhantomData<fn() -> (T, A)>);

/// The policies used when none are specified.
pub type DefaultPolicies = Policy;

impl<K, Args, T, A> Policies<K, Args> for Policy<T, A>
where
    K: Hash + Eq,
    Args: 'static,
    T: Threading,
    A: ArgumentPassing,
{
    type Threading = T;
    type ArgumentPassing = A;
    type Map = HashMap<K, Arc<ListenerList<Args, T>>>;
}

impl<K, Args, T, A> Policies<K, Args> for OrderedPolicy<T, A>
where
    K: Ord,
    Args: 'static,
    T: Threading,
    A: ArgumentPassing,
{
    type Threading = T;
    type ArgumentPassing = A;
    type Map = BTreeMap<K, Arc<ListenerList<Args, T>>>;
}
