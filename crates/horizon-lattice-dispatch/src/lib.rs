//! Event dispatch for Horizon Lattice.
//!
//! This crate provides the callback and event plumbing used across Horizon
//! Lattice:
//!
//! - **Callback lists**: Ordered callbacks that stay safe to add and remove
//!   while the list is being invoked, including from inside a callback
//! - **Event dispatcher**: Synchronous delivery of events to listeners
//!   registered per key, with argument filters
//! - **Event queue**: Deferred, thread-safe delivery with blocking waits
//! - **Removers**: Listeners that remove themselves on scope exit, after a
//!   number of calls or once a condition holds
//! - **Policies**: Compile-time choice of threading, key handling and map type
//!
//! # Callback List Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use horizon_lattice_dispatch::{listener, ListenerList};
//!
//! let list = ListenerList::<i32>::new();
//! let calls = Arc::new(AtomicUsize::new(0));
//!
//! let counter = Arc::clone(&calls);
//! let handle = list.append(listener(move |value: &i32| {
//!     counter.fetch_add(*value as usize, Ordering::SeqCst);
//! }));
//!
//! list.invoke(&2_i32);
//! assert!(list.remove(handle));
//! list.invoke(&2_i32);
//! assert_eq!(calls.load(Ordering::SeqCst), 2);
//! ```
//!
//! # Event Queue Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::thread;
//! use std::time::Duration;
//! use horizon_lattice_dispatch::{EventQueue, Policy, MultiThreaded};
//! use horizon_lattice_dispatch::policy::ExcludeKey;
//!
//! // Keys are passed next to the arguments instead of inside them.
//! type Queue = EventQueue<&'static str, String, Policy<MultiThreaded, ExcludeKey>>;
//!
//! let queue = Arc::new(Queue::new());
//! let greeted = Arc::new(AtomicBool::new(false));
//!
//! let flag = Arc::clone(&greeted);
//! queue.append_listener("greet", move |name: &String| {
//!     assert_eq!(name, "lattice");
//!     flag.store(true, Ordering::SeqCst);
//! });
//!
//! let producer = Arc::clone(&queue);
//! thread::spawn(move || producer.enqueue_to("greet", "lattice".to_string()));
//!
//! assert!(queue.wait_for(Duration::from_secs(5)));
//! queue.process();
//! assert!(greeted.load(Ordering::SeqCst));
//! ```

pub mod callback_list;
pub mod dispatcher;
mod error;
pub mod logging;
pub mod policy;
pub mod queue;
pub mod remover;
pub mod threading;

pub use callback_list::{CallbackList, Handle, Invoke, Listener, ListenerList, listener};
pub use dispatcher::{DispatcherConfig, EventDispatcher, Filter, FilterHandle};
pub use error::{DispatchError, Result};
pub use logging::PerfSpan;
pub use policy::{DefaultPolicies, FirstArgument, OrderedPolicy, Policies, Policy};
pub use queue::{DisableQueueNotify, EventQueue, EventQueueBuilder, QueueConfig, QueuedEvent};
pub use remover::{
    ConditionalRemover, CounterRemover, ListenerHost, ScopedRemover, conditional_remover,
    counter_remover,
};
pub use threading::{MultiThreaded, SingleThreaded, Threading};
