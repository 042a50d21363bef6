//! Integration tests for scoped, counting and conditional listener removal.

use horizon_lattice_dispatch::{
    EventDispatcher, EventQueue, ListenerList, ScopedRemover, conditional_remover,
    counter_remover,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn counting<Args: 'static>(calls: &Arc<AtomicUsize>) -> impl Fn(&Args) + Send + Sync + 'static {
    let calls = Arc::clone(calls);
    move |_: &Args| {
        calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_scoped_remover_on_callback_list() {
    let list = ListenerList::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let scope = ScopedRemover::new(&list);
        scope.append_listener((), counting::<u32>(&calls));
        scope.append_listener((), counting::<u32>(&calls));
        list.invoke(&1u32);
    }
    list.invoke(&1u32);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(list.is_empty());
}

#[test]
fn test_scoped_remover_on_queue() {
    let queue = EventQueue::<u8, (u8, u32)>::new();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let scope = ScopedRemover::new(&queue);
        scope.append_listener(1, counting::<(u8, u32)>(&calls));
        queue.enqueue((1, 0));
        queue.process();
        queue.enqueue((1, 0));
    }
    queue.process();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_counter_remover_mixed_with_plain_listeners() {
    let dispatcher = Arc::new(EventDispatcher::<u8, (u8, u32)>::new());
    let plain = Arc::new(AtomicUsize::new(0));
    let limited = Arc::new(AtomicUsize::new(0));

    dispatcher.append_listener(3, counting::<(u8, u32)>(&plain));
    counter_remover(&dispatcher).append_listener(3, counting::<(u8, u32)>(&limited), 2);

    for _ in 0..4 {
        dispatcher.dispatch((3, 0));
    }
    assert_eq!(plain.load(Ordering::SeqCst), 4);
    assert_eq!(limited.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.listener_count(&3), 1);
}

#[test]
fn test_counter_remover_reentrant_dispatch() {
    let dispatcher = Arc::new(EventDispatcher::<u8, (u8, u32)>::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let weak = Arc::downgrade(&dispatcher);
    let counted = Arc::clone(&calls);
    counter_remover(&dispatcher).append_listener(
        1,
        move |args: &(u8, u32)| {
            counted.fetch_add(1, Ordering::SeqCst);
            if args.1 < 5 {
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.dispatch((1, args.1 + 1));
                }
            }
        },
        3,
    );

    dispatcher.dispatch((1, 0));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(!dispatcher.has_listeners(&1));
}

#[test]
fn test_conditional_remover_on_queue() {
    let queue = Arc::new(EventQueue::<&'static str, (&'static str, i32)>::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    conditional_remover(&queue).append_listener(
        "temperature",
        move |args: &(&'static str, i32)| sink.lock().push(args.1),
        |args: &(&'static str, i32)| args.1 >= 100,
    );

    for reading in [20, 60, 100, 120] {
        queue.enqueue(("temperature", reading));
    }
    queue.process();

    assert_eq!(*seen.lock(), vec![20, 60, 100]);
    assert!(!queue.has_listeners(&"temperature"));
}
