//! Integration tests for the event dispatcher.

use horizon_lattice_dispatch::policy::{ExcludeKey, IncludeKey};
use horizon_lattice_dispatch::{
    DispatchError, DispatcherConfig, EventDispatcher, MultiThreaded, OrderedPolicy, Policy,
    SingleThreaded,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Input {
    Press,
    Release,
    Scroll,
}

#[derive(Debug, Clone, PartialEq)]
struct InputEvent {
    kind: Input,
    x: i32,
    y: i32,
}

#[test]
fn test_routes_events_by_extracted_key() {
    let dispatcher = EventDispatcher::<Input, InputEvent, Policy, _>::with_extractor(
        |event: &InputEvent| event.kind,
    );
    let presses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&presses);
    dispatcher.append_listener(Input::Press, move |event: &InputEvent| {
        sink.lock().push((event.x, event.y));
    });

    dispatcher.dispatch(InputEvent { kind: Input::Press, x: 1, y: 2 });
    dispatcher.dispatch(InputEvent { kind: Input::Release, x: 3, y: 4 });
    dispatcher.dispatch(InputEvent { kind: Input::Press, x: 5, y: 6 });

    assert_eq!(*presses.lock(), vec![(1, 2), (5, 6)]);
    assert_eq!(
        dispatcher.event_key(&InputEvent { kind: Input::Scroll, x: 0, y: 0 }),
        Input::Scroll
    );
}

#[test]
fn test_dispatch_to_with_explicit_keys() {
    let dispatcher: EventDispatcher<String, i64, Policy<MultiThreaded, ExcludeKey>> =
        EventDispatcher::new();
    let total = Arc::new(AtomicI64::new(0));

    let add = Arc::clone(&total);
    dispatcher.append_listener("add".to_string(), move |value: &i64| {
        add.fetch_add(*value, Ordering::SeqCst);
    });
    let sub = Arc::clone(&total);
    dispatcher.append_listener("sub".to_string(), move |value: &i64| {
        sub.fetch_sub(*value, Ordering::SeqCst);
    });

    dispatcher.dispatch_to("add".to_string(), 10);
    dispatcher.dispatch_to("sub".to_string(), 3);
    dispatcher.dispatch_to("mul".to_string(), 100);
    assert_eq!(total.load(Ordering::SeqCst), 7);
}

#[test]
fn test_listener_can_remove_another_key_during_dispatch() {
    let dispatcher = Arc::new(EventDispatcher::<u8, (u8, u8)>::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let counted = Arc::clone(&calls);
    let victim = dispatcher.append_listener(2, move |_: &(u8, u8)| {
        counted.fetch_add(1, Ordering::SeqCst);
    });

    let weak = Arc::downgrade(&dispatcher);
    dispatcher.append_listener(1, move |_: &(u8, u8)| {
        if let Some(dispatcher) = weak.upgrade() {
            dispatcher.remove_listener(&2, victim);
            dispatcher.dispatch((2, 0));
        }
    });

    dispatcher.dispatch((2, 0));
    dispatcher.dispatch((1, 0));
    dispatcher.dispatch((2, 0));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_try_remove_listener_errors() {
    let dispatcher = EventDispatcher::<u8, (u8,)>::new();
    let handle = dispatcher.append_listener(1, |_: &(u8,)| {});

    assert_eq!(
        dispatcher.try_remove_listener(&9, handle),
        Err(DispatchError::UnknownEvent)
    );
    assert_eq!(dispatcher.try_remove_listener(&1, handle), Ok(()));
    assert_eq!(
        dispatcher.try_remove_listener(&1, handle),
        Err(DispatchError::StaleHandle)
    );
}

#[test]
fn test_filters_rewrite_and_drop_events() {
    let dispatcher = EventDispatcher::<u8, (u8, i32)>::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    dispatcher.append_listener(1, move |args: &(u8, i32)| sink.lock().push(args.1));

    let doubler = dispatcher.append_filter(|args: &mut (u8, i32)| {
        args.1 *= 2;
        true
    });
    dispatcher.append_filter(|args: &mut (u8, i32)| args.1 >= 0);

    dispatcher.dispatch((1, 3));
    dispatcher.dispatch((1, -1));
    assert!(dispatcher.remove_filter(doubler));
    dispatcher.dispatch((1, 3));

    assert_eq!(*seen.lock(), vec![6, 3]);
}

#[test]
fn test_can_continue_invoking_stops_propagation() {
    type Flagged = (u8, Arc<Mutex<bool>>);

    let config = DispatcherConfig::<Flagged>::new()
        .can_continue_invoking(|args: &Flagged| !*args.1.lock());
    let dispatcher = EventDispatcher::<u8, Flagged>::new().with_config(config);
    let calls = Arc::new(AtomicUsize::new(0));

    for stop in [false, true, false] {
        let counted = Arc::clone(&calls);
        dispatcher.append_listener(5, move |args: &Flagged| {
            counted.fetch_add(1, Ordering::SeqCst);
            if stop {
                *args.1.lock() = true;
            }
        });
    }

    dispatcher.dispatch((5, Arc::new(Mutex::new(false))));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(dispatcher.config().has_can_continue());
}

#[test]
fn test_include_key_policy_and_ordered_map() {
    type Named = (u16, &'static str);

    let dispatcher: EventDispatcher<u16, Named, OrderedPolicy<MultiThreaded, IncludeKey>> =
        EventDispatcher::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    for key in [30u16, 10, 20] {
        let sink = Arc::clone(&log);
        dispatcher.append_listener(key, move |args: &Named| {
            sink.lock().push(args.1);
        });
    }

    dispatcher.dispatch((20, "twenty"));
    dispatcher.dispatch((10, "ten"));
    assert_eq!(*log.lock(), vec!["twenty", "ten"]);
    assert_eq!(dispatcher.listener_count(&30), 1);
    assert!(!dispatcher.has_listeners(&40));
}

#[test]
fn test_single_threaded_dispatcher() {
    let dispatcher: EventDispatcher<u8, (u8, u32), Policy<SingleThreaded>> =
        EventDispatcher::new();
    let total = Arc::new(AtomicUsize::new(0));
    let sum = Arc::clone(&total);
    dispatcher.append_listener(1, move |args: &(u8, u32)| {
        sum.fetch_add(args.1 as usize, Ordering::SeqCst);
    });
    dispatcher.dispatch((1, 4));
    dispatcher.dispatch((1, 5));
    assert_eq!(total.load(Ordering::SeqCst), 9);
}

#[test]
fn test_concurrent_registration_and_dispatch() {
    let dispatcher = Arc::new(EventDispatcher::<u32, (u32,)>::new());
    let calls = Arc::new(AtomicUsize::new(0));

    thread::scope(|scope| {
        for key in 0..4u32 {
            let dispatcher = &dispatcher;
            let calls = &calls;
            scope.spawn(move || {
                for _ in 0..50 {
                    let counted = Arc::clone(calls);
                    let handle = dispatcher.append_listener(key, move |_: &(u32,)| {
                        counted.fetch_add(1, Ordering::SeqCst);
                    });
                    dispatcher.dispatch((key,));
                    assert!(dispatcher.remove_listener(&key, handle));
                }
            });
        }
    });

    assert_eq!(calls.load(Ordering::SeqCst), 200);
    for key in 0..4 {
        assert!(!dispatcher.has_listeners(&key));
    }
}
