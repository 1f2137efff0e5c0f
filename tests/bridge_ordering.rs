//SPDX-License-Identifier: MPL-2.0
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use window_host::bridge::{self, Bridge, BridgeError, BridgeReceiver};

/// What the owner thread saw.
#[derive(Default)]
struct Observed {
    sequence: Vec<usize>,
    tickets: Vec<usize>,
    by_producer: Vec<Vec<usize>>,
    threads: Vec<ThreadId>,
}

fn spawn_owner<S: Send + 'static>(mut state: S, mut receiver: BridgeReceiver<S>) -> JoinHandle<S> {
    thread::Builder::new()
        .name("bridge_ordering owner".to_string())
        .spawn(move || {
            loop {
                receiver.drain(&mut state);
                if !receiver.wait(Duration::from_millis(2)) && receiver.is_orphaned() {
                    return state;
                }
            }
        })
        .unwrap()
}

const PRODUCERS: usize = 10;
const PER_PRODUCER: usize = 10;

#[test]
fn hundred_submissions_from_ten_producers_form_one_sequence() {
    let (bridge, receiver) = bridge::channel::<Observed>();
    let owner = spawn_owner(
        Observed {
            by_producer: vec![Vec::new(); PRODUCERS],
            ..Default::default()
        },
        receiver,
    );
    let counter = Arc::new(AtomicUsize::new(0));
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let bridge = bridge.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let counter = counter.clone();
                    bridge
                        .submit(format!("producer {p} request {i}"), move |o: &mut Observed| {
                            o.sequence.push(counter.fetch_add(1, Ordering::SeqCst));
                            o.by_producer[p].push(i);
                            o.threads.push(thread::current().id());
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    drop(bridge);
    let observed = owner.join().unwrap();

    assert_eq!(observed.sequence, (0..PRODUCERS * PER_PRODUCER).collect::<Vec<_>>());
    for per in &observed.by_producer {
        assert_eq!(*per, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
    let owner_thread = observed.threads[0];
    assert!(observed.threads.iter().all(|t| *t == owner_thread));
}

#[test]
fn execution_order_matches_enqueue_order_across_producers() {
    let (bridge, receiver) = bridge::channel::<Observed>();
    let owner = spawn_owner(Observed::default(), receiver);
    //taking a ticket and enqueueing happen together, so ticket order is enqueue order
    let ticket_lock = Arc::new(Mutex::new(0usize));
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let bridge = bridge.clone();
            let ticket_lock = ticket_lock.clone();
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut next = ticket_lock.lock().unwrap();
                    let ticket = *next;
                    *next += 1;
                    bridge
                        .post(format!("producer {p} post {i}"), move |o: &mut Observed| {
                            o.tickets.push(ticket)
                        })
                        .unwrap();
                    drop(next);
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    drop(bridge);
    let observed = owner.join().unwrap();
    assert_eq!(observed.tickets, (0..PRODUCERS * PER_PRODUCER).collect::<Vec<_>>());
}

#[test]
fn no_two_requests_ever_overlap() {
    let (bridge, receiver) = bridge::channel::<()>();
    let owner = spawn_owner((), receiver);
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let producers: Vec<_> = (0..8)
        .map(|p| {
            let bridge = bridge.clone();
            let busy = busy.clone();
            let overlaps = overlaps.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    let busy = busy.clone();
                    let overlaps = overlaps.clone();
                    bridge
                        .submit(format!("guarded {p}/{i}"), move |_| {
                            if busy.swap(true, Ordering::SeqCst) {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::sleep(Duration::from_micros(50));
                            busy.store(false, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    drop(bridge);
    owner.join().unwrap();
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn waiting_submitters_are_released_when_the_owner_goes_away() {
    let (bridge, receiver): (Bridge<()>, _) = bridge::channel();
    let waiters: Vec<_> = (0..4)
        .map(|i| {
            let bridge = bridge.clone();
            thread::spawn(move || bridge.submit(format!("stranded {i}"), |_| ()))
        })
        .collect();
    while bridge.pending() < 4 {
        thread::yield_now();
    }
    drop(receiver);
    for w in waiters {
        assert_eq!(w.join().unwrap(), Err(BridgeError::Closed));
    }
    assert_eq!(bridge.submit("after", |_| ()), Err(BridgeError::Closed));
}

#[test]
fn a_panicking_task_does_not_stop_later_ones() {
    let (bridge, receiver) = bridge::channel::<Vec<u8>>();
    let owner = spawn_owner(Vec::new(), receiver);
    bridge.post("first", |v: &mut Vec<u8>| v.push(1)).unwrap();
    bridge.post("explodes", |_: &mut Vec<u8>| panic!("posted panic")).unwrap();
    bridge.post("third", |v: &mut Vec<u8>| v.push(3)).unwrap();
    let seen = bridge.submit("read", |v: &mut Vec<u8>| v.clone()).unwrap();
    assert_eq!(seen, vec![1, 3]);
    drop(bridge);
    owner.join().unwrap();
}
