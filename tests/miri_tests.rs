//! Miri-targeted tests exercising the unsafe slot accesses.
//!
//! Run with: `cargo +nightly miri test --test miri_tests`
//!
//! Small capacities keep the interpreter fast while still covering slot
//! reuse across laps, moves out of `MaybeUninit` storage, clone-based
//! peeks, and the drop of unconsumed elements.

use lanempsc::{CompoundQueue, Lane};

#[test]
fn miri_lane_wrap_around() {
    let lane = Lane::new(4);

    for lap in 0..3u64 {
        for i in 0..4 {
            assert!(lane.offer(lap * 10 + i).is_ok(), "offer failed at lap {lap}");
        }
        let mut expected = (0..4).map(|i| lap * 10 + i);
        while let Some(v) = lane.poll() {
            assert_eq!(Some(v), expected.next());
        }
        assert!(expected.next().is_none());
    }
}

#[test]
fn miri_compound_offer_poll_strings() {
    let queue = CompoundQueue::with_parallelism(8, 2).unwrap();

    for i in 0..6 {
        assert!(queue.offer(format!("message-{i}")).is_ok());
    }

    let mut got = Vec::new();
    while let Some(s) = queue.poll() {
        got.push(s);
    }
    got.sort_unstable();
    assert_eq!(got.len(), 6);
    for (i, s) in got.iter().enumerate() {
        assert_eq!(s, &format!("message-{i}"));
    }
}

#[test]
fn miri_drop_with_unconsumed_items() {
    {
        let queue = CompoundQueue::with_parallelism(8, 2).unwrap();
        assert!(queue.offer(String::from("kept")).is_ok());
        assert!(queue.offer(String::from("also kept")).is_ok());
        assert!(queue.offer(String::from("polled")).is_ok());

        let _ = queue.poll();
        // Two strings drop with the queue; miri flags any leak or double
        // free in the lane's Drop loop.
    }
}

#[test]
fn miri_fill_and_drain() {
    let queue = CompoundQueue::with_parallelism(8, 2).unwrap();

    let mut next = 0u64;
    let filled = queue.fill(
        || {
            let v = next;
            next += 1;
            v
        },
        6,
    );
    assert_eq!(filled, 6);

    let mut sum = 0u64;
    let drained = queue.drain_all(|v| sum += v);
    assert_eq!(drained, 6);
    assert_eq!(sum, 15);
}

#[test]
fn miri_peek_clones_without_advancing() {
    let queue = CompoundQueue::with_parallelism(4, 1).unwrap();
    assert!(queue.offer(String::from("head")).is_ok());

    let peeked = queue.peek();
    assert_eq!(peeked.as_deref(), Some("head"));
    assert_eq!(queue.size(), 1);

    let polled = queue.poll();
    assert_eq!(polled.as_deref(), Some("head"));
    assert_eq!(queue.poll(), None);
}

#[test]
fn miri_relaxed_variants() {
    let lane = Lane::new(2);
    assert!(lane.relaxed_offer(String::from("a")).is_ok());
    assert!(lane.relaxed_offer(String::from("b")).is_ok());
    assert!(lane.relaxed_offer(String::from("c")).is_err());

    assert_eq!(lane.relaxed_peek().as_deref(), Some("a"));
    assert_eq!(lane.relaxed_poll().as_deref(), Some("a"));
    assert_eq!(lane.relaxed_poll().as_deref(), Some("b"));
    assert_eq!(lane.relaxed_poll(), None);
}
