// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Priority Queue Property Tests

use std::sync::Arc;
use std::thread;

use envoy_core::network::PriorityQueue;
use proptest::prelude::*;

proptest! {
    /// Pops drain class 0 before 1 before 2, FIFO within a class,
    /// whatever the push interleaving.
    #[test]
    fn prop_pop_order_follows_class_then_fifo(classes in prop::collection::vec(0usize..3, 0..64)) {
        let queue = PriorityQueue::new(3, 64);
        for (seq, class) in classes.iter().enumerate() {
            queue.push(*class, (*class, seq)).unwrap();
        }
        queue.close();

        let mut popped = Vec::new();
        while let Some((class, item)) = queue.pop_with_priority() {
            prop_assert_eq!(class, item.0);
            popped.push(item);
        }

        let mut expected: Vec<(usize, usize)> = classes.iter().copied().enumerate().map(|(s, c)| (c, s)).collect();
        expected.sort();
        prop_assert_eq!(popped, expected);
    }

    /// Depth accounting stays exact across pushes, flushes and pops.
    #[test]
    fn prop_len_tracks_contents(classes in prop::collection::vec(0usize..3, 1..32), flushed in 0usize..3) {
        let queue = PriorityQueue::new(3, 32);
        for class in &classes {
            queue.push(*class, *class).unwrap();
        }
        prop_assert_eq!(queue.len(), classes.len());

        let removed = queue.flush(flushed);
        prop_assert!(removed.iter().all(|c| *c == flushed));
        let remaining = classes.len() - removed.len();
        prop_assert_eq!(queue.len(), remaining);

        queue.close();
        let mut count = 0;
        while queue.pop().is_some() {
            count += 1;
        }
        prop_assert_eq!(count, remaining);
        prop_assert!(queue.is_empty());
    }
}

#[test]
fn test_concurrent_producers_under_backpressure() {
    let queue = Arc::new(PriorityQueue::new(3, 4));
    let producers: Vec<_> = (0..3)
        .map(|class| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    queue.push(class, (class, i)).unwrap();
                }
            })
        })
        .collect();

    let mut last_seen = [None::<usize>; 3];
    for _ in 0..300 {
        let (class, i) = queue.pop().unwrap();
        // FIFO per producer
        if let Some(previous) = last_seen[class] {
            assert!(i > previous);
        }
        last_seen[class] = Some(i);
    }
    for producer in producers {
        producer.join().unwrap();
    }
    assert!(queue.is_empty());
}
