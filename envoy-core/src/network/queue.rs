// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Priority Queue
//!
//! Bounded multi-class FIFO. Lower class numbers drain first. Producers
//! spin with [`std::thread::yield_now`] while the queue is full instead of
//! being rejected; consumers block until an item or close.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::thread;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,
}

struct Classes<T> {
    classes: Vec<VecDeque<T>>,
    depth: usize,
    closed: bool,
}

pub struct PriorityQueue<T> {
    state: Mutex<Classes<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> PriorityQueue<T> {
    /// Creates a queue with `classes` priority classes holding at most
    /// `capacity` items in total.
    pub fn new(classes: usize, capacity: usize) -> Self {
        PriorityQueue {
            state: Mutex::new(Classes {
                classes: (0..classes.max(1)).map(|_| VecDeque::new()).collect(),
                depth: 0,
                closed: false,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueues `item` in `class`, waiting while the queue is full. Classes
    /// past the last one land in the last.
    pub fn push(&self, class: usize, item: T) -> Result<(), QueueError> {
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(QueueError::Closed);
                }
                if state.depth < self.capacity {
                    let last = state.classes.len() - 1;
                    state.classes[class.min(last)].push_back(item);
                    state.depth += 1;
                    self.available.notify_one();
                    return Ok(());
                }
            }
            thread::yield_now();
        }
    }

    /// Takes the next item, blocking while empty. `None` once the queue is
    /// closed and drained.
    pub fn pop(&self) -> Option<T> {
        self.pop_with_priority().map(|(_, item)| item)
    }

    /// Like [`pop`](Self::pop), also returning the item's class.
    pub fn pop_with_priority(&self) -> Option<(usize, T)> {
        let mut state = self.state.lock();
        loop {
            let next = state
                .classes
                .iter_mut()
                .enumerate()
                .find_map(|(class, items)| items.pop_front().map(|item| (class, item)));
            if let Some(found) = next {
                state.depth -= 1;
                return Some(found);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Removes every item of `class`.
    pub fn flush(&self, class: usize) -> Vec<T> {
        let mut state = self.state.lock();
        let Some(items) = state.classes.get_mut(class) else {
            return Vec::new();
        };
        let flushed: Vec<T> = items.drain(..).collect();
        state.depth -= flushed.len();
        flushed
    }

    /// Rejects further pushes and wakes blocked consumers. Items already
    /// queued can still be popped.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().depth
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_classes_drain_in_order() {
        let queue = PriorityQueue::new(3, 16);
        queue.push(2, "app-1").unwrap();
        queue.push(1, "control").unwrap();
        queue.push(2, "app-2").unwrap();
        queue.push(0, "close").unwrap();

        assert_eq!(queue.pop_with_priority(), Some((0, "close")));
        assert_eq!(queue.pop(), Some("control"));
        assert_eq!(queue.pop(), Some("app-1"));
        assert_eq!(queue.pop(), Some("app-2"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_out_of_range_class_goes_last() {
        let queue = PriorityQueue::new(2, 4);
        queue.push(9, 'b').unwrap();
        queue.push(0, 'a').unwrap();
        assert_eq!(queue.pop_with_priority(), Some((0, 'a')));
        assert_eq!(queue.pop_with_priority(), Some((1, 'b')));
    }

    #[test]
    fn test_flush_updates_depth() {
        let queue = PriorityQueue::new(3, 16);
        queue.push(2, 1).unwrap();
        queue.push(2, 2).unwrap();
        queue.push(1, 3).unwrap();

        assert_eq!(queue.flush(2), vec![1, 2]);
        assert_eq!(queue.len(), 1);
        assert!(queue.flush(7).is_empty());
    }

    #[test]
    fn test_push_waits_for_space() {
        let queue = Arc::new(PriorityQueue::new(1, 1));
        queue.push(0, 1).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(0, 2))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop(), Some(1));
        producer.join().unwrap().unwrap();
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn test_close_wakes_consumer_and_rejects_push() {
        let queue = Arc::new(PriorityQueue::<u8>::new(3, 4));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert_eq!(consumer.join().unwrap(), None);
        assert_eq!(queue.push(0, 1), Err(QueueError::Closed));
    }
}
