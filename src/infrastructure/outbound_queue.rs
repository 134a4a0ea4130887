//! Outbound Queue
//!
//! Fixed-capacity FIFO of serialized payloads waiting for a backend.
//! When full, the oldest payload is evicted so producers never wait.

use bytes::Bytes;
use std::collections::VecDeque;

/// Bounded ring of payloads with drop-oldest eviction.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<Bytes>,
    capacity: usize,
    /// Number of evictions since creation
    overflows: u64,
}

impl OutboundQueue {
    /// Create an empty queue holding at most `capacity` payloads.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            overflows: 0,
        }
    }

    /// Append a payload, evicting the oldest one if the queue is full.
    ///
    /// Returns `true` when an eviction happened.
    pub fn push(&mut self, payload: Bytes) -> bool {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front();
            self.overflows += 1;
            true
        } else {
            false
        };
        self.items.push_back(payload);
        evicted
    }

    /// Remove and return the oldest payload.
    pub fn pop(&mut self) -> Option<Bytes> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Iterate over queued payloads, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn contents(q: &OutboundQueue) -> Vec<&[u8]> {
        q.iter().map(|b| b.as_ref()).collect()
    }

    #[test]
    fn test_new_queue_is_empty() {
        let q = OutboundQueue::new(3);
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
        assert_eq!(q.capacity(), 3);
        assert_eq!(q.overflows(), 0);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut q = OutboundQueue::new(0);
        assert_eq!(q.capacity(), 1);
        assert!(!q.push(Bytes::from_static(b"a")));
        assert!(q.push(Bytes::from_static(b"b")));
        assert_eq!(contents(&q), vec![&b"b"[..]]);
    }

    #[test]
    fn test_fifo_order() {
        let mut q = OutboundQueue::new(10);
        q.push(Bytes::from_static(b"first"));
        q.push(Bytes::from_static(b"second"));

        assert_eq!(q.pop().unwrap(), Bytes::from_static(b"first"));
        assert_eq!(q.pop().unwrap(), Bytes::from_static(b"second"));
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let mut q = OutboundQueue::new(3);
        let mut evictions = 0;
        for item in ["A", "B", "C", "D", "E"] {
            if q.push(Bytes::copy_from_slice(item.as_bytes())) {
                evictions += 1;
            }
        }

        assert_eq!(contents(&q), vec![&b"C"[..], &b"D"[..], &b"E"[..]]);
        assert_eq!(q.overflows(), 2);
        assert_eq!(evictions, 2);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_pop_makes_room_without_overflow() {
        let mut q = OutboundQueue::new(2);
        q.push(Bytes::from_static(b"a"));
        q.push(Bytes::from_static(b"b"));
        q.pop();
        assert!(!q.push(Bytes::from_static(b"c")));
        assert_eq!(q.overflows(), 0);
    }

    proptest! {
        #[test]
        fn prop_keeps_last_capacity_items(capacity in 1usize..32, n in 0usize..128) {
            let mut q = OutboundQueue::new(capacity);
            for i in 0..n {
                q.push(Bytes::from(i.to_string()));
            }

            let kept: Vec<String> = q
                .iter()
                .map(|b| String::from_utf8(b.to_vec()).unwrap())
                .collect();
            let expected: Vec<String> = (n.saturating_sub(capacity)..n)
                .map(|i| i.to_string())
                .collect();

            prop_assert!(q.len() <= capacity);
            prop_assert_eq!(kept, expected);
            prop_assert_eq!(q.overflows(), n.saturating_sub(capacity) as u64);
        }
    }
}
