//! Fixed-capacity history of recent events.

use std::collections::VecDeque;

/// Circular buffer with overwrite-on-full semantics. `push` is O(1);
/// `snapshot` returns items oldest to newest.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// Creates a buffer holding at most `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends an item, evicting the oldest when full.
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// All retained items, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn preserves_insertion_order_below_capacity() {
        let mut ring = RingBuffer::new(4);
        for i in 0..3 {
            ring.push(i);
        }
        assert_eq!(ring.snapshot(), vec![0, 1, 2]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn evicts_oldest_first_past_capacity() {
        let mut ring = RingBuffer::new(3);
        for i in 0..5 {
            ring.push(i);
        }
        assert_eq!(ring.snapshot(), vec![2, 3, 4]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut ring = RingBuffer::new(0);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.snapshot(), vec![2]);
    }

    proptest! {
        #[test]
        fn retains_last_cap_items_in_order(
            capacity in 1usize..16,
            items in proptest::collection::vec(any::<u32>(), 0..64),
        ) {
            let mut ring = RingBuffer::new(capacity);
            for &item in &items {
                ring.push(item);
            }
            let expected: Vec<u32> = items
                .iter()
                .skip(items.len().saturating_sub(capacity))
                .copied()
                .collect();
            prop_assert_eq!(ring.snapshot(), expected);
        }
    }
}
