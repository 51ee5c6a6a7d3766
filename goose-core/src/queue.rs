//! Thread-safe bounded FIFO used by strategies to hold recent candles.

use std::collections::VecDeque;
use std::sync::Mutex;

/// A fixed-capacity queue that evicts its oldest element when a new element
/// is added at capacity. Modeled after Guava's `EvictingQueue`.
pub struct EvictingQueue<T> {
    capacity: usize,
    inner: Mutex<VecDeque<T>>,
}

impl<T: Clone> EvictingQueue<T> {
    /// Create a queue holding at most `capacity` elements.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append an element, evicting the oldest survivor when at capacity.
    pub fn add(&self, element: T) {
        let mut queue = self.inner.lock().expect("queue mutex poisoned");
        if queue.len() == self.capacity {
            queue.pop_front();
        }
        queue.push_back(element);
    }

    /// Fetch the element at `index`, where position 0 is the oldest
    /// survivor. Out-of-range lookups report `None` rather than panicking.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        let queue = self.inner.lock().expect("queue mutex poisoned");
        queue.get(index).cloned()
    }

    /// Current number of elements held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_fills_up_to_capacity() {
        let queue = EvictingQueue::new(3);
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());

        queue.add("One");
        queue.add("Two");
        queue.add("Three");

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.get(0), Some("One"));
        assert_eq!(queue.get(1), Some("Two"));
        assert_eq!(queue.get(2), Some("Three"));
    }

    #[test]
    fn add_at_capacity_evicts_the_oldest() {
        let queue = EvictingQueue::new(3);

        queue.add("One");
        queue.add("Two");
        queue.add("Three");
        queue.add("Four");

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.get(0), Some("Two"));
        assert_eq!(queue.get(1), Some("Three"));
        assert_eq!(queue.get(2), Some("Four"));
    }

    #[test]
    fn get_out_of_range_is_none() {
        let queue = EvictingQueue::new(2);
        queue.add(1);

        assert_eq!(queue.get(1), None);
        assert_eq!(queue.get(7), None);
    }
}
