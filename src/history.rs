//! Fixed-capacity, drop-oldest history buffers.

use std::collections::vec_deque::{self, VecDeque};

/// Default cap shared by timing, interval and latency histories.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// A ring that evicts its oldest entry once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    /// A zero capacity is bumped to one so a push is always observable.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `item`, returning the evicted entry if the history was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
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

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Oldest to newest.
    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.items.iter()
    }
}

impl<T> Default for BoundedHistory<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl BoundedHistory<f64> {
    pub fn mean(&self) -> Option<f64> {
        if self.items.is_empty() {
            return None;
        }
        Some(self.items.iter().sum::<f64>() / self.items.len() as f64)
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self
            .items
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / self.items.len() as f64;
        Some(variance.sqrt())
    }

    pub fn min(&self) -> Option<f64> {
        self.items.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.items.iter().copied().reduce(f64::max)
    }
}

impl<'a, T> IntoIterator for &'a BoundedHistory<T> {
    type Item = &'a T;
    type IntoIter = vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let mut history = BoundedHistory::new(3);
        assert_eq!(history.push(1), None);
        history.push(2);
        history.push(3);
        assert_eq!(history.push(4), Some(1));
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn statistics_over_floats() {
        let mut history = BoundedHistory::new(10);
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            history.push(v);
        }
        assert_eq!(history.mean(), Some(5.0));
        assert_eq!(history.std_dev(), Some(2.0));
        assert_eq!(history.min(), Some(2.0));
        assert_eq!(history.max(), Some(9.0));
    }

    #[test]
    fn empty_history_has_no_statistics() {
        let history: BoundedHistory<f64> = BoundedHistory::default();
        assert_eq!(history.capacity(), DEFAULT_HISTORY_CAPACITY);
        assert!(history.mean().is_none());
        assert!(history.std_dev().is_none());
    }
}
