//! Bounded, time-ordered buffers for chart series and live logs

use chrono::{DateTime, Utc};

use crate::models::MetricRecord;

/// Anything a window can order
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for MetricRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Fixed-capacity buffer kept ascending by timestamp.
///
/// `push` evicts from the oldest end once `capacity` is exceeded. `replace`
/// installs a fetched series as-is (sorted, sized by the query's own limit);
/// the capacity applies again from the next `push`.
#[derive(Debug, Clone)]
pub struct BoundedWindow<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T: Timestamped> BoundedWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Insert one record in timestamp order, then truncate the oldest.
    ///
    /// Equal timestamps keep arrival order.
    pub fn push(&mut self, item: T) {
        let ts = item.timestamp();
        let at = self.items.partition_point(|existing| existing.timestamp() <= ts);
        self.items.insert(at, item);

        if self.items.len() > self.capacity {
            let excess = self.items.len() - self.capacity;
            self.items.drain(..excess);
        }
    }

    pub fn replace(&mut self, mut items: Vec<T>) {
        items.sort_by_key(|item| item.timestamp());
        self.items = items;
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.last()
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
}

impl<T> IntoIterator for BoundedWindow<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Clone, PartialEq)]
    struct Point(i64, u32);

    impl Timestamped for Point {
        fn timestamp(&self) -> DateTime<Utc> {
            Utc.timestamp_opt(self.0, 0).unwrap()
        }
    }

    #[test]
    fn test_unsorted_arrivals_stay_ordered() {
        let mut window = BoundedWindow::new(500);
        // deterministic shuffle: 7 is coprime with 500
        for i in 0..500u32 {
            let ts = ((i as i64) * 7) % 500;
            window.push(Point(1_700_000_000 + ts, i));
        }
        assert_eq!(window.len(), 500);
        assert!(window
            .as_slice()
            .windows(2)
            .all(|pair| pair[0].timestamp() <= pair[1].timestamp()));
    }

    #[test]
    fn test_overflow_evicts_oldest_first() {
        let mut window = BoundedWindow::new(100);
        for i in 0..150u32 {
            window.push(Point(i as i64, i));
            assert!(window.len() <= 100);
        }
        assert_eq!(window.len(), 100);
        assert_eq!(window.as_slice().first(), Some(&Point(50, 50)));
        assert_eq!(window.latest(), Some(&Point(149, 149)));
    }

    #[test]
    fn test_late_record_older_than_window_is_dropped() {
        let mut window = BoundedWindow::new(3);
        for ts in [10, 11, 12] {
            window.push(Point(ts, 0));
        }
        window.push(Point(5, 1));
        let stamps: Vec<i64> = window.iter().map(|p| p.0).collect();
        assert_eq!(stamps, vec![10, 11, 12]);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let mut window = BoundedWindow::new(10);
        window.push(Point(1, 0));
        window.push(Point(1, 1));
        window.push(Point(0, 2));
        let tags: Vec<u32> = window.iter().map(|p| p.1).collect();
        assert_eq!(tags, vec![2, 0, 1]);
    }

    #[test]
    fn test_replace_sorts_then_push_bounds() {
        let mut window = BoundedWindow::new(2);
        window.replace(vec![Point(3, 0), Point(1, 0), Point(2, 0)]);
        assert_eq!(window.len(), 3);
        assert_eq!(window.as_slice()[0].0, 1);

        window.push(Point(4, 0));
        let stamps: Vec<i64> = window.iter().map(|p| p.0).collect();
        assert_eq!(stamps, vec![3, 4]);
    }
}
