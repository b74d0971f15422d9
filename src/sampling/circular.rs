use std::collections::VecDeque;

/// Fixed-capacity history of samples, newest first.
///
/// Index 0 is always the most recent sample. Pushing beyond capacity
/// evicts the oldest sample. The capacity never changes after construction.
#[derive(Debug, Clone)]
pub struct CircularBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> CircularBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one when full
    pub fn push(&mut self, value: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_back();
        }
        self.items.push_front(value);
    }

    /// Sample `index` positions back from the newest (0 = newest)
    pub fn get(&self, index: usize) -> Option<T> {
        self.items.get(index).copied()
    }

    /// Number of valid samples held
    #[inline]
    pub fn count(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate newest to oldest
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.items.iter().copied()
    }
}

impl<T: Copy + PartialOrd> CircularBuffer<T> {
    /// Largest sample held, used by consumers to scale graphs
    pub fn max(&self) -> Option<T> {
        self.items
            .iter()
            .copied()
            .fold(None, |acc, v| match acc {
                Some(m) if m >= v => Some(m),
                _ => Some(v),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_first() {
        let mut buf = CircularBuffer::new(4);
        buf.push(1u64);
        buf.push(2);
        buf.push(3);
        assert_eq!(buf.count(), 3);
        assert_eq!(buf.get(0), Some(3));
        assert_eq!(buf.get(2), Some(1));
        assert_eq!(buf.get(3), None);
    }

    #[test]
    fn test_overwrites_oldest() {
        let capacity = 5;
        let extra = 3;
        let mut buf = CircularBuffer::new(capacity);
        for x in 0..(capacity + extra) as u64 {
            buf.push(x);
        }
        assert_eq!(buf.count(), capacity);
        assert_eq!(buf.capacity(), capacity);
        assert_eq!(buf.get(0), Some((capacity + extra - 1) as u64));
        assert_eq!(buf.get(capacity - 1), Some(extra as u64));
        assert_eq!(buf.get(capacity), None);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut buf = CircularBuffer::new(0);
        buf.push(1.5f32);
        assert!(buf.is_empty());
        assert_eq!(buf.get(0), None);
    }

    #[test]
    fn test_iter_and_max() {
        let mut buf = CircularBuffer::new(3);
        for v in [0.25f32, 0.75, 0.5] {
            buf.push(v);
        }
        let values: Vec<f32> = buf.iter().collect();
        assert_eq!(values, vec![0.5, 0.75, 0.25]);
        assert_eq!(buf.max(), Some(0.75));
    }
}
