use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub depth: usize,
    pub peak_depth: usize,
    pub total_enqueued: u64,
}

/// Unbounded FIFO that keeps depth statistics.
///
/// Used for compressed chunks waiting to be parsed and for decoded frames
/// waiting for the consumer. Both live on the decode thread, so no locking.
#[derive(Debug)]
pub struct FifoQueue<T> {
    items: VecDeque<T>,
    peak_depth: usize,
    total_enqueued: u64,
}

impl<T> Default for FifoQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FifoQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            peak_depth: 0,
            total_enqueued: 0,
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
        self.total_enqueued += 1;
        self.peak_depth = self.peak_depth.max(self.items.len());
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.items.len(),
            peak_depth: self.peak_depth,
            total_enqueued: self.total_enqueued,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_stats_track_depth_and_peak() {
        let mut queue = FifoQueue::new();
        queue.push(1usize);
        queue.push(2);
        let stats = queue.stats();
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.peak_depth, 2);

        assert_eq!(queue.pop(), Some(1));
        let stats_after = queue.stats();
        assert_eq!(stats_after.depth, 1);
        assert_eq!(stats_after.peak_depth, 2);
        assert_eq!(stats_after.total_enqueued, 2);
    }

    #[test]
    fn clear_reports_discarded_items() {
        let mut queue = FifoQueue::new();
        queue.push("a");
        queue.push("b");
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.stats().peak_depth, 2);
    }
}
