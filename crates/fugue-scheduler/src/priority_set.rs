//! Per-core priority queues

use fugue_types::CoreId;
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};

/// One ordered queue per core element.
///
/// The head of each queue is the best action of that core; [`peek`] and
/// [`poll`] look at the best head across cores.
///
/// [`peek`]: PriorityActionSet::peek
/// [`poll`]: PriorityActionSet::poll
pub struct PriorityActionSet<T> {
    queues: BTreeMap<CoreId, VecDeque<T>>,
    order: fn(&T, &T) -> Ordering,
    len: usize,
}

impl<T> PriorityActionSet<T> {
    /// Create an empty set ordered by `order` (smallest first)
    pub fn new(order: fn(&T, &T) -> Ordering) -> Self {
        Self {
            queues: BTreeMap::new(),
            order,
            len: 0,
        }
    }

    /// Add an item to the queue of `core`
    pub fn offer(&mut self, core: CoreId, item: T) {
        let order = self.order;
        let queue = self.queues.entry(core).or_default();
        let at = queue.partition_point(|x| order(x, &item) != Ordering::Greater);
        queue.insert(at, item);
        self.len += 1;
    }

    fn best_core(&self) -> Option<CoreId> {
        let order = self.order;
        self.queues
            .iter()
            .filter_map(|(core, q)| q.front().map(|head| (*core, head)))
            .min_by(|a, b| order(a.1, b.1))
            .map(|(core, _)| core)
    }

    /// Best head across cores
    pub fn peek(&self) -> Option<&T> {
        let core = self.best_core()?;
        self.queues.get(&core).and_then(|q| q.front())
    }

    /// Head of every non-empty queue, best first
    pub fn peek_all(&self) -> Vec<&T> {
        let order = self.order;
        let mut heads: Vec<&T> = self.queues.values().filter_map(|q| q.front()).collect();
        heads.sort_by(|a, b| order(a, b));
        heads
    }

    /// Remove and return the best head across cores
    pub fn poll(&mut self) -> Option<T> {
        let core = self.best_core()?;
        self.remove_first(core)
    }

    /// Remove and return the head of one core's queue
    pub fn remove_first(&mut self, core: CoreId) -> Option<T> {
        let queue = self.queues.get_mut(&core)?;
        let item = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(&core);
        }
        if item.is_some() {
            self.len -= 1;
        }
        item
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drain every item, best heads first
    pub fn drain(&mut self) -> Vec<T> {
        let mut all = Vec::with_capacity(self.len);
        while let Some(item) = self.poll() {
            all.push(item);
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> PriorityActionSet<(i32, u64)> {
        // priority descending, then id ascending
        PriorityActionSet::new(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)))
    }

    #[test]
    fn test_poll_best_across_cores() {
        let mut s = set();
        s.offer(CoreId::new(1), (0, 1));
        s.offer(CoreId::new(1), (5, 4));
        s.offer(CoreId::new(2), (3, 2));

        assert_eq!(s.peek(), Some(&(5, 4)));
        assert_eq!(s.peek_all(), vec![&(5, 4), &(3, 2)]);
        assert_eq!(s.poll(), Some((5, 4)));
        assert_eq!(s.poll(), Some((3, 2)));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_remove_first_of_core() {
        let mut s = set();
        s.offer(CoreId::new(1), (0, 1));
        s.offer(CoreId::new(2), (0, 2));
        assert_eq!(s.remove_first(CoreId::new(2)), Some((0, 2)));
        assert_eq!(s.remove_first(CoreId::new(2)), None);
        assert_eq!(s.drain(), vec![(0, 1)]);
        assert!(s.is_empty());
    }
}
