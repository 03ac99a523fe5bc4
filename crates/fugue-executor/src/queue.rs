//! Blocking request queue shared by the executor threads

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// FIFO monitor: producers enqueue, consumers block until a request arrives.
///
/// Urgent requests can jump the line with [`RequestQueue::enqueue_front`].
#[derive(Debug)]
pub struct RequestQueue<T> {
    queue: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Append a request and wake one consumer
    pub fn enqueue(&self, request: T) {
        self.queue.lock().push_back(request);
        self.not_empty.notify_one();
    }

    /// Put a request at the head of the queue and wake one consumer
    pub fn enqueue_front(&self, request: T) {
        self.queue.lock().push_front(request);
        self.not_empty.notify_one();
    }

    /// Take the oldest request, blocking while the queue is empty
    pub fn dequeue(&self) -> T {
        let mut queue = self.queue.lock();
        loop {
            if let Some(request) = queue.pop_front() {
                return request;
            }
            self.not_empty.wait(&mut queue);
        }
    }

    /// Like [`RequestQueue::dequeue`] but gives up after `timeout`
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        let mut queue = self.queue.lock();
        if let Some(request) = queue.pop_front() {
            return Some(request);
        }
        self.not_empty.wait_for(&mut queue, timeout);
        queue.pop_front()
    }

    /// Wake every blocked consumer so it re-checks the queue
    pub fn wake_up_all(&self) {
        self.not_empty.notify_all();
    }

    /// Number of queued requests
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drop every queued request
    pub fn clear(&self) -> Vec<T> {
        self.queue.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_and_front() {
        let q = RequestQueue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue_front(0);
        assert_eq!(q.len(), 3);
        assert_eq!(q.dequeue(), 0);
        assert_eq!(q.dequeue(), 1);
        assert_eq!(q.dequeue(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn test_dequeue_blocks_until_enqueue() {
        let q = Arc::new(RequestQueue::new());
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.dequeue())
        };
        thread::sleep(Duration::from_millis(20));
        q.enqueue("job");
        assert_eq!(consumer.join().unwrap(), "job");
    }

    #[test]
    fn test_dequeue_timeout() {
        let q: RequestQueue<u8> = RequestQueue::new();
        assert_eq!(q.dequeue_timeout(Duration::from_millis(5)), None);
        q.enqueue(9);
        assert_eq!(q.dequeue_timeout(Duration::from_millis(5)), Some(9));
    }
}
