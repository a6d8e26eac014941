use std::sync::atomic::{self, AtomicBool, Ordering};

use crossbeam_queue::SegQueue;
use crossbeam_utils::CachePadded;

use crate::sync::Event;

/// The cross-thread entry point of one thread queue.
///
/// Any thread may push. The owner closes the queue right before it stalls;
/// the first push that finds the queue closed reopens it and reports so, and
/// the pusher is then responsible for triggering [`restart`](Self::restart).
/// Both sides order their write against the other side's read with a
/// sequentially consistent fence, so either the owner sees the new item or
/// the pusher sees the closed flag.
pub(crate) struct IncomingQueue<T> {
    items: SegQueue<T>,
    closed: CachePadded<AtomicBool>,
    restart: Event,
}

impl<T> IncomingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: SegQueue::new(),
            closed: CachePadded::new(AtomicBool::new(false)),
            restart: Event::new(),
        }
    }

    /// Pushes `item`. Returns true when this push reopened a closed queue.
    pub fn push(&self, item: T) -> bool {
        self.items.push(item);
        atomic::fence(Ordering::SeqCst);
        self.closed.load(Ordering::Relaxed) && self.closed.swap(false, Ordering::AcqRel)
    }

    /// Pushes `item` and wakes the owner if it had stalled.
    pub fn push_and_wake(&self, item: T) {
        if self.push(item) {
            self.restart.trigger();
        }
    }

    pub fn pop(&self) -> Option<T> {
        self.items.pop()
    }

    /// Moves everything currently queued out, oldest first.
    pub fn drain_into(&self, mut sink: impl FnMut(T)) -> usize {
        let mut count = 0;
        while let Some(item) = self.items.pop() {
            sink(item);
            count += 1;
        }
        count
    }

    /// Closes the queue if it is empty. Returns false if work slipped in, in
    /// which case the queue is left open.
    pub fn try_close(&self) -> bool {
        self.closed.store(true, Ordering::Relaxed);
        atomic::fence(Ordering::SeqCst);
        if self.items.is_empty() {
            return true;
        }
        // Either we undo our own close, or a pusher already reopened it and
        // left a trigger behind; a stale trigger only causes one spurious wake.
        self.closed.store(false, Ordering::Relaxed);
        false
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn restart(&self) -> &Event {
        &self.restart
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl<T> Default for IncomingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_close_only_when_empty() {
        let queue = IncomingQueue::new();
        queue.push(1);
        assert!(!queue.try_close());
        assert!(!queue.is_closed());
        assert_eq!(queue.pop(), Some(1));
        assert!(queue.try_close());
        assert!(queue.is_closed());
    }

    #[test]
    fn test_push_reports_reopen_once() {
        let queue = IncomingQueue::new();
        assert!(queue.try_close());
        assert!(queue.push(1));
        assert!(!queue.push(2));
        assert!(!queue.is_closed());
    }

    #[test]
    fn test_drain_keeps_order() {
        let queue = IncomingQueue::new();
        for i in 0..10 {
            queue.push(i);
        }
        let mut out = Vec::new();
        assert_eq!(queue.drain_into(|i| out.push(i)), 10);
        assert!(out.into_iter().eq(0..10));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_stalled_owner_is_woken() {
        let queue = Arc::new(IncomingQueue::new());
        assert!(queue.try_close());

        let pusher = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.push_and_wake(7))
        };

        assert!(queue.restart().wait_timeout(Duration::from_secs(10)));
        assert_eq!(queue.pop(), Some(7));
        pusher.join().unwrap();
    }
}
