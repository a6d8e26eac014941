/// Slots added whenever the queue runs out of room and cannot compact.
const GROW_CHUNK: usize = 64;

/// A FIFO of work a thread has already claimed.
///
/// Only the owning thread ever touches it, so it is a plain array with a
/// start and end index. Consumed slots at the front are reused either by
/// resetting both indices when the queue drains or by compacting in place
/// when the array fills up.
pub(crate) struct TaskQueue<T> {
    slots: Vec<Option<T>>,
    start: usize,
    end: usize,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new(), start: 0, end: 0 }
    }

    pub fn enqueue(&mut self, item: T) {
        self.check_invariants();
        if self.end == self.slots.len() {
            if self.start >= self.slots.len() / 4 && self.start > 0 {
                // Slots before `start` are all empty, so rotating moves them
                // behind the live range.
                self.slots[..self.end].rotate_left(self.start);
                self.end -= self.start;
                self.start = 0;
            }
            else {
                let len = self.slots.len() + GROW_CHUNK;
                self.slots.resize_with(len, || None);
            }
        }
        self.slots[self.end] = Some(item);
        self.end += 1;
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.check_invariants();
        if self.start == self.end {
            return None;
        }
        let item = self.slots[self.start].take();
        self.start += 1;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
        debug_assert!(item.is_some(), "live slot was empty");
        item
    }

    pub fn num(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    fn check_invariants(&self) {
        debug_assert!(self.start <= self.end && self.end <= self.slots.len());
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = TaskQueue::new();
        for i in 0..200 {
            queue.enqueue(i);
        }
        assert_eq!(queue.num(), 200);
        for i in 0..200 {
            assert_eq!(queue.dequeue(), Some(i));
        }
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.num(), 0);
    }

    #[test]
    fn test_drain_resets_indices() {
        let mut queue = TaskQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.dequeue();
        queue.dequeue();
        assert_eq!((queue.start, queue.end), (0, 0));
    }

    #[test]
    fn test_compacts_instead_of_growing() {
        let mut queue = TaskQueue::new();
        for i in 0..GROW_CHUNK {
            queue.enqueue(i);
        }
        for _ in 0..GROW_CHUNK / 2 {
            queue.dequeue();
        }
        queue.enqueue(GROW_CHUNK);
        assert_eq!(queue.slots.len(), GROW_CHUNK);
        assert_eq!(queue.num(), GROW_CHUNK / 2 + 1);
        assert!((GROW_CHUNK / 2..=GROW_CHUNK).eq(std::iter::from_fn(|| queue.dequeue())));
    }

    #[test]
    fn test_interleaved_use() {
        let mut queue = TaskQueue::new();
        let mut next_out = 0;
        for i in 0..1000 {
            queue.enqueue(i);
            if i % 3 == 0 {
                assert_eq!(queue.dequeue(), Some(next_out));
                next_out += 1;
            }
        }
        while let Some(v) = queue.dequeue() {
            assert_eq!(v, next_out);
            next_out += 1;
        }
        assert_eq!(next_out, 1000);
    }
}
