use std::hint;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use tracing::trace;

use crate::config::GraphConfig;
use crate::graph::TaskGraph;
use crate::incoming::IncomingQueue;
use crate::named::{NamedThread, QueueIndex, ThreadIndex, ThreadTarget};
use crate::queue::TaskQueue;
use crate::sync::{lock, Mutex};
use crate::task::TaskRef;

/// One queue of a task thread.
struct ThreadQueue {
    /// Work the owner already claimed. Only the owning thread locks this, so
    /// the lock is never contended.
    private: Mutex<TaskQueue<TaskRef>>,
    incoming: IncomingQueue<TaskRef>,
    quit_requested: AtomicBool,
    /// Depth of `process_tasks` calls; anything above one is a bug.
    processing: AtomicUsize,
}

impl ThreadQueue {
    fn new() -> Self {
        Self {
            private: Mutex::new(TaskQueue::new()),
            incoming: IncomingQueue::new(),
            quit_requested: AtomicBool::new(false),
            processing: AtomicUsize::new(0),
        }
    }
}

/// Marks a queue as being processed for as long as it lives.
struct ProcessingGuard<'a>(&'a AtomicUsize);

impl<'a> ProcessingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let prev = counter.fetch_add(1, Ordering::AcqRel);
        debug_assert_eq!(prev, 0, "task queue processed re-entrantly");
        Self(counter)
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The scheduler's view of one thread.
///
/// Named threads own a main and a local queue and never give work away.
/// Unnamed workers own a single queue whose incoming side doubles as the
/// pool other workers steal from.
pub(crate) struct TaskThread {
    index: ThreadIndex,
    queues: Vec<ThreadQueue>,
    /// Best-effort hint that this worker found nothing to do and is about
    /// to stall. Read without synchronisation by thieves and dispatchers.
    stall_hint: CachePadded<AtomicBool>,
}

impl TaskThread {
    pub fn new(index: ThreadIndex) -> Self {
        let count = if index.is_named() { QueueIndex::COUNT } else { 1 };
        Self {
            index,
            queues: (0..count).map(|_| ThreadQueue::new()).collect(),
            stall_hint: CachePadded::new(AtomicBool::new(false)),
        }
    }

    pub fn index(&self) -> ThreadIndex {
        self.index
    }

    pub fn accepts_steals(&self) -> bool {
        !self.index.is_named()
    }

    fn queue(&self, queue: QueueIndex) -> &ThreadQueue {
        match self.queues.get(queue.as_usize()) {
            Some(q) => q,
            None => panic!("worker threads only have a main queue"),
        }
    }

    /// Queues `task` from the owning thread itself, bypassing the incoming
    /// list. Preserves submission order.
    pub fn enqueue_from_this_thread(&self, queue: QueueIndex, task: TaskRef) {
        debug_assert!(self.index.is_named(), "workers are only fed through their incoming queue");
        lock(&self.queue(queue).private).enqueue(task);
    }

    /// Queues `task` from any other thread, waking the owner if it stalled.
    pub fn enqueue_from_other_thread(&self, queue: QueueIndex, task: TaskRef) {
        self.queue(queue).incoming.push_and_wake(task);
    }

    /// Takes one not-yet-claimed task on behalf of another worker.
    pub fn request_steal(&self) -> Option<TaskRef> {
        debug_assert!(self.accepts_steals());
        self.queue(QueueIndex::Main).incoming.pop()
    }

    pub fn request_quit(&self, queue: QueueIndex) {
        let q = self.queue(queue);
        q.quit_requested.store(true, Ordering::Release);
        q.incoming.restart().trigger();
    }

    pub fn is_processing_tasks(&self, queue: QueueIndex) -> bool {
        self.queue(queue).processing.load(Ordering::Acquire) > 0
    }

    pub fn is_stalling(&self) -> bool {
        self.stall_hint.load(Ordering::Relaxed)
    }

    /// Runs tasks, stalling while idle, until a quit is requested. A quit
    /// requested before the call returns at once.
    pub fn process_tasks_until_quit(&self, queue: QueueIndex, graph: &TaskGraph) {
        let q = self.queue(queue);
        while !q.quit_requested.load(Ordering::Acquire) {
            self.process_tasks(queue, true, graph);
        }
    }

    /// Like [`process_tasks_until_quit`](Self::process_tasks_until_quit), but
    /// forgets a quit left over from an earlier return of a named thread.
    pub fn process_tasks_until_request_return(&self, queue: QueueIndex, graph: &TaskGraph) {
        self.queue(queue).quit_requested.store(false, Ordering::Release);
        self.process_tasks_until_quit(queue, graph);
    }

    /// Runs tasks until none are left, without stalling.
    pub fn process_tasks_until_idle(&self, queue: QueueIndex, graph: &TaskGraph) {
        self.queue(queue).quit_requested.store(false, Ordering::Release);
        self.process_tasks(queue, false, graph);
    }

    fn process_tasks(&self, queue: QueueIndex, allow_stall: bool, graph: &TaskGraph) {
        let q = self.queue(queue);
        let _guard = ProcessingGuard::enter(&q.processing);
        match NamedThread::from_index(self.index) {
            Some(thread) => self.process_named(q, ThreadTarget::Named(thread, queue), allow_stall, graph.config()),
            None => self.process_worker(q, allow_stall, graph),
        }
    }

    fn process_named(&self, q: &ThreadQueue, current: ThreadTarget, allow_stall: bool, cfg: &GraphConfig) {
        let mut idle_polls = 0;
        while !q.quit_requested.load(Ordering::Acquire) {
            if let Some(task) = Self::claim_named(q) {
                idle_polls = 0;
                task.execute(current);
                continue;
            }
            if !allow_stall {
                break;
            }
            if idle_polls < cfg.spin_count {
                idle_pause(idle_polls, cfg);
                idle_polls += 1;
                continue;
            }
            idle_polls = 0;
            self.stall(q);
        }
    }

    /// Next task for a named thread: the private queue first, refilled from
    /// the incoming list in one go when it runs dry.
    fn claim_named(q: &ThreadQueue) -> Option<TaskRef> {
        let mut private = lock(&q.private);
        if let Some(task) = private.dequeue() {
            return Some(task);
        }
        let drained = q.incoming.drain_into(|task| private.enqueue(task));
        if drained > 0 {
            trace!(drained, queued = private.num(), "claimed incoming tasks");
        }
        private.dequeue()
    }

    fn process_worker(&self, q: &ThreadQueue, allow_stall: bool, graph: &TaskGraph) {
        let cfg = graph.config();
        let mut idle_polls = 0;
        while !q.quit_requested.load(Ordering::Acquire) {
            let task = q.incoming.pop().or_else(|| graph.find_work(self.index));
            if let Some(task) = task {
                idle_polls = 0;
                self.stall_hint.store(false, Ordering::Relaxed);
                task.execute(ThreadTarget::AnyThread);
                continue;
            }
            if idle_polls == cfg.spin_count / 2 && !self.stall_hint.swap(true, Ordering::Relaxed) {
                graph.note_idle_worker(self.index);
            }
            if idle_polls < cfg.spin_count {
                idle_pause(idle_polls, cfg);
                idle_polls += 1;
                continue;
            }
            if !allow_stall {
                break;
            }
            idle_polls = 0;
            self.stall(q);
        }
        self.stall_hint.store(false, Ordering::Relaxed);
    }

    /// Blocks on the restart signal if the incoming list can be closed while
    /// empty. A push racing with the close keeps the thread running instead.
    fn stall(&self, q: &ThreadQueue) {
        if q.incoming.try_close() {
            if !q.quit_requested.load(Ordering::Acquire) {
                trace!(thread = self.index.0, "stalling");
                q.incoming.restart().wait();
                trace!(thread = self.index.0, "restarted");
            }
            q.incoming.reopen();
        }
        // Cleared so the next idle spell announces itself to dispatchers again.
        self.stall_hint.store(false, Ordering::Relaxed);
    }
}

fn idle_pause(poll: usize, cfg: &GraphConfig) {
    if poll < cfg.yield_after {
        for _ in 0..1 << poll.min(6) {
            hint::spin_loop();
        }
    }
    else {
        std::thread::yield_now();
    }
}
