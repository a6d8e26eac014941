use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use arc_swap::ArcSwapOption;
use crossbeam_queue::ArrayQueue;
use tracing::{debug, info, trace};

use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::event::GraphEventRef;
use crate::named::{self, NamedThread, QueueIndex, ThreadIndex, ThreadTarget};
use crate::sync::{lock, Event, Mutex};
use crate::task::{GraphTask, TaskRef};
use crate::tasks::{NullTask, ReturnToCallerTask, TriggerEventTask};
use crate::thread::TaskThread;

/// The running scheduler, published once its thread table is complete.
static GRAPH: ArcSwapOption<TaskGraph> = ArcSwapOption::const_empty();
static RUNNING: AtomicBool = AtomicBool::new(false);
static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Waits on more events than this go through a single gather task first.
const GATHER_THRESHOLD: usize = 8;

/// Runs `f` against the running scheduler.
///
/// # Panics
///
/// If called before [`TaskGraph::startup`] or after [`TaskGraph::shutdown`].
pub(crate) fn with_graph<R>(f: impl FnOnce(&TaskGraph) -> R) -> R {
    let graph = GRAPH.load();
    match &*graph {
        Some(graph) => f(graph),
        None => panic!("task graph used outside of startup/shutdown"),
    }
}

/// The process-wide task scheduler.
///
/// Owns one [`TaskThread`] per named thread plus one per unnamed worker.
/// Named threads are driven by whoever attaches to them; workers are spawned
/// at startup and joined at shutdown.
pub struct TaskGraph {
    generation: u64,
    config: GraphConfig,
    threads: Vec<TaskThread>,
    num_workers: usize,
    /// Round-robin cursor for any-thread dispatch.
    next_worker: AtomicUsize,
    /// Rotates the first victim a thief looks at.
    steal_cursor: AtomicUsize,
    /// Workers that announced they ran out of work. May hold stale entries.
    idle_workers: ArrayQueue<ThreadIndex>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskGraph {
    /// Starts the scheduler with `num_threads` unnamed workers and otherwise
    /// default settings.
    pub fn startup(num_threads: usize) -> Result<()> {
        Self::startup_with(GraphConfig::default().worker_threads(num_threads))
    }

    pub fn startup_with(config: GraphConfig) -> Result<()> {
        if RUNNING.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(GraphError::AlreadyStarted);
        }

        let num_workers = config.effective_worker_threads();
        let generation = GENERATION.fetch_add(1, Ordering::Relaxed) + 1;
        let threads = (0..NamedThread::COUNT + num_workers)
            .map(|i| TaskThread::new(ThreadIndex(i)))
            .collect();

        let graph = Arc::new(Self {
            generation,
            config,
            threads,
            num_workers,
            next_worker: AtomicUsize::new(0),
            steal_cursor: AtomicUsize::new(0),
            idle_workers: ArrayQueue::new(num_workers.max(1)),
            handles: Mutex::new(Vec::with_capacity(num_workers)),
        });

        // Every table a worker can reach is built. Only now may threads call
        // back into the scheduler, so publish before spawning any of them.
        GRAPH.store(Some(graph.clone()));

        for n in 0..num_workers {
            if let Err(err) = graph.spawn_worker(n) {
                graph.stop_workers();
                GRAPH.store(None);
                RUNNING.store(false, Ordering::Release);
                return Err(err);
            }
        }

        info!(named = NamedThread::COUNT, workers = num_workers, "task graph started");
        Ok(())
    }

    /// Stops and joins every worker and unpublishes the scheduler. Named
    /// threads must have stopped processing beforehand.
    pub fn shutdown() -> Result<()> {
        let graph = GRAPH.load_full().ok_or(GraphError::NotStarted)?;
        let panicked = graph.stop_workers();
        GRAPH.store(None);
        RUNNING.store(false, Ordering::Release);
        info!("task graph shut down");

        if panicked > 0 {
            Err(GraphError::WorkerPanicked(panicked))
        }
        else {
            Ok(())
        }
    }

    pub fn is_running() -> bool {
        GRAPH.load().is_some()
    }

    /// The running scheduler.
    ///
    /// # Panics
    ///
    /// If the scheduler is not running.
    pub fn get() -> Arc<TaskGraph> {
        match GRAPH.load_full() {
            Some(graph) => graph,
            None => panic!("task graph used outside of startup/shutdown"),
        }
    }

    fn spawn_worker(self: &Arc<Self>, n: usize) -> Result<()> {
        let index = ThreadIndex(NamedThread::COUNT + n);
        let mut builder = thread::Builder::new().name(format!("{}-{}", self.config.thread_name_prefix, n));
        if let Some(stack_size) = self.config.thread_stack_size {
            builder = builder.stack_size(stack_size);
        }

        let graph = self.clone();
        let handle = builder
            .spawn(move || {
                named::attach_current(graph.generation, index);
                debug!(worker = n, "worker started");
                graph.thread(index).process_tasks_until_quit(QueueIndex::Main, &graph);
                debug!(worker = n, "worker exiting");
            })
            .map_err(|source| GraphError::Spawn { index: n, source })?;

        lock(&self.handles).push(handle);
        Ok(())
    }

    /// Asks every worker to quit and joins them. Returns how many panicked.
    fn stop_workers(&self) -> usize {
        for worker in self.workers() {
            worker.request_quit(QueueIndex::Main);
        }
        let handles = mem::take(&mut *lock(&self.handles));
        handles.into_iter().filter_map(|handle| handle.join().err()).count()
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn num_worker_threads(&self) -> usize {
        self.num_workers
    }

    pub(crate) fn thread(&self, index: ThreadIndex) -> &TaskThread {
        &self.threads[index.0]
    }

    fn workers(&self) -> &[TaskThread] {
        &self.threads[NamedThread::COUNT..]
    }

    fn named_slot(&self, target: ThreadTarget) -> (&TaskThread, QueueIndex) {
        match target {
            ThreadTarget::Named(thread, queue) => (self.thread(thread.index()), queue),
            ThreadTarget::AnyThread => panic!("expected a named thread"),
        }
    }

    /// Identity of the calling thread: its named thread, `AnyThread` for a
    /// worker, or `None` if it never attached.
    pub fn current_thread_if_known(&self) -> Option<ThreadTarget> {
        named::current_index(self.generation).map(ThreadIndex::target)
    }

    /// Makes the calling OS thread act as `thread`.
    pub fn attach_to_thread(&self, thread: NamedThread) {
        debug!(%thread, "attached");
        named::attach_current(self.generation, thread.index());
    }

    fn debug_check_attached(&self, thread: &TaskThread) {
        debug_assert_eq!(
            named::current_index(self.generation),
            Some(thread.index()),
            "named thread driven from a thread not attached to it"
        );
    }

    /// Runs the named thread's queued tasks until none are left.
    pub fn process_thread_until_idle(&self, thread: impl Into<ThreadTarget>) {
        let (thread, queue) = self.named_slot(thread.into());
        self.debug_check_attached(thread);
        thread.process_tasks_until_idle(queue, self);
    }

    /// Runs the named thread's tasks, stalling while idle, until
    /// [`request_return`](TaskGraph::request_return) is called for it.
    pub fn process_thread_until_request_return(&self, thread: impl Into<ThreadTarget>) {
        let (thread, queue) = self.named_slot(thread.into());
        self.debug_check_attached(thread);
        thread.process_tasks_until_request_return(queue, self);
    }

    pub fn request_return(&self, thread: impl Into<ThreadTarget>) {
        let target = thread.into();
        debug!(?target, "return requested");
        let (thread, queue) = self.named_slot(target);
        thread.request_quit(queue);
    }

    pub fn is_thread_processing_tasks(&self, thread: impl Into<ThreadTarget>) -> bool {
        let (thread, queue) = self.named_slot(thread.into());
        thread.is_processing_tasks(queue)
    }

    pub(crate) fn note_idle_worker(&self, index: ThreadIndex) {
        // Full means enough idle workers are already advertised.
        let _ = self.idle_workers.push(index);
    }

    /// Routes a ready task to its thread.
    pub(crate) fn queue_task(&self, task: TaskRef, target: ThreadTarget, current: Option<ThreadTarget>) {
        let (index, queue) = match target {
            ThreadTarget::AnyThread if self.num_workers == 0 => (NamedThread::GameThread.index(), QueueIndex::Main),
            ThreadTarget::AnyThread => (self.pick_worker(), QueueIndex::Main),
            ThreadTarget::Named(thread, queue) => (thread.index(), queue),
        };
        trace!(task = task.name(), thread = index.0, ?queue, "queued");

        let thread = self.thread(index);
        if index.is_named() && self.current_index(current) == Some(index) {
            thread.enqueue_from_this_thread(queue, task);
        }
        else {
            thread.enqueue_from_other_thread(queue, task);
        }
    }

    fn current_index(&self, current: Option<ThreadTarget>) -> Option<ThreadIndex> {
        match current {
            Some(ThreadTarget::Named(thread, _)) => {
                debug_assert_eq!(
                    named::current_index(self.generation),
                    Some(thread.index()),
                    "caller claimed to be a named thread it is not attached to"
                );
                Some(thread.index())
            }
            Some(ThreadTarget::AnyThread) => None,
            None => named::current_index(self.generation),
        }
    }

    /// Picks a worker for an any-thread task, preferring one that advertised
    /// it is idle over the round-robin choice.
    fn pick_worker(&self) -> ThreadIndex {
        while let Some(index) = self.idle_workers.pop() {
            if self.thread(index).is_stalling() {
                return index;
            }
        }
        let n = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.num_workers;
        ThreadIndex(NamedThread::COUNT + n)
    }

    /// Steals one task for `thief` from a sibling worker. The first pass
    /// skips siblings that look idle; the second tries everyone.
    pub(crate) fn find_work(&self, thief: ThreadIndex) -> Option<TaskRef> {
        let workers = self.workers();
        if workers.len() < 2 {
            return None;
        }
        let start = self.steal_cursor.fetch_add(1, Ordering::Relaxed);
        for skip_idle in [true, false] {
            for i in 0..workers.len() {
                let victim = &workers[start.wrapping_add(i) % workers.len()];
                if victim.index() == thief || !victim.accepts_steals() || (skip_idle && victim.is_stalling()) {
                    continue;
                }
                if let Some(task) = victim.request_steal() {
                    trace!(thief = thief.0, victim = victim.index().0, task = task.name(), "stole");
                    return Some(task);
                }
            }
        }
        None
    }

    /// Blocks until every event in `tasks` has completed.
    ///
    /// A named thread that is not already processing the relevant queue
    /// keeps running its own tasks while it waits. Any other caller blocks
    /// on an [`Event`]; if the awaited work can only run on the blocked
    /// thread, that is a deadlock.
    pub fn wait_until_tasks_complete(&self, tasks: &[GraphEventRef], current: Option<ThreadTarget>) {
        if tasks.iter().all(|task| task.is_complete()) {
            return;
        }
        let current = current.or_else(|| self.current_thread_if_known());

        if let Some(target @ ThreadTarget::Named(..)) = current {
            if !self.is_thread_processing_tasks(target) {
                let gathered;
                let tasks = if tasks.len() > GATHER_THRESHOLD {
                    gathered = [GraphTask::create(tasks).current_thread(current).construct_and_dispatch_when_ready(NullTask)];
                    &gathered[..]
                }
                else {
                    tasks
                };
                GraphTask::create(tasks)
                    .current_thread(current)
                    .construct_fire_and_forget(ReturnToCallerTask::new(target));
                self.process_thread_until_request_return(target);
                return;
            }
        }

        let event = Arc::new(Event::new());
        self.trigger_event_when_tasks_complete(event.clone(), tasks, current);
        event.wait();
    }

    pub fn wait_until_task_completes(&self, task: GraphEventRef, current: Option<ThreadTarget>) {
        self.wait_until_tasks_complete(&[task], current);
    }

    /// Triggers `event` once every event in `tasks` has completed, at once if
    /// they already have.
    pub fn trigger_event_when_tasks_complete(&self, event: Arc<Event>, tasks: &[GraphEventRef], current: Option<ThreadTarget>) {
        if tasks.iter().all(|task| task.is_complete()) {
            event.trigger();
            return;
        }
        GraphTask::create(tasks)
            .current_thread(current)
            .construct_fire_and_forget(TriggerEventTask::new(event));
    }

    pub fn trigger_event_when_task_completes(&self, event: Arc<Event>, task: GraphEventRef, current: Option<ThreadTarget>) {
        self.trigger_event_when_tasks_complete(event, &[task], current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            if Instant::now() > deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    #[test]
    fn test_dispatch_prefers_idle_worker() {
        let _graph = crate::tests::start(2);
        let graph = TaskGraph::get();
        let first = ThreadIndex(NamedThread::COUNT);
        let second = ThreadIndex(NamedThread::COUNT + 1);
        assert!(wait_for(|| graph.thread(first).is_stalling() && graph.thread(second).is_stalling()));

        while graph.idle_workers.pop().is_some() {}
        graph.note_idle_worker(second);
        assert_eq!(graph.pick_worker(), second);

        // With nobody advertised, consecutive picks rotate over the workers.
        let a = graph.pick_worker();
        let b = graph.pick_worker();
        assert_ne!(a, b);
    }
}
