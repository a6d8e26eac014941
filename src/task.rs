//! Units of work and their construction.
//!
//! A task is built in three one-way steps, each consuming the previous
//! stage: the body is wrapped ([`Unthreaded`]), its thread is fixed
//! ([`Threaded`]), and its prerequisites are registered ([`Prepared`]).
//! Releasing a prepared task drops its construction lock, after which it is
//! queued as soon as its last prerequisite completes. The remaining stages
//! (queued, executing, finished) happen on other threads and are checked at
//! runtime in debug builds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use takecell::TakeOwnCell;
use tracing::trace;

use crate::event::{GraphEvent, GraphEventRef};
use crate::graph::with_graph;
use crate::named::ThreadTarget;

/// The work carried by a task.
pub trait TaskBody: Send + 'static {
    /// Runs the work. Called exactly once, on a thread matching
    /// [`desired_thread`](TaskBody::desired_thread).
    fn do_task(self: Box<Self>, ctx: &TaskContext<'_>);

    /// Where the task should run. Asked once, after the body exists.
    fn desired_thread(&self) -> ThreadTarget {
        ThreadTarget::AnyThread
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// What a running task can see of the scheduler.
pub struct TaskContext<'a> {
    current: ThreadTarget,
    event: Option<&'a GraphEventRef>,
}

impl<'a> TaskContext<'a> {
    /// The thread the task is running on. Workers report `AnyThread`.
    pub fn current_thread(&self) -> ThreadTarget {
        self.current
    }

    /// The event that completes with this task, unless it was dispatched
    /// fire-and-forget.
    pub fn completion_event(&self) -> Option<&'a GraphEventRef> {
        self.event
    }

    /// Holds back this task's completion event until `event` has completed
    /// as well. Only a running task may extend its own completion this way.
    ///
    /// # Panics
    ///
    /// If the task was dispatched fire-and-forget.
    pub fn dont_complete_until(&self, event: GraphEventRef) {
        match self.event {
            Some(own) => own.dont_complete_until(event),
            None => panic!("dont_complete_until called from a fire-and-forget task"),
        }
    }
}

/// Lifecycle of a task once it is shared. The steps before that are the
/// [`Unthreaded`] and [`Threaded`] types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub(crate) enum Stage {
    ThreadSet,
    PrerequisitesSetup,
    Queued,
    Executing,
    Deconstructed,
}

/// Debug-only record of the runtime half of the lifecycle.
struct StageTracker {
    #[cfg(debug_assertions)]
    stage: std::sync::atomic::AtomicU8,
}

impl StageTracker {
    fn new(_stage: Stage) -> Self {
        Self {
            #[cfg(debug_assertions)]
            stage: std::sync::atomic::AtomicU8::new(_stage as u8),
        }
    }

    #[inline]
    fn advance(&self, _to: Stage) {
        #[cfg(debug_assertions)]
        {
            let prev = self.stage.swap(_to as u8, Ordering::AcqRel);
            assert_eq!(prev + 1, _to as u8, "illegal task lifecycle transition to {:?}", _to);
        }
    }
}

pub(crate) type TaskRef = Arc<Task>;

pub(crate) struct Task {
    body: TakeOwnCell<Box<dyn TaskBody>>,
    name: &'static str,
    thread: ThreadTarget,
    /// Outstanding prerequisites plus one while construction still holds it.
    prerequisites: AtomicUsize,
    event: Option<GraphEventRef>,
    stage: StageTracker,
}

impl Task {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Called once per completed prerequisite.
    pub fn conditional_queue_task(self: Arc<Self>, current: Option<ThreadTarget>) {
        let prev = self.prerequisites.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "prerequisite count underflow");
        if prev == 1 {
            self.queue(current);
        }
    }

    fn prerequisites_complete(self: Arc<Self>, current: Option<ThreadTarget>, already_finished: usize, unlock: bool) {
        let released = already_finished + usize::from(unlock);
        if released == 0 {
            return;
        }
        let prev = self.prerequisites.fetch_sub(released, Ordering::AcqRel);
        debug_assert!(prev >= released, "prerequisite count underflow");
        if prev == released {
            self.queue(current);
        }
    }

    fn queue(self: Arc<Self>, current: Option<ThreadTarget>) {
        self.stage.advance(Stage::Queued);
        let thread = self.thread;
        with_graph(|graph| graph.queue_task(self, thread, current));
    }

    /// Runs the body, then completes the task's event.
    pub fn execute(self: Arc<Self>, current: ThreadTarget) {
        self.stage.advance(Stage::Executing);
        trace!(task = self.name, ?current, "executing");
        if let Some(body) = self.body.take() {
            let ctx = TaskContext { current, event: self.event.as_ref() };
            body.do_task(&ctx);
        }
        if let Some(event) = &self.event {
            event.dispatch_subsequents(Some(current));
        }
        self.stage.advance(Stage::Deconstructed);
    }
}

/// A task whose body exists but whose thread is not yet fixed.
struct Unthreaded {
    body: Box<dyn TaskBody>,
    name: &'static str,
    prerequisites: usize,
    event: Option<GraphEventRef>,
}

impl Unthreaded {
    fn new<B: TaskBody>(body: B, prerequisites: usize, event: Option<GraphEventRef>) -> Self {
        let name = body.name();
        Self { body: Box::new(body), name, prerequisites: prerequisites + 1, event }
    }

    fn set_thread_to_execute_on(self) -> Threaded {
        let thread = self.body.desired_thread();
        let task = Arc::new(Task {
            body: TakeOwnCell::new(self.body),
            name: self.name,
            thread,
            prerequisites: AtomicUsize::new(self.prerequisites),
            event: self.event,
            stage: StageTracker::new(Stage::ThreadSet),
        });
        Threaded { task }
    }
}

struct Threaded {
    task: TaskRef,
}

impl Threaded {
    /// Registers with every prerequisite. Prerequisites that already fired are
    /// counted instead, since their subsequent lists are closed.
    fn setup_prerequisites(self, prerequisites: &[GraphEventRef]) -> Prepared {
        self.task.stage.advance(Stage::PrerequisitesSetup);
        let already_finished = prerequisites
            .iter()
            .filter(|event| !event.add_subsequent(self.task.clone()))
            .count();
        Prepared { task: self.task, already_finished }
    }
}

struct Prepared {
    task: TaskRef,
    already_finished: usize,
}

impl Prepared {
    fn release(self, current: Option<ThreadTarget>, unlock: bool) -> TaskRef {
        self.task.clone().prerequisites_complete(current, self.already_finished, unlock);
        self.task
    }
}

/// Entry point for creating tasks.
///
/// ```no_run
/// use task_graph::{FunctionTask, GraphTask};
///
/// let first = GraphTask::create(&[]).construct_and_dispatch_when_ready(FunctionTask::new(|| {}));
/// let second = GraphTask::create(&[first]).construct_and_dispatch_when_ready(FunctionTask::new(|| {}));
/// second.wait(None);
/// ```
pub struct GraphTask;

impl GraphTask {
    /// Starts building a task that runs once every event in
    /// `prerequisites` has completed.
    pub fn create(prerequisites: &[GraphEventRef]) -> Constructor<'_> {
        Constructor { prerequisites, current: None, event: None }
    }

    /// Starts building a task whose completion dispatches `event` instead of
    /// a fresh one.
    pub fn with_event(event: GraphEventRef, prerequisites: &[GraphEventRef]) -> Constructor<'_> {
        debug_assert!(!event.is_complete(), "task attached to a completed event");
        Constructor { prerequisites, current: None, event: Some(event) }
    }
}

#[must_use = "a constructor does nothing until a body is supplied"]
pub struct Constructor<'a> {
    prerequisites: &'a [GraphEventRef],
    current: Option<ThreadTarget>,
    event: Option<GraphEventRef>,
}

impl<'a> Constructor<'a> {
    /// Declares which thread the caller is running on, sparing a
    /// thread-local lookup when the task is queued.
    pub fn current_thread(mut self, current: Option<ThreadTarget>) -> Self {
        self.current = current;
        self
    }

    fn prepare<B: TaskBody>(self, body: B, track: bool) -> (Prepared, Option<ThreadTarget>) {
        let event = match (track, self.event) {
            (true, event) => Some(event.unwrap_or_else(GraphEvent::new)),
            (false, None) => None,
            (false, Some(_)) => panic!("a fire-and-forget task cannot complete an existing event"),
        };
        let prepared = Unthreaded::new(body, self.prerequisites.len(), event)
            .set_thread_to_execute_on()
            .setup_prerequisites(self.prerequisites);
        (prepared, self.current)
    }

    /// Creates the task and lets it run as soon as it is ready. The returned
    /// event may already be complete by the time this returns.
    pub fn construct_and_dispatch_when_ready<B: TaskBody>(self, body: B) -> GraphEventRef {
        let (prepared, current) = self.prepare(body, true);
        let task = prepared.release(current, true);
        match &task.event {
            Some(event) => event.clone(),
            None => unreachable!("tracked task without an event"),
        }
    }

    /// Creates a task nobody can wait on or depend on.
    pub fn construct_fire_and_forget<B: TaskBody>(self, body: B) {
        let (prepared, current) = self.prepare(body, false);
        prepared.release(current, true);
    }

    /// Creates the task with its prerequisites registered, but keeps it from
    /// running until [`HeldTask::unlock`] is called.
    pub fn construct_and_hold<B: TaskBody>(self, body: B) -> HeldTask {
        let (prepared, current) = self.prepare(body, true);
        HeldTask { task: prepared.release(current, false) }
    }
}

/// A task that will not run before [`unlock`](HeldTask::unlock). Dropping it
/// without unlocking leaves the task and its event pending forever.
#[must_use = "a held task never runs unless unlocked"]
pub struct HeldTask {
    task: TaskRef,
}

impl HeldTask {
    pub fn event(&self) -> &GraphEventRef {
        match &self.task.event {
            Some(event) => event,
            None => unreachable!("held task without an event"),
        }
    }

    /// Releases the construction lock, returning the completion event.
    pub fn unlock(self, current: Option<ThreadTarget>) -> GraphEventRef {
        let event = self.event().clone();
        self.task.conditional_queue_task(current);
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    impl TaskBody for Probe {
        fn do_task(self: Box<Self>, _ctx: &TaskContext<'_>) {}

        fn desired_thread(&self) -> ThreadTarget {
            ThreadTarget::RENDERING_THREAD
        }
    }

    #[test]
    fn test_construction_holds_extra_prerequisite() {
        let threaded = Unthreaded::new(Probe, 2, None).set_thread_to_execute_on();
        assert_eq!(threaded.task.prerequisites.load(Ordering::Relaxed), 3);
        assert_eq!(threaded.task.thread, ThreadTarget::RENDERING_THREAD);
        assert!(threaded.task.name().ends_with("Probe"));
    }

    #[test]
    fn test_completed_prerequisites_are_counted() {
        let done = GraphEvent::new();
        done.dispatch_subsequents(None);
        let pending = GraphEvent::new();

        let prepared = Unthreaded::new(Probe, 2, None)
            .set_thread_to_execute_on()
            .setup_prerequisites(&[done, pending.clone()]);
        assert_eq!(prepared.already_finished, 1);

        // Release the pending prerequisite's claim so the event can be dropped.
        assert_eq!(pending.take_subsequents_for_test().len(), 1);
    }

    #[test]
    fn test_stages_advance_in_order() {
        let tracker = StageTracker::new(Stage::ThreadSet);
        for stage in [Stage::PrerequisitesSetup, Stage::Queued, Stage::Executing, Stage::Deconstructed] {
            tracker.advance(stage);
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "illegal task lifecycle transition")]
    fn test_stage_cannot_be_skipped() {
        let tracker = StageTracker::new(Stage::ThreadSet);
        tracker.advance(Stage::Queued);
    }
}
