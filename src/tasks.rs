//! Small reusable task bodies.

use std::sync::Arc;

use crate::event::GraphEventRef;
use crate::graph::with_graph;
use crate::named::ThreadTarget;
use crate::sync::Event;
use crate::task::{GraphTask, TaskBody, TaskContext};

/// Does nothing. Used as a join point for several prerequisites.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTask;

impl TaskBody for NullTask {
    fn do_task(self: Box<Self>, _ctx: &TaskContext<'_>) {}
}

/// Makes a named thread return from
/// [`process_thread_until_request_return`](crate::TaskGraph::process_thread_until_request_return).
#[derive(Debug, Clone, Copy)]
pub struct ReturnToCallerTask {
    thread: ThreadTarget,
}

impl ReturnToCallerTask {
    /// # Panics
    ///
    /// If `thread` is not a named thread.
    pub fn new(thread: ThreadTarget) -> Self {
        assert!(thread.named_thread().is_some(), "can only return from a named thread");
        Self { thread }
    }
}

impl TaskBody for ReturnToCallerTask {
    fn do_task(self: Box<Self>, ctx: &TaskContext<'_>) {
        debug_assert_eq!(ctx.current_thread().named_thread(), self.thread.named_thread());
        with_graph(|graph| graph.request_return(self.thread));
    }

    fn desired_thread(&self) -> ThreadTarget {
        self.thread
    }
}

/// Triggers an [`Event`]. Lets threads outside the graph block until a set
/// of tasks is done.
pub struct TriggerEventTask {
    event: Arc<Event>,
    thread: ThreadTarget,
}

impl TriggerEventTask {
    pub fn new(event: Arc<Event>) -> Self {
        Self { event, thread: ThreadTarget::AnyThread }
    }

    pub fn on(mut self, thread: ThreadTarget) -> Self {
        self.thread = thread;
        self
    }
}

impl TaskBody for TriggerEventTask {
    fn do_task(self: Box<Self>, _ctx: &TaskContext<'_>) {
        self.event.trigger();
    }

    fn desired_thread(&self) -> ThreadTarget {
        self.thread
    }
}

/// Wraps a plain closure.
pub struct FunctionTask<F> {
    func: F,
    thread: ThreadTarget,
    name: &'static str,
}

impl<F: FnOnce() + Send + 'static> FunctionTask<F> {
    pub fn new(func: F) -> Self {
        Self { func, thread: ThreadTarget::AnyThread, name: "FunctionTask" }
    }

    pub fn on(mut self, thread: ThreadTarget) -> Self {
        self.thread = thread;
        self
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Runs `func` on `thread` once `prerequisites` are complete.
    pub fn create_and_dispatch_when_ready(func: F, prerequisites: &[GraphEventRef], thread: ThreadTarget) -> GraphEventRef {
        GraphTask::create(prerequisites).construct_and_dispatch_when_ready(Self::new(func).on(thread))
    }
}

impl<F: FnOnce() + Send + 'static> TaskBody for FunctionTask<F> {
    fn do_task(self: Box<Self>, _ctx: &TaskContext<'_>) {
        (self.func)()
    }

    fn desired_thread(&self) -> ThreadTarget {
        self.thread
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Wraps a closure that gets the full [`TaskContext`], so it can see where
/// it runs and extend its own completion with
/// [`dont_complete_until`](TaskContext::dont_complete_until).
pub struct FullFunctionTask<F> {
    func: F,
    thread: ThreadTarget,
    name: &'static str,
}

impl<F: FnOnce(&TaskContext<'_>) + Send + 'static> FullFunctionTask<F> {
    pub fn new(func: F) -> Self {
        Self { func, thread: ThreadTarget::AnyThread, name: "FullFunctionTask" }
    }

    pub fn on(mut self, thread: ThreadTarget) -> Self {
        self.thread = thread;
        self
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

impl<F: FnOnce(&TaskContext<'_>) + Send + 'static> TaskBody for FullFunctionTask<F> {
    fn do_task(self: Box<Self>, ctx: &TaskContext<'_>) {
        (self.func)(ctx)
    }

    fn desired_thread(&self) -> ThreadTarget {
        self.thread
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
