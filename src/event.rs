use std::fmt;
use std::mem;
use std::sync::Arc;

use tracing::trace;

use crate::closable::ClosableStack;
use crate::graph::with_graph;
use crate::named::ThreadTarget;
use crate::sync::{lock, Mutex};
use crate::task::{GraphTask, TaskRef};
use crate::tasks::NullTask;

pub type GraphEventRef = Arc<GraphEvent>;
pub type GraphEventArray = Vec<GraphEventRef>;

/// Completion of a task, or of a group of chained tasks.
///
/// Tasks that depend on the event register themselves as subsequents. When
/// the event completes the subsequent list is closed for good and each
/// subsequent has one prerequisite released.
pub struct GraphEvent {
    subsequents: ClosableStack<TaskRef>,
    /// Filled only by the owning task while it runs.
    wait_for: Mutex<GraphEventArray>,
}

impl GraphEvent {
    /// Creates an event not tied to any task. Its owner completes it with
    /// [`dispatch_subsequents`](GraphEvent::dispatch_subsequents).
    pub fn new() -> GraphEventRef {
        Arc::new(Self { subsequents: ClosableStack::new(), wait_for: Mutex::new(Vec::new()) })
    }

    /// Registers `task` to be released on completion. Returns false if the
    /// event already completed, in which case nothing was registered and the
    /// caller must treat the prerequisite as satisfied.
    pub(crate) fn add_subsequent(&self, task: TaskRef) -> bool {
        self.subsequents.push(task).is_ok()
    }

    pub fn is_complete(&self) -> bool {
        self.subsequents.is_closed()
    }

    pub(crate) fn dont_complete_until(&self, event: GraphEventRef) {
        debug_assert!(!self.is_complete(), "cannot extend an event that already completed");
        lock(&self.wait_for).push(event);
    }

    /// Completes the event.
    ///
    /// If the owning task asked to wait on further events, completion is
    /// deferred to a gather task that depends on them and completes this same
    /// event when it runs. Otherwise the subsequent list is closed and every
    /// subsequent is released, in registration order. Dispatching an event
    /// that already completed does nothing.
    pub fn dispatch_subsequents(self: &Arc<Self>, current: Option<ThreadTarget>) {
        let wait_for = mem::take(&mut *lock(&self.wait_for));
        if !wait_for.is_empty() {
            trace!(count = wait_for.len(), "deferring completion");
            GraphTask::with_event(self.clone(), &wait_for)
                .current_thread(current)
                .construct_and_dispatch_when_ready(NullTask);
            return;
        }

        for task in self.subsequents.close_and_take() {
            task.conditional_queue_task(current);
        }
    }

    /// Blocks until the event completes. See
    /// [`TaskGraph::wait_until_task_completes`](crate::TaskGraph::wait_until_task_completes).
    pub fn wait(self: &Arc<Self>, current: Option<ThreadTarget>) {
        if self.is_complete() {
            return;
        }
        with_graph(|graph| graph.wait_until_task_completes(self.clone(), current));
    }

    #[cfg(test)]
    pub(crate) fn take_subsequents_for_test(&self) -> Vec<TaskRef> {
        self.subsequents.close_and_take()
    }
}

impl fmt::Debug for GraphEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphEvent").field("complete", &self.is_complete()).finish()
    }
}

impl Drop for GraphEvent {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let wait_for = self.wait_for.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner);
        debug_assert!(wait_for.is_empty(), "event destroyed with pending wait-for events");
        debug_assert!(
            self.subsequents.is_closed() || self.subsequents.is_empty(),
            "event destroyed before releasing its subsequents"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_event_rejects_subsequents() {
        let done = GraphEvent::new();
        assert!(!done.is_complete());
        done.dispatch_subsequents(None);
        assert!(done.is_complete());

        let pending = GraphEvent::new();
        let held = GraphTask::create(&[done.clone(), pending.clone()]).construct_and_hold(NullTask);
        assert_eq!(pending.take_subsequents_for_test().len(), 1);
        assert!(done.take_subsequents_for_test().is_empty());
        drop(held);
    }

    #[test]
    fn test_dispatch_twice_is_noop() {
        let event = GraphEvent::new();
        event.dispatch_subsequents(None);
        event.dispatch_subsequents(None);
        assert!(event.is_complete());
    }
}
