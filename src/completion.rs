use std::sync::Arc;

use crate::closable::ClosableStack;
use crate::event::GraphEventRef;
use crate::graph::with_graph;
use crate::named::ThreadTarget;
use crate::task::{GraphTask, TaskBody, TaskContext};

/// Collects fire-and-forget work so it can be waited on later, including
/// work added while the wait is already in progress.
///
/// Each drain of the list produces a gather task over what was drained. When
/// that task runs it drains the list again and, if anything new arrived,
/// holds its own completion until the next gather finishes. The chain ends
/// at the first drain that finds nothing.
#[derive(Clone, Default)]
pub struct CompletionList {
    pending: Arc<ClosableStack<GraphEventRef>>,
}

impl CompletionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, event: GraphEventRef) {
        if self.pending.push(event).is_err() {
            unreachable!("completion lists are never closed");
        }
    }

    pub fn add_all(&self, events: impl IntoIterator<Item = GraphEventRef>) {
        for event in events {
            self.add(event);
        }
    }

    /// An event that completes once everything added so far, and anything
    /// added before that happens, has completed. `None` if nothing is
    /// pending.
    pub fn create_prerequisite_completion_handle(&self, current: Option<ThreadTarget>) -> Option<GraphEventRef> {
        let pending = self.pending.take_all();
        if pending.is_empty() {
            return None;
        }
        let gather = GatherTask { list: self.clone() };
        Some(GraphTask::create(&pending).current_thread(current).construct_and_dispatch_when_ready(gather))
    }

    /// Blocks until the list is drained and everything in it has completed.
    pub fn wait(&self, current: Option<ThreadTarget>) {
        if let Some(handle) = self.create_prerequisite_completion_handle(current) {
            with_graph(|graph| graph.wait_until_task_completes(handle, current));
        }
    }
}

struct GatherTask {
    list: CompletionList,
}

impl TaskBody for GatherTask {
    fn do_task(self: Box<Self>, ctx: &TaskContext<'_>) {
        if let Some(next) = self.list.create_prerequisite_completion_handle(Some(ctx.current_thread())) {
            ctx.dont_complete_until(next);
        }
    }
}
