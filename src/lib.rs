//! A dependency-aware task scheduler.
//!
//! Tasks are short units of work with explicit prerequisites. Each task
//! completes a [`GraphEvent`], and other tasks can name that event as a
//! prerequisite. Ready tasks run either on a named thread (the game thread,
//! the rendering thread, ...) that pumps its own queue, or on a pool of
//! unnamed workers that steal from each other.
//!
//! ```no_run
//! use task_graph::{FunctionTask, GraphTask, NamedThread, TaskGraph};
//!
//! TaskGraph::startup(4).unwrap();
//! TaskGraph::get().attach_to_thread(NamedThread::GameThread);
//!
//! let load = GraphTask::create(&[]).construct_and_dispatch_when_ready(FunctionTask::new(|| { /* ... */ }));
//! let build = GraphTask::create(&[load]).construct_and_dispatch_when_ready(FunctionTask::new(|| { /* ... */ }));
//! TaskGraph::get().wait_until_task_completes(build, None);
//!
//! TaskGraph::shutdown().unwrap();
//! ```

mod closable;
mod completion;
mod config;
mod error;
mod event;
mod graph;
mod incoming;
mod named;
mod queue;
mod sync;
mod task;
mod tasks;
mod thread;

pub use completion::CompletionList;
pub use config::GraphConfig;
pub use error::{GraphError, Result};
pub use event::{GraphEvent, GraphEventArray, GraphEventRef};
pub use graph::TaskGraph;
pub use named::{NamedThread, QueueIndex, ThreadTarget};
pub use sync::Event;
pub use task::{Constructor, GraphTask, HeldTask, TaskBody, TaskContext};
pub use tasks::{FullFunctionTask, FunctionTask, NullTask, ReturnToCallerTask, TriggerEventTask};
