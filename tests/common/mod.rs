use std::sync::{Mutex, MutexGuard, PoisonError};

use task_graph::{GraphConfig, NamedThread, TaskGraph};
use tracing_subscriber::EnvFilter;

static SERIAL: Mutex<()> = Mutex::new(());

/// Keeps the scheduler running for the duration of a test, with the test
/// thread attached as the game thread. Tests using it run one at a time.
pub struct Running {
    _serial: MutexGuard<'static, ()>,
}

pub fn start(workers: usize) -> Running {
    start_with(GraphConfig::new().worker_threads(workers).max_worker_threads(workers.max(1)))
}

pub fn start_with(config: GraphConfig) -> Running {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();

    let serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    TaskGraph::startup_with(config.thread_name_prefix("test-worker")).unwrap();
    TaskGraph::get().attach_to_thread(NamedThread::GameThread);
    Running { _serial: serial }
}

impl Drop for Running {
    fn drop(&mut self) {
        let _ = TaskGraph::shutdown();
    }
}
