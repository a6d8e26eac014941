use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("task graph is already running")]
    AlreadyStarted,

    #[error("task graph is not running")]
    NotStarted,

    #[error("failed to spawn worker thread {index}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} worker thread(s) panicked")]
    WorkerPanicked(usize),
}

pub type Result<T, E = GraphError> = std::result::Result<T, E>;
