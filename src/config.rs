use std::num::NonZeroUsize;

/// Startup parameters for the [`TaskGraph`](crate::TaskGraph).
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Requested number of unnamed worker threads. Zero runs every
    /// any-thread task on the game thread.
    pub worker_threads: usize,

    /// Upper bound applied to `worker_threads`.
    pub max_worker_threads: usize,

    /// Workers are named `{prefix}-{n}`.
    pub thread_name_prefix: String,

    pub thread_stack_size: Option<usize>,

    /// Empty polls a thread makes before it stalls.
    pub spin_count: usize,

    /// Number of busy spins after which a searching worker yields its
    /// timeslice between polls instead.
    pub yield_after: usize,
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_threads(mut self, val: usize) -> Self {
        self.worker_threads = val;
        self
    }

    pub fn max_worker_threads(mut self, val: usize) -> Self {
        self.max_worker_threads = val;
        self
    }

    pub fn thread_name_prefix(mut self, val: impl Into<String>) -> Self {
        self.thread_name_prefix = val.into();
        self
    }

    pub fn thread_stack_size(mut self, val: usize) -> Self {
        self.thread_stack_size = Some(val);
        self
    }

    pub fn spin_count(mut self, val: usize) -> Self {
        self.spin_count = val;
        self
    }

    pub fn yield_after(mut self, val: usize) -> Self {
        self.yield_after = val;
        self
    }

    /// The number of workers that will actually be spawned.
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.min(self.max_worker_threads)
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self {
            worker_threads: cores.saturating_sub(1),
            max_worker_threads: cores.max(1),
            thread_name_prefix: "task-graph".to_owned(),
            thread_stack_size: None,
            spin_count: 64,
            yield_after: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_is_capped() {
        let cfg = GraphConfig::new().max_worker_threads(4).worker_threads(32);
        assert_eq!(cfg.effective_worker_threads(), 4);
        assert_eq!(cfg.worker_threads(0).effective_worker_threads(), 0);
    }
}
