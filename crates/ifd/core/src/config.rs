//! Configuration options for the interface device layer

use std::time::Duration;

/// Configuration options for an [`Ifd`](crate::Ifd)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdConfig {
    /// Interval between two presence polls of the event watcher
    pub poll_interval: Duration,

    /// Upper bound of worker threads per context
    pub max_workers: usize,

    /// Idle time after which a worker thread exits
    pub worker_keep_alive: Duration,

    /// Timeout used when a wait request does not name one (`None` waits forever)
    pub default_wait_timeout: Option<Duration>,

    /// Length in bytes of generated context and slot handles
    pub handle_length: usize,
}

impl Default for IfdConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_workers: 16,
            worker_keep_alive: Duration::from_secs(60),
            default_wait_timeout: None,
            handle_length: 16,
        }
    }
}

impl IfdConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the presence poll interval
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the maximum number of worker threads
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the worker idle keep alive
    pub const fn with_worker_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.worker_keep_alive = keep_alive;
        self
    }

    /// Set the default wait timeout
    pub const fn with_default_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_wait_timeout = timeout;
        self
    }

    /// Set the generated handle length
    pub const fn with_handle_length(mut self, length: usize) -> Self {
        self.handle_length = length;
        self
    }
}
