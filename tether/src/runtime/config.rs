use std::env;
use std::time::Duration;

pub const DEFAULT_THREAD_NAME_PREFIX: &str = "tether-worker";
pub const DEFAULT_SYNC_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub const POOL_SIZE_ENV: &str = "TETHER_POOL_SIZE";
pub const THREAD_PREFIX_ENV: &str = "TETHER_THREAD_PREFIX";

/// What the pool does when a deferred task returns an error or panics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskFailurePolicy {
    /// Abort the whole process after logging the failure.
    Abort,
    /// Stop the pool and record the failure; the owning loop's `exec()`
    /// returns `RuntimeError::TaskFailed`.
    Stop,
}

/// Configuration for an `EventLoop` and its worker pool.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Number of worker threads in the pool.
    pub pool_size: usize,

    /// Worker threads are named `<prefix>-<index>`.
    pub thread_name_prefix: String,

    /// Reaction to a failing task.
    pub task_failure_policy: TaskFailurePolicy,

    /// How often a blocked `sync_wait` on a worker thread re-checks the queue
    /// for work it can run inline.
    pub sync_wait_poll_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get(),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            task_failure_policy: TaskFailurePolicy::Stop,
            sync_wait_poll_interval: DEFAULT_SYNC_WAIT_POLL_INTERVAL,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `TETHER_POOL_SIZE` and `TETHER_THREAD_PREFIX`.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(size) = env::var(POOL_SIZE_ENV).ok().and_then(|v| v.trim().parse::<usize>().ok()) {
            config.pool_size = size;
        }
        if let Ok(prefix) = env::var(THREAD_PREFIX_ENV) {
            if !prefix.trim().is_empty() {
                config.thread_name_prefix = prefix.trim().to_string();
            }
        }
        config.normalized()
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self.normalized()
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_task_failure_policy(mut self, policy: TaskFailurePolicy) -> Self {
        self.task_failure_policy = policy;
        self
    }

    pub fn with_sync_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.sync_wait_poll_interval = interval;
        self
    }

    /// A pool always has at least one worker.
    pub fn normalized(mut self) -> Self {
        if self.pool_size == 0 {
            self.pool_size = 1;
        }
        self
    }
}
