use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use zconn_frame::FrameConfig;

use crate::payload::PayloadPool;
use crate::timeout::TimeoutPolicy;

/// Default read and write timeout: 30 seconds.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default depth of each operation queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default number of consecutive timeouts tolerated per operation.
pub const DEFAULT_MAX_TIMEOUT_RETRIES: u32 = 16;

/// Source of deadline timestamps.
pub type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Per-connection configuration.
#[derive(Clone)]
pub struct ConnConfig {
    /// Framing applied to both directions.
    pub frame: FrameConfig,
    /// Depth of the read queue and of the write queue.
    pub queue_capacity: usize,
    /// Seed for the read timeout policy, restored after every success.
    pub read_timeout: Duration,
    /// Seed for the write timeout policy, restored after every success.
    pub write_timeout: Duration,
    pub read_policy: TimeoutPolicy,
    pub write_policy: TimeoutPolicy,
    /// Consecutive timeouts allowed before an operation fails with
    /// `ConnError::Timeout`. `None` retries forever.
    pub max_timeout_retries: Option<u32>,
    /// Pool used by `ZConn::send` / `ZConn::recv`.
    pub pool: PayloadPool,
    clock: Clock,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            read_policy: TimeoutPolicy::fixed(),
            write_policy: TimeoutPolicy::fixed(),
            max_timeout_retries: Some(DEFAULT_MAX_TIMEOUT_RETRIES),
            pool: PayloadPool::global().clone(),
            clock: Arc::new(Instant::now),
        }
    }
}

impl ConnConfig {
    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_read_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    pub fn with_write_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.write_policy = policy;
        self
    }

    pub fn with_max_timeout_retries(mut self, retries: Option<u32>) -> Self {
        self.max_timeout_retries = retries;
        self
    }

    pub fn with_pool(mut self, pool: PayloadPool) -> Self {
        self.pool = pool;
        self
    }

    /// Replace the clock deadlines are computed from.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> Instant + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Reject settings no connection could run with.
    pub fn validate(&self) -> crate::Result<()> {
        self.frame.validate()?;
        if self.queue_capacity == 0 {
            return Err(crate::ConnError::InvalidConfig(
                "queue capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnConfig")
            .field("frame", &self.frame)
            .field("queue_capacity", &self.queue_capacity)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("max_timeout_retries", &self.max_timeout_retries)
            .finish_non_exhaustive()
    }
}
