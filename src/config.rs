use crate::error::{BatcherError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum number of items per batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default maximum time an item waits in an open batch
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Default byte ceiling per batch; zero disables byte-based flushing
pub const DEFAULT_BATCH_SIZE_BYTES: usize = 0;

/// Default depth of the completed-batch queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Batcher configuration
///
/// # Example
///
/// ```json
/// {
///   "batch_size": 500,
///   "batch_size_bytes": 1048576,
///   "batch_interval": "250ms"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Maximum items per batch
    /// Default: 1000
    pub batch_size: usize,

    /// Ceiling on the estimated bytes of a batch, 0 = disabled
    /// Default: 0
    pub batch_size_bytes: usize,

    /// Maximum time an item may wait before its batch is flushed
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub batch_interval: Duration,

    /// Leave the processing worker stopped until `Batcher::start` is called
    /// Default: false
    pub skip_auto_start: bool,

    /// Completed batches that may wait for the processor
    /// Default: 10
    pub queue_capacity: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_size_bytes: DEFAULT_BATCH_SIZE_BYTES,
            batch_interval: DEFAULT_BATCH_INTERVAL,
            skip_auto_start: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl BatcherConfig {
    /// Parse a JSON configuration document
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| BatcherError::Config(e.to_string()))
    }

    /// Replace out-of-range values with their defaults
    pub fn normalized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = DEFAULT_BATCH_SIZE;
        }
        if self.batch_interval.is_zero() {
            self.batch_interval = DEFAULT_BATCH_INTERVAL;
        }
        if self.queue_capacity == 0 {
            self.queue_capacity = DEFAULT_QUEUE_CAPACITY;
        }
        self
    }

    /// True when a byte ceiling is configured
    pub fn bytes_limited(&self) -> bool {
        self.batch_size_bytes > 0
    }

    /// Time allowed for `pending` items to drain on close.
    ///
    /// Four batch intervals for every batch still outstanding.
    pub fn drain_timeout(&self, pending: i64) -> Duration {
        if pending <= 0 {
            return Duration::ZERO;
        }
        let batches = (pending as u64).div_ceil(self.batch_size as u64);
        let factor = u32::try_from(batches.saturating_mul(4)).unwrap_or(u32::MAX);
        self.batch_interval.saturating_mul(factor)
    }
}
