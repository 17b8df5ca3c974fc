use std::time::Duration;
use thiserror::Error;

/// Result type for batcher operations
pub type Result<T> = std::result::Result<T, BatcherError>;

/// Boxed error returned by processors
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned directly by batcher calls
#[derive(Error, Debug)]
pub enum BatcherError {
    /// Pending items did not drain before the deadline
    #[error("timed out after {waited:?} waiting for {pending} pending items to drain")]
    Timeout { waited: Duration, pending: i64 },

    /// The processing worker has already been started
    #[error("Batch processing has already been started")]
    AlreadyStarted,

    /// A background thread could not be spawned
    #[error("Failed to spawn batcher thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BatcherError {
    /// True for drain timeouts
    pub fn is_timeout(&self) -> bool {
        matches!(self, BatcherError::Timeout { .. })
    }
}

/// A processor failure, delivered through [`crate::Batcher::errors`]
#[derive(Error, Debug)]
#[error("processor failed on a batch of {batch_len} items: {source}")]
pub struct ProcessingError {
    /// Number of items in the failed batch
    pub batch_len: usize,
    /// Error returned by the processor
    #[source]
    pub source: BoxError,
}
