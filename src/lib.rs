//! A concurrent batching accumulator.
//!
//! Producers hand individual items to a [`Batcher`], which groups them into
//! bounded batches and delivers each batch to a user-supplied [`Processor`]
//! on a dedicated worker thread.
//!
//! # Features
//!
//! - Three independent flush triggers: item count, estimated byte size and time
//! - Structural size estimation with cycle detection ([`EstimateSize`])
//! - Batches processed strictly in the order they were cut
//! - Processor failures reported on an unbounded error stream
//! - Idempotent, bounded close that flushes and drains before shutting down
//! - Per-batcher metrics: flushes by reason, throughput, processing latency
//!
//! # Example
//!
//! ```ignore
//! use stream_batcher::{Batcher, BoxError};
//! use std::time::Duration;
//!
//! let batcher = Batcher::builder()
//!     .batch_size(100)
//!     .batch_interval(Duration::from_millis(250))
//!     .processor(|batch: Vec<String>| -> Result<(), BoxError> {
//!         println!("writing {} rows", batch.len());
//!         Ok(())
//!     })
//!     .build()?;
//!
//! batcher.add("row".to_string());
//! batcher.close()?;
//! ```

pub mod batcher;
pub mod buffer;
pub mod config;
pub mod counter;
pub mod error;
pub mod metrics;
pub mod size;
pub mod timer;
pub mod worker;

// Re-exports for convenience
pub use batcher::{Batcher, BatcherBuilder, LifecycleState};
pub use buffer::BatchQueue;
pub use config::{
    BatcherConfig, DEFAULT_BATCH_INTERVAL, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE_BYTES,
    DEFAULT_QUEUE_CAPACITY,
};
pub use counter::PendingCounter;
pub use error::{BatcherError, BoxError, ProcessingError, Result};
pub use metrics::{BatcherMetrics, FlushReason, MetricsSnapshot};
pub use size::{estimate_size, EstimateSize, SizeVisitor};
pub use worker::{NoopProcessor, Processor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
