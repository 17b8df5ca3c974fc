use crate::counter::PendingCounter;
use crate::error::{BoxError, ProcessingError};
use crate::metrics::BatcherMetrics;
use crossbeam::channel::{Receiver, Sender};
use crossbeam::select;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// User-supplied handler for completed batches
pub trait Processor<T>: Send + 'static {
    /// Process one batch. A returned error is reported on the error stream;
    /// the batch is not retried.
    fn process(&mut self, batch: Vec<T>) -> Result<(), BoxError>;

    /// Get a human-readable name for this processor
    fn name(&self) -> &str {
        "processor"
    }
}

impl<T, F, E> Processor<T> for F
where
    F: FnMut(Vec<T>) -> Result<(), E> + Send + 'static,
    E: Into<BoxError>,
{
    fn process(&mut self, batch: Vec<T>) -> Result<(), BoxError> {
        self(batch).map_err(Into::into)
    }
}

/// Processor that discards every batch
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProcessor;

impl<T> Processor<T> for NoopProcessor {
    fn process(&mut self, _batch: Vec<T>) -> Result<(), BoxError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Runs a processor against completed batches until shutdown is signalled
pub struct BatchWorker<T> {
    processor: Box<dyn Processor<T>>,
    batches: Receiver<Vec<T>>,
    shutdown: Receiver<()>,
    errors: Sender<ProcessingError>,
    pending: Arc<PendingCounter>,
    metrics: BatcherMetrics,
}

impl<T: Send + 'static> BatchWorker<T> {
    /// Create a worker draining `batches` until `shutdown` disconnects
    pub fn new(
        processor: Box<dyn Processor<T>>,
        batches: Receiver<Vec<T>>,
        shutdown: Receiver<()>,
        errors: Sender<ProcessingError>,
        pending: Arc<PendingCounter>,
        metrics: BatcherMetrics,
    ) -> Self {
        Self {
            processor,
            batches,
            shutdown,
            errors,
            pending,
            metrics,
        }
    }

    /// Block processing batches in arrival order.
    ///
    /// Returns once the shutdown channel disconnects; batches still queued
    /// at that point are left unprocessed.
    pub fn run(mut self) {
        debug!(processor = self.processor.name(), "batch worker started");

        loop {
            select! {
                recv(self.shutdown) -> _ => break,
                recv(self.batches) -> msg => match msg {
                    Ok(batch) => self.process(batch),
                    Err(_) => break,
                },
            }
        }

        debug!(
            processor = self.processor.name(),
            abandoned_batches = self.batches.len(),
            "batch worker stopped"
        );
    }

    fn process(&mut self, batch: Vec<T>) {
        let len = batch.len();
        let start = Instant::now();
        let result = self.processor.process(batch);
        let elapsed = start.elapsed();

        self.metrics.record_processed(len, elapsed, result.is_err());

        if let Err(source) = result {
            warn!(
                processor = self.processor.name(),
                batch_len = len,
                error = %source,
                "batch processing failed"
            );
            let _ = self.errors.send(ProcessingError {
                batch_len: len,
                source,
            });
        }

        self.pending.add(-(len as i64));
    }
}
