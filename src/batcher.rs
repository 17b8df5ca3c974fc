use crate::buffer::BatchQueue;
use crate::config::BatcherConfig;
use crate::counter::PendingCounter;
use crate::error::{BatcherError, ProcessingError, Result};
use crate::metrics::{BatcherMetrics, FlushReason};
use crate::size::{estimate_size, EstimateSize};
use crate::timer::{self, FlushTimer, TimerToken};
use crate::worker::{BatchWorker, NoopProcessor, Processor};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// How often `join` re-reads the pending count
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Upper bound on the capacity reserved for a fresh batch
const MAX_PREALLOCATED: usize = 1024;

/// Lifecycle of a batcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Accepting items
    Open,
    /// `close` is flushing and draining; new items are rejected
    Closing,
    /// Shutdown has been signalled
    Closed,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Open,
            1 => LifecycleState::Closing,
            _ => LifecycleState::Closed,
        }
    }
}

/// The batch being filled
struct CurrentBatch<T> {
    items: Vec<T>,
    size_bytes: usize,
    timer: Option<TimerToken>,
}

/// State shared between producers, the timer thread and the batcher handle
struct Shared<T> {
    name: String,
    config: BatcherConfig,
    state: AtomicU8,
    pending: Arc<PendingCounter>,
    batch: Mutex<CurrentBatch<T>>,
    queue: BatchQueue<T>,
    timer: FlushTimer,
    worker: Mutex<Option<BatchWorker<T>>>,
    shutdown: Mutex<Option<Sender<()>>>,
    errors: Receiver<ProcessingError>,
    metrics: BatcherMetrics,
    close_outcome: OnceLock<Option<(Duration, i64)>>,
}

impl<T> Shared<T> {
    fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_shut_down(&self) -> bool {
        self.state() == LifecycleState::Closed
    }

    /// Flush that would be needed before appending an item of `item_size` bytes
    fn overflow_reason(&self, batch: &CurrentBatch<T>, item_size: usize) -> Option<FlushReason> {
        if batch.items.len() + 1 > self.config.batch_size {
            return Some(FlushReason::Count);
        }
        if self.config.bytes_limited()
            && batch.size_bytes.saturating_add(item_size) > self.config.batch_size_bytes
        {
            return Some(FlushReason::Bytes);
        }
        None
    }

    /// Flush warranted by the batch as it stands
    fn limit_reason(&self, batch: &CurrentBatch<T>) -> Option<FlushReason> {
        if batch.items.len() >= self.config.batch_size {
            return Some(FlushReason::Count);
        }
        if self.config.bytes_limited() && batch.size_bytes >= self.config.batch_size_bytes {
            return Some(FlushReason::Bytes);
        }
        None
    }

    /// Hand the current batch to the processing queue. Caller holds the batch lock.
    ///
    /// Waits while the queue is full. Producer and timer flushes (no `deadline`)
    /// give up as soon as close begins, so close can take the batch lock; the
    /// close flush itself waits until `deadline`. An interrupted hand-off leaves
    /// the batch in place.
    fn flush(
        &self,
        batch: &mut CurrentBatch<T>,
        reason: FlushReason,
        deadline: Option<Instant>,
    ) -> bool {
        if batch.items.is_empty() || self.is_shut_down() {
            return false;
        }

        let capacity = self.config.batch_size.min(MAX_PREALLOCATED);
        let items = std::mem::replace(&mut batch.items, Vec::with_capacity(capacity));
        let len = items.len();

        let stop = || match deadline {
            Some(deadline) => self.is_shut_down() || Instant::now() >= deadline,
            None => self.state() != LifecycleState::Open,
        };
        match self.queue.push_until(items, stop) {
            Ok(()) => {
                let size_bytes = std::mem::take(&mut batch.size_bytes);
                if let Some(token) = batch.timer.take() {
                    self.timer.cancel(token);
                }
                self.metrics.record_flush(reason);
                debug!(
                    batcher = %self.name,
                    %reason,
                    batch_len = len,
                    size_bytes,
                    "flushed batch"
                );
                true
            }
            Err(items) => {
                batch.items = items;
                warn!(
                    batcher = %self.name,
                    %reason,
                    batch_len = len,
                    "batch hand-off interrupted"
                );
                false
            }
        }
    }

    /// Timer callback. Only the timer that belongs to the current batch may flush it.
    fn flush_on_timer(&self, token: TimerToken) {
        let mut batch = self.batch.lock();
        if batch.timer != Some(token) {
            trace!(batcher = %self.name, "ignoring stale flush timer");
            return;
        }
        self.flush(&mut batch, FlushReason::Timer, None);
    }

    fn join(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let deadline = start + timeout;
        loop {
            let pending = self.pending.read();
            if pending <= 0 {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BatcherError::Timeout {
                    waited: now - start,
                    pending,
                });
            }
            thread::sleep(JOIN_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn close_once(&self) -> Option<(Duration, i64)> {
        let _ = self.state.compare_exchange(
            LifecycleState::Open as u8,
            LifecycleState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        {
            let mut batch = self.batch.lock();
            let backlog = self.pending.read();
            let deadline = Instant::now() + self.config.drain_timeout(backlog);
            self.flush(&mut batch, FlushReason::Close, Some(deadline));
        }

        let pending = self.pending.read();
        let timeout = self.config.drain_timeout(pending);
        debug!(batcher = %self.name, pending, ?timeout, "draining batcher");

        let outcome = match self.join(timeout) {
            Ok(()) => None,
            Err(BatcherError::Timeout { waited, pending }) => Some((waited, pending)),
            Err(_) => None,
        };

        self.signal_shutdown();

        match outcome {
            None => info!(batcher = %self.name, "batcher closed"),
            Some((waited, pending)) => warn!(
                batcher = %self.name,
                ?waited,
                pending,
                "batcher closed before pending items drained"
            ),
        }
        outcome
    }

    /// Mark the batcher closed and release every waiting thread
    fn signal_shutdown(&self) {
        self.state
            .store(LifecycleState::Closed as u8, Ordering::Release);
        self.shutdown.lock().take();
        self.worker.lock().take();
        self.timer.stop();
    }
}

/// Concurrent batching accumulator.
///
/// Items passed to [`Batcher::add`] are grouped into batches that are cut when
/// they reach `batch_size` items, when their estimated size reaches
/// `batch_size_bytes`, or when `batch_interval` has passed since the first
/// item of the batch arrived. Batches are processed one at a time, in the
/// order they were cut, on a dedicated worker thread.
pub struct Batcher<T>
where
    T: EstimateSize + Send + 'static,
{
    shared: Arc<Shared<T>>,
}

impl<T> Batcher<T>
where
    T: EstimateSize + Send + 'static,
{
    /// Start building a batcher
    pub fn builder() -> BatcherBuilder<T> {
        BatcherBuilder::new()
    }

    /// Batcher with default settings and the given processor
    pub fn new<P: Processor<T>>(processor: P) -> Result<Self> {
        BatcherBuilder::new().processor(processor).build()
    }

    /// Batcher from a configuration value and a processor
    pub fn from_config<P: Processor<T>>(config: BatcherConfig, processor: P) -> Result<Self> {
        BatcherBuilder::new().config(config).processor(processor).build()
    }

    /// Enqueue an item. Ignored unless the batcher is open.
    pub fn add(&self, item: T) {
        let shared = &*self.shared;
        if shared.state() != LifecycleState::Open {
            shared.metrics.record_rejected();
            return;
        }

        let item_size = if shared.config.bytes_limited() {
            estimate_size(&item)
        } else {
            0
        };

        let mut batch = shared.batch.lock();
        if shared.state() != LifecycleState::Open {
            shared.metrics.record_rejected();
            return;
        }

        if !batch.items.is_empty() {
            if let Some(reason) = shared.overflow_reason(&batch, item_size) {
                shared.flush(&mut batch, reason, None);
            }
        }

        batch.items.push(item);
        batch.size_bytes = batch.size_bytes.saturating_add(item_size);
        shared.pending.add(1);
        shared.metrics.record_accepted();

        if let Some(reason) = shared.limit_reason(&batch) {
            shared.flush(&mut batch, reason, None);
        }

        if !batch.items.is_empty() && batch.timer.is_none() {
            batch.timer = Some(shared.timer.schedule(shared.config.batch_interval));
        }
    }

    /// Items accepted but not yet processed
    pub fn len(&self) -> usize {
        self.shared.pending.read().max(0) as usize
    }

    /// True when no accepted item is waiting to be processed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completed batches waiting for the processor
    pub fn queued_batches(&self) -> usize {
        self.shared.queue.len()
    }

    /// Block until every accepted item has been processed or `timeout` passes
    pub fn join(&self, timeout: Duration) -> Result<()> {
        self.shared.join(timeout)
    }

    /// Flush, drain and shut down.
    ///
    /// Runs once; later and concurrent calls return the first call's outcome.
    /// A timeout means some accepted items were not processed.
    pub fn close(&self) -> Result<()> {
        let outcome = self
            .shared
            .close_outcome
            .get_or_init(|| self.shared.close_once());
        match *outcome {
            None => Ok(()),
            Some((waited, pending)) => Err(BatcherError::Timeout { waited, pending }),
        }
    }

    /// True once shutdown has been signalled
    pub fn is_closed(&self) -> bool {
        self.shared.is_shut_down()
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    /// Stream of processor failures.
    ///
    /// Unbounded: failures accumulate until read. The stream ends once the
    /// worker has stopped and buffered failures are consumed.
    pub fn errors(&self) -> Receiver<ProcessingError> {
        self.shared.errors.clone()
    }

    /// Launch the processing worker of a batcher built with `skip_auto_start`
    pub fn start(&self) -> Result<()> {
        let worker = self
            .shared
            .worker
            .lock()
            .take()
            .ok_or(BatcherError::AlreadyStarted)?;

        thread::Builder::new()
            .name(format!("{}-worker", self.shared.name))
            .spawn(move || worker.run())
            .map_err(BatcherError::Spawn)?;
        Ok(())
    }

    /// Normalized configuration in effect
    pub fn config(&self) -> &BatcherConfig {
        &self.shared.config
    }

    /// Counters and latency figures for this batcher
    pub fn metrics(&self) -> &BatcherMetrics {
        &self.shared.metrics
    }
}

impl<T> Drop for Batcher<T>
where
    T: EstimateSize + Send + 'static,
{
    fn drop(&mut self) {
        if self.shared.close_outcome.get().is_none() {
            let pending = self.shared.pending.read();
            if pending > 0 {
                warn!(batcher = %self.shared.name, pending, "batcher dropped without close");
            }
            self.shared.signal_shutdown();
        }
    }
}

/// Builder for [`Batcher`]
pub struct BatcherBuilder<T> {
    name: String,
    config: BatcherConfig,
    processor: Option<Box<dyn Processor<T>>>,
}

impl<T> BatcherBuilder<T>
where
    T: EstimateSize + Send + 'static,
{
    /// Create a new batcher builder with default settings
    pub fn new() -> Self {
        Self {
            name: "batcher".to_string(),
            config: BatcherConfig::default(),
            processor: None,
        }
    }

    /// Name used for thread names and log fields
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: BatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Maximum number of items per batch
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Byte ceiling per batch; 0 disables byte-based flushing
    pub fn batch_size_bytes(mut self, batch_size_bytes: usize) -> Self {
        self.config.batch_size_bytes = batch_size_bytes;
        self
    }

    /// Longest time a batch may wait for more items
    pub fn batch_interval(mut self, batch_interval: Duration) -> Self {
        self.config.batch_interval = batch_interval;
        self
    }

    /// Number of completed batches that may wait for the processor
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.config.queue_capacity = queue_capacity;
        self
    }

    /// Defer the processing worker until [`Batcher::start`]
    pub fn skip_auto_start(mut self) -> Self {
        self.config.skip_auto_start = true;
        self
    }

    /// Set the batch processor; defaults to [`NoopProcessor`]
    pub fn processor<P: Processor<T>>(mut self, processor: P) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    /// Build the batcher, spawning its timer thread and, unless deferred, its worker
    pub fn build(self) -> Result<Batcher<T>> {
        let config = self.config.normalized();
        let processor = self
            .processor
            .unwrap_or_else(|| Box::new(NoopProcessor) as Box<dyn Processor<T>>);

        let queue = BatchQueue::new(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let (errors_tx, errors_rx) = channel::unbounded();
        let pending = Arc::new(PendingCounter::new());
        let metrics = BatcherMetrics::new();
        let (flush_timer, timer_driver) = timer::timer();

        let worker = BatchWorker::new(
            processor,
            queue.receiver().clone(),
            shutdown_rx,
            errors_tx,
            Arc::clone(&pending),
            metrics.clone(),
        );

        let shared = Arc::new(Shared {
            name: self.name,
            batch: Mutex::new(CurrentBatch {
                items: Vec::with_capacity(config.batch_size.min(MAX_PREALLOCATED)),
                size_bytes: 0,
                timer: None,
            }),
            config,
            state: AtomicU8::new(LifecycleState::Open as u8),
            pending,
            queue,
            timer: flush_timer,
            worker: Mutex::new(Some(worker)),
            shutdown: Mutex::new(Some(shutdown_tx)),
            errors: errors_rx,
            metrics,
            close_outcome: OnceLock::new(),
        });

        let weak: Weak<Shared<T>> = Arc::downgrade(&shared);
        timer_driver.spawn(format!("{}-timer", shared.name), move |token| {
            if let Some(shared) = weak.upgrade() {
                shared.flush_on_timer(token);
            }
        })?;

        debug!(
            batcher = %shared.name,
            batch_size = shared.config.batch_size,
            batch_size_bytes = shared.config.batch_size_bytes,
            batch_interval = ?shared.config.batch_interval,
            "batcher created"
        );

        let batcher = Batcher { shared };
        if !batcher.shared.config.skip_auto_start {
            batcher.start()?;
        }
        Ok(batcher)
    }
}

impl<T> Default for BatcherBuilder<T>
where
    T: EstimateSize + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
