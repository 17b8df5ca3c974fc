use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a batch was cut
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Item count reached the batch size
    Count,
    /// Estimated bytes reached the byte ceiling
    Bytes,
    /// The batch interval elapsed
    Timer,
    /// Final flush during close
    Close,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushReason::Count => "count",
            FlushReason::Bytes => "bytes",
            FlushReason::Timer => "timer",
            FlushReason::Close => "close",
        };
        f.write_str(name)
    }
}

/// A simple percentile tracker that maintains a sliding window of measurements
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a new percentile tracker with a specified window size
    pub fn new(window_size: usize) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    /// Record a measurement (in nanoseconds)
    pub fn record(&self, nanos: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(nanos);
    }

    pub fn p50_us(&self) -> f64 {
        self.percentile(0.50)
    }

    pub fn p99_us(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let measurements = self.measurements.lock();
        if measurements.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<_> = measurements.iter().copied().collect();
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

/// Counters describing one batcher's activity
#[derive(Debug, Clone)]
pub struct BatcherMetrics {
    inner: Arc<Counters>,
    processing_latency: PercentileTracker,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    items_accepted: AtomicU64,
    items_rejected: AtomicU64,
    flushed_on_count: AtomicU64,
    flushed_on_bytes: AtomicU64,
    flushed_on_timer: AtomicU64,
    flushed_on_close: AtomicU64,
    batches_processed: AtomicU64,
    items_processed: AtomicU64,
    processing_failures: AtomicU64,
}

impl BatcherMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Counters::default()),
            processing_latency: PercentileTracker::new(1000),
            start_time: Instant::now(),
        }
    }

    pub fn record_accepted(&self) {
        self.inner.items_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Item offered after the batcher stopped accepting
    pub fn record_rejected(&self) {
        self.inner.items_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, reason: FlushReason) {
        let counter = match reason {
            FlushReason::Count => &self.inner.flushed_on_count,
            FlushReason::Bytes => &self.inner.flushed_on_bytes,
            FlushReason::Timer => &self.inner.flushed_on_timer,
            FlushReason::Close => &self.inner.flushed_on_close,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one processor call
    pub fn record_processed(&self, items: usize, elapsed: Duration, failed: bool) {
        self.inner.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .items_processed
            .fetch_add(items as u64, Ordering::Relaxed);
        if failed {
            self.inner.processing_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.processing_latency.record(elapsed.as_nanos() as u64);
    }

    pub fn items_accepted(&self) -> u64 {
        self.inner.items_accepted.load(Ordering::Relaxed)
    }

    pub fn items_processed(&self) -> u64 {
        self.inner.items_processed.load(Ordering::Relaxed)
    }

    pub fn batches_processed(&self) -> u64 {
        self.inner.batches_processed.load(Ordering::Relaxed)
    }

    pub fn flushes(&self, reason: FlushReason) -> u64 {
        let counter = match reason {
            FlushReason::Count => &self.inner.flushed_on_count,
            FlushReason::Bytes => &self.inner.flushed_on_bytes,
            FlushReason::Timer => &self.inner.flushed_on_timer,
            FlushReason::Close => &self.inner.flushed_on_close,
        };
        counter.load(Ordering::Relaxed)
    }

    /// Items processed per second since creation
    pub fn throughput_ips(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.items_processed() as f64 / elapsed
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.inner;
        MetricsSnapshot {
            items_accepted: c.items_accepted.load(Ordering::Relaxed),
            items_rejected: c.items_rejected.load(Ordering::Relaxed),
            flushed_on_count: c.flushed_on_count.load(Ordering::Relaxed),
            flushed_on_bytes: c.flushed_on_bytes.load(Ordering::Relaxed),
            flushed_on_timer: c.flushed_on_timer.load(Ordering::Relaxed),
            flushed_on_close: c.flushed_on_close.load(Ordering::Relaxed),
            batches_processed: c.batches_processed.load(Ordering::Relaxed),
            items_processed: c.items_processed.load(Ordering::Relaxed),
            processing_failures: c.processing_failures.load(Ordering::Relaxed),
            throughput_ips: self.throughput_ips(),
            latency_p50_us: self.processing_latency.p50_us(),
            latency_p99_us: self.processing_latency.p99_us(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for BatcherMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub items_accepted: u64,
    pub items_rejected: u64,
    pub flushed_on_count: u64,
    pub flushed_on_bytes: u64,
    pub flushed_on_timer: u64,
    pub flushed_on_close: u64,
    pub batches_processed: u64,
    pub items_processed: u64,
    pub processing_failures: u64,
    pub throughput_ips: f64,
    pub latency_p50_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Batches cut for any reason
    pub fn batches_flushed(&self) -> u64 {
        self.flushed_on_count + self.flushed_on_bytes + self.flushed_on_timer + self.flushed_on_close
    }

    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Accepted: {}, Rejected: {}, Flushed: {} (count {}, bytes {}, timer {}, close {}), \
             Processed: {} items in {} batches, Failures: {}, Throughput: {:.2} items/s, \
             Latency P50: {:.2}µs, P99: {:.2}µs, Elapsed: {:.2}s",
            self.items_accepted,
            self.items_rejected,
            self.batches_flushed(),
            self.flushed_on_count,
            self.flushed_on_bytes,
            self.flushed_on_timer,
            self.flushed_on_close,
            self.items_processed,
            self.batches_processed,
            self.processing_failures,
            self.throughput_ips,
            self.latency_p50_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}
