use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a blocked push waits before re-checking for shutdown
const PUSH_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Bounded hand-off queue between the flush engine and the processing worker
#[derive(Debug)]
pub struct BatchQueue<T> {
    tx: Sender<Vec<T>>,
    rx: Receiver<Vec<T>>,
    blocked_pushes: Arc<AtomicU64>,
}

impl<T> Clone for BatchQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            blocked_pushes: Arc::clone(&self.blocked_pushes),
        }
    }
}

impl<T> BatchQueue<T> {
    /// Create a queue holding at most `capacity` batches
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        Self {
            tx,
            rx,
            blocked_pushes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Push a batch, waiting for room until `is_shutdown` reports true.
    ///
    /// On shutdown the batch is handed back untouched.
    pub fn push_until<F>(&self, mut batch: Vec<T>, is_shutdown: F) -> Result<(), Vec<T>>
    where
        F: Fn() -> bool,
    {
        match self.tx.try_send(batch) {
            Ok(()) => return Ok(()),
            Err(e) => batch = e.into_inner(),
        }

        self.blocked_pushes.fetch_add(1, Ordering::Relaxed);
        loop {
            if is_shutdown() {
                return Err(batch);
            }
            match self.tx.send_timeout(batch, PUSH_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(b)) => batch = b,
                Err(SendTimeoutError::Disconnected(b)) => return Err(b),
            }
        }
    }

    /// Receiving end, consumed by the processing worker
    pub fn receiver(&self) -> &Receiver<Vec<T>> {
        &self.rx
    }

    /// Batches waiting to be processed
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }

    /// Queue utilization as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        ((self.len() * 100) / self.capacity().max(1)).min(100) as u32
    }

    /// Number of pushes that found the queue full
    pub fn blocked_pushes(&self) -> u64 {
        self.blocked_pushes.load(Ordering::Relaxed)
    }
}
