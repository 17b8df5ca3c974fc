use std::sync::atomic::{AtomicI64, Ordering};

/// Count of items accepted but not yet handed to the processor.
///
/// Signed so a decrement racing ahead of its increment never wraps.
#[derive(Debug, Default)]
pub struct PendingCounter {
    value: AtomicI64,
}

impl PendingCounter {
    /// Create a counter starting at zero
    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    /// Adjust the count by `delta`
    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::AcqRel);
    }

    /// Current count
    pub fn read(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Zero the count
    pub fn reset(&self) {
        self.value.store(0, Ordering::Release);
    }
}
