//! Counting-permit admission control for concurrent fetches.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use articlepipe_shared::{ArticlePipeError, Result};

/// Limits how many fetch units run at once.
///
/// Waiters are admitted in FIFO order. Cloning shares the same permits.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Proof of admission. The slot is returned when this is dropped, so release
/// happens on every exit path, including unwinding.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `capacity` holders.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ArticlePipeError::config("concurrency must be at least 1"));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(ArticlePipeError::config(format!(
                "concurrency {capacity} exceeds the maximum of {}",
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Wait until fewer than `capacity` permits are held, then take one.
    pub async fn acquire(&self) -> GatePermit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("gate semaphore is never closed");
        GatePermit { _permit: permit }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
