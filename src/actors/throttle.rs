//! Process-wide cap on concurrently probed hosts
//!
//! A counting semaphore plus an atomic holder count used purely for
//! observability. One [`Throttle`] is owned by the orchestrator and cloned
//! into every executor; clones share the same slots.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct Throttle {
    semaphore: Arc<Semaphore>,
    holders: Arc<AtomicUsize>,
    capacity: usize,
}

impl Throttle {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            holders: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Wait for a free slot and take it
    ///
    /// The slot is released when the returned permit is dropped.
    pub async fn acquire(&self) -> ThrottlePermit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("throttle semaphore is never closed");

        let holders = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("locked. concurrency: {holders}/{}", self.capacity());

        ThrottlePermit {
            _permit: permit,
            holders: Arc::clone(&self.holders),
        }
    }

    /// Number of permits currently held
    pub fn in_flight(&self) -> usize {
        self.holders.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A held throttle slot
#[derive(Debug)]
pub struct ThrottlePermit {
    _permit: OwnedSemaphorePermit,
    holders: Arc<AtomicUsize>,
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        // decrement before the semaphore permit is returned
        let holders = self.holders.fetch_sub(1, Ordering::SeqCst) - 1;
        trace!("unlocked. concurrency: {holders}");
    }
}
