use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::NightshiftError;

/// Bounds how many agent runs execute at once.
#[derive(Clone)]
pub struct RunSlots {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl RunSlots {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { semaphore: Arc::new(Semaphore::new(capacity)), capacity }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, NightshiftError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| NightshiftError::Internal("run slots closed".into()))
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse new runs; waiters fail immediately.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Default for RunSlots {
    fn default() -> Self {
        Self::new(4)
    }
}
