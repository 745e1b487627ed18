//! Admission control for remote cache requests
//!
//! Every network operation holds a [`RequestSlot`] for its full duration,
//! including body transfer. The slot is returned when the guard drops, so
//! early returns, errors and cancelled futures all release it.

use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Number of concurrent remote cache requests allowed by default
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 20;

/// Bounded gate over concurrent remote cache requests
#[derive(Debug, Clone)]
pub struct RequestLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held limiter slot; released on drop
#[derive(Debug)]
pub struct RequestSlot {
    _permit: OwnedSemaphorePermit,
}

impl Default for RequestLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_REQUESTS)
    }
}

impl RequestLimiter {
    /// Create a limiter with `capacity` slots (at least one)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<RequestSlot> {
        // The semaphore is never closed; a closed error means the limiter was torn down.
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::configuration("request limiter is closed"))?;
        Ok(RequestSlot { _permit: permit })
    }

    /// Total number of slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slot_released_on_drop() {
        let limiter = RequestLimiter::new(2);
        let a = limiter.acquire().await.unwrap();
        let b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);
        drop(a);
        assert_eq!(limiter.available(), 1);
        drop(b);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let limiter = RequestLimiter::new(1);
        let held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(RequestLimiter::new(0).capacity(), 1);
        assert_eq!(
            RequestLimiter::default().capacity(),
            DEFAULT_MAX_CONCURRENT_REQUESTS
        );
    }
}
