// Fixed-capacity pool of fetch slots.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held fetch slot. Dropping it releases the slot.
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<SlotPermit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(SlotPermit { _permit: permit }),
            Err(_) => {
                debug!("no free fetch slot ({} in use)", self.capacity);
                None
            }
        }
    }

    /// Wait at most `timeout` for a slot.
    pub async fn acquire_within(&self, timeout: Duration) -> Option<SlotPermit> {
        if let Some(permit) = self.try_acquire() {
            return Some(permit);
        }
        match tokio::time::timeout(timeout, Arc::clone(&self.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => Some(SlotPermit { _permit: permit }),
            _ => None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_acquire_respects_capacity() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.try_acquire();
        let b = limiter.try_acquire();
        assert!(a.is_some() && b.is_some());
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.in_use(), 2);

        drop(a);
        assert_eq!(limiter.in_use(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.capacity(), 1);
    }

    #[tokio::test]
    async fn test_acquire_within_times_out_then_succeeds() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.try_acquire().unwrap();
        assert!(limiter
            .acquire_within(Duration::from_millis(20))
            .await
            .is_none());

        drop(held);
        assert!(limiter
            .acquire_within(Duration::from_millis(20))
            .await
            .is_some());
    }
}
