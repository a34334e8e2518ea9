//! Shared sensor bus with bounded-wait arbitration

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("sensor bus busy for {0:?}")]
pub struct BusTimeout(pub Duration);

/// Handle to the bus shared by every sensor behind it.
///
/// Holding the returned guard grants exclusive use; it is released on drop.
#[derive(Debug, Clone, Default)]
pub struct SensorBus {
    lock: Arc<Mutex<()>>,
}

impl SensorBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, wait: Duration) -> Result<OwnedMutexGuard<()>, BusTimeout> {
        tokio::time::timeout(wait, self.lock.clone().lock_owned())
            .await
            .map_err(|_| BusTimeout(wait))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_times_out_while_held() {
        let bus = SensorBus::new();
        let held = bus.acquire(Duration::from_millis(10)).await.unwrap();

        let other = bus.clone();
        let err = other.acquire(Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, BusTimeout(Duration::from_millis(10)));

        drop(held);
        assert!(other.acquire(Duration::from_millis(10)).await.is_ok());
    }
}
