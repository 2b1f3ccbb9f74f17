//! Latency injection for storage.
//!
//! [`SlowStorage`] delays reads, writes, truncates and syncs of an inner
//! store by a random amount drawn from a seeded RNG, so a failing run can be
//! replayed with the same seed. Length queries are never delayed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::StoreError;
use crate::traits::RandomAccess;

/// Inclusive range of delays, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Latency {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Latency {
    /// No delay at all.
    pub const NONE: Latency = Latency { min_ms: 0, max_ms: 0 };

    /// Uniformly random delay between `min_ms` and `max_ms`.
    pub fn ms(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms: max_ms.max(min_ms),
        }
    }

    fn sample(&self, rng: &Mutex<StdRng>) -> Duration {
        let ms = if self.min_ms == self.max_ms {
            self.min_ms
        } else {
            rng.lock()
                .expect("rng lock poisoned")
                .random_range(self.min_ms..=self.max_ms)
        };
        Duration::from_millis(ms)
    }
}

/// A [`RandomAccess`] whose IO is slowed by random, reproducible delays.
pub struct SlowStorage {
    inner: Arc<dyn RandomAccess>,
    read: Latency,
    write: Latency,
    rng: Mutex<StdRng>,
}

impl SlowStorage {
    pub fn new(inner: Arc<dyn RandomAccess>, read: Latency, write: Latency, seed: u64) -> Self {
        Self {
            inner,
            read,
            write,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    async fn pause(&self, latency: Latency) {
        let delay = latency.sample(&self.rng);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl RandomAccess for SlowStorage {
    async fn read(&self, offset: u64, len: u64) -> Result<Bytes, StoreError> {
        self.pause(self.read).await;
        self.inner.read(offset, len).await
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<(), StoreError> {
        self.pause(self.write).await;
        self.inner.write(offset, data).await
    }

    async fn len(&self) -> Result<u64, StoreError> {
        self.inner.len().await
    }

    async fn truncate(&self, len: u64) -> Result<(), StoreError> {
        self.pause(self.write).await;
        self.inner.truncate(len).await
    }

    async fn sync(&self) -> Result<(), StoreError> {
        self.pause(self.write).await;
        self.inner.sync().await
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::MemoryStorage;

    #[tokio::test]
    async fn test_no_latency_passes_through() {
        let slow = SlowStorage::new(Arc::new(MemoryStorage::new()), Latency::NONE, Latency::NONE, 1);
        slow.write(0, b"abc").await.unwrap();
        assert_eq!(&slow.read(0, 3).await.unwrap()[..], b"abc");
        assert_eq!(slow.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_write_latency_is_applied() {
        let slow = SlowStorage::new(
            Arc::new(MemoryStorage::new()),
            Latency::NONE,
            Latency::ms(20, 20),
            7,
        );

        let started = Instant::now();
        slow.write(0, b"x").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_latency_range_is_ordered() {
        assert_eq!(Latency::ms(9, 3), Latency { min_ms: 3, max_ms: 9 });
    }
}
