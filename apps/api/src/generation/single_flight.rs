//! Per-key in-flight lock so concurrent identical cache misses share one
//! backend call. The leader generates and writes the cache; followers wait
//! for the lock, re-check the cache, and hit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct SingleFlight {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other caller holds `key`. Released on drop.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.retain(|_, weak| weak.strong_count() > 0);
            match locks.get(key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(AsyncMutex::new(()));
                    locks.insert(key.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        let mut locks = self.locks.lock().unwrap();
        locks.retain(|_, weak| weak.strong_count() > 0);
        locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let flights = Arc::new(SingleFlight::new());
        let guard = flights.acquire("k").await;

        let waiter = {
            let flights = flights.clone();
            tokio::spawn(async move {
                let _guard = flights.acquire("k").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "second caller must wait for the first");
        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let flights = SingleFlight::new();
        let _a = flights.acquire("a").await;
        let _b = tokio::time::timeout(Duration::from_millis(50), flights.acquire("b"))
            .await
            .expect("independent key should not wait");
    }

    #[tokio::test]
    async fn test_released_keys_are_forgotten() {
        let flights = SingleFlight::new();
        drop(flights.acquire("a").await);
        drop(flights.acquire("b").await);
        assert_eq!(flights.tracked_keys(), 0);
    }
}
