//! Two-tier result cache.
//!
//! Tier one is an in-process map; tier two is a [`PersistentStore`] that
//! outlives the process. Expiration is checked lazily on read. Nothing sweeps
//! the persistent tier, so expired entries stay there until they are read,
//! overwritten, or cleared.
//!
//! The map lock guards the in-process tier only. Each check-then-mutate on
//! the map happens under a single hold of it, and no `.await` can split the
//! two. Persistent-tier calls run after the lock is released, so a slow store
//! delays the caller that hit it but never the in-process hits of others.

pub mod clock;
pub mod key;
pub mod store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub use clock::{Clock, SystemClock};
pub use key::CacheKey;
pub use store::{FileStore, MemoryStore, PersistentStore, RedisStore};

/// A cached value plus the bookkeeping needed to expire it.
/// Entries are replaced on write, never patched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub written_at: DateTime<Utc>,
    #[serde(rename = "ttl_ms", with = "ttl_millis")]
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    /// Valid iff `now - written_at < ttl`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.written_at).to_std() {
            Ok(age) => age < self.ttl,
            // Written "in the future" relative to this clock.
            Err(_) => true,
        }
    }
}

mod ttl_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// How many entries a clear dropped from each tier.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub memory: usize,
    pub persistent: usize,
}

pub struct TwoTierCache {
    namespace: String,
    memory: Mutex<HashMap<String, CacheEntry<Value>>>,
    store: Option<Arc<dyn PersistentStore>>,
    clock: Arc<dyn Clock>,
}

impl TwoTierCache {
    /// `namespace` partitions this cache's keys inside the persistent store so
    /// `clear` never touches anything it did not write.
    pub fn new(
        namespace: impl Into<String>,
        store: Option<Arc<dyn PersistentStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            memory: Mutex::new(HashMap::new()),
            store,
            clock,
        }
    }

    /// In-process only, wall clock. Mostly for tests and `CACHE_STORE=memory`.
    pub fn in_memory(namespace: impl Into<String>) -> Self {
        Self::new(namespace, None, Arc::new(SystemClock))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(e) => {
                debug!("Cache entry {key} does not match the requested type: {e}");
                None
            }
        }
    }

    /// Raw lookup: memory, then persistent (promoting on hit).
    pub fn get_value(&self, key: &CacheKey) -> Option<Value> {
        let now = self.clock.now();
        let memory_key = key.to_string();

        {
            let mut memory = self.lock_memory();
            if let Some(entry) = memory.get(&memory_key) {
                if entry.is_valid_at(now) {
                    debug!("Cache hit (memory): {memory_key}");
                    return Some(entry.data.clone());
                }
                debug!("Cache entry expired (memory): {memory_key}");
                memory.remove(&memory_key);
            }
        }

        let store = self.store.as_ref()?;
        let persistent_key = self.persistent_key(&memory_key);

        let raw = match store.get_item(&persistent_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Persistent cache read failed for {persistent_key}: {e}");
                return None;
            }
        };

        let entry: CacheEntry<Value> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Dropping undecodable persistent cache entry {persistent_key}: {e}");
                self.remove_persistent(store.as_ref(), &persistent_key);
                return None;
            }
        };

        if !entry.is_valid_at(now) {
            debug!("Cache entry expired (persistent): {persistent_key}");
            self.remove_persistent(store.as_ref(), &persistent_key);
            return None;
        }

        let mut memory = self.lock_memory();
        // A write that landed while the store was being read wins.
        if let Some(current) = memory.get(&memory_key) {
            if current.is_valid_at(now) {
                return Some(current.data.clone());
            }
        }
        debug!("Cache hit (persistent, promoted): {memory_key}");
        let data = entry.data.clone();
        memory.insert(memory_key, entry);
        Some(data)
    }

    /// Writes through both tiers. Persistent failures are logged and
    /// swallowed; the in-process copy stays authoritative for this run.
    pub fn set<T: Serialize>(&self, key: &CacheKey, data: &T, ttl: Duration) {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(e) => {
                warn!("Not caching {key}: value does not serialize: {e}");
                return;
            }
        };
        let entry = CacheEntry {
            data,
            written_at: self.clock.now(),
            ttl,
        };
        let memory_key = key.to_string();
        let raw = self.store.as_ref().map(|_| serde_json::to_string(&entry));

        self.lock_memory().insert(memory_key.clone(), entry);

        let (Some(store), Some(raw)) = (&self.store, raw) else {
            return;
        };
        let persistent_key = self.persistent_key(&memory_key);
        match raw {
            Ok(raw) => {
                if let Err(e) = store.set_item(&persistent_key, &raw) {
                    warn!("Persistent cache write failed for {persistent_key}, keeping in-process copy only: {e}");
                }
            }
            Err(e) => warn!("Persistent cache entry {persistent_key} does not serialize: {e}"),
        }
    }

    pub fn remove(&self, key: &CacheKey) {
        let memory_key = key.to_string();
        self.lock_memory().remove(&memory_key);
        if let Some(store) = &self.store {
            self.remove_persistent(store.as_ref(), &self.persistent_key(&memory_key));
        }
    }

    /// Drops every entry under this cache's namespace.
    pub fn clear(&self) -> ClearReport {
        let memory = {
            let mut memory = self.lock_memory();
            let count = memory.len();
            memory.clear();
            count
        };
        ClearReport {
            memory,
            persistent: self.clear_persistent_prefix(&format!("{}:", self.namespace)),
        }
    }

    /// Drops every entry of one category (e.g. all research summaries).
    pub fn clear_category(&self, category: &str) -> ClearReport {
        let prefix = format!("{category}:");
        let memory = {
            let mut memory = self.lock_memory();
            let before = memory.len();
            memory.retain(|k, _| !k.starts_with(&prefix));
            before - memory.len()
        };
        ClearReport {
            memory,
            persistent: self.clear_persistent_prefix(&self.persistent_key(&prefix)),
        }
    }

    fn clear_persistent_prefix(&self, prefix: &str) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let keys = match store.keys(prefix) {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Could not enumerate persistent cache keys under {prefix}: {e}");
                return 0;
            }
        };
        keys.iter()
            .filter(|k| store.remove_item(k).is_ok())
            .count()
    }

    fn remove_persistent(&self, store: &dyn PersistentStore, persistent_key: &str) {
        if let Err(e) = store.remove_item(persistent_key) {
            warn!("Persistent cache delete failed for {persistent_key}: {e}");
        }
    }

    fn persistent_key(&self, memory_key: &str) -> String {
        format!("{}:{}", self.namespace, memory_key)
    }

    fn lock_memory(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<Value>>> {
        // A panic while holding the lock leaves the map consistent (every
        // mutation is a single insert/remove), so poisoning is ignored.
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
