//! Persistent tier backends.
//!
//! The interface is deliberately synchronous and string-typed, mirroring a
//! browser's local storage. The cache swallows every error these return.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use redis::Commands;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage quota exceeded: {needed} bytes needed, limit is {limit}")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store file is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Synchronous key/value store backing the cache's persistent tier.
pub trait PersistentStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove_item(&self, key: &str) -> Result<(), StoreError>;
    /// Every stored key that starts with `prefix`.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

// ────────────────────────────────────────────────────────────────────────────
// MemoryStore
// ────────────────────────────────────────────────────────────────────────────

/// Process-local store. With a quota it behaves like browser local storage
/// when the origin runs out of space.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }
}

impl PersistentStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(limit) = self.quota_bytes {
            let used: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = used + key.len() + value.len();
            if needed > limit {
                return Err(StoreError::QuotaExceeded { needed, limit });
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
        items.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(items
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FileStore
// ────────────────────────────────────────────────────────────────────────────

/// A single JSON object on disk, rewritten on every mutation.
/// Suitable for a single-user desktop deployment.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens (or lazily creates) the store at `path`. A missing file is an
    /// empty store; an unreadable one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let items = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(
            "File cache store opened at {} ({} items)",
            path.display(),
            items.len()
        );
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, items: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(items)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PersistentStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
        let previous = items.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&items) {
            // Keep memory and disk in step when the write fails.
            match previous {
                Some(old) => items.insert(key.to_string(), old),
                None => items.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
        if items.remove(key).is_some() {
            self.flush(&items)?;
        }
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(items
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RedisStore
// ────────────────────────────────────────────────────────────────────────────

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const REDIS_IO_TIMEOUT: Duration = Duration::from_millis(500);

/// Redis-backed persistent tier. The store interface is synchronous, so this
/// keeps one blocking connection with bounded connect and I/O timeouts and
/// reconnects on the next call after any failure.
pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<redis::Connection>>,
}

impl RedisStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            connection: Mutex::new(None),
        }
    }

    fn connect(&self) -> Result<redis::Connection, StoreError> {
        let con = self.client.get_connection_with_timeout(REDIS_CONNECT_TIMEOUT)?;
        con.set_read_timeout(Some(REDIS_IO_TIMEOUT))?;
        con.set_write_timeout(Some(REDIS_IO_TIMEOUT))?;
        debug!("Redis cache store connected");
        Ok(con)
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, StoreError> {
        let mut slot = self.connection.lock().map_err(|_| StoreError::Poisoned)?;
        let mut con = match slot.take() {
            Some(con) => con,
            None => self.connect()?,
        };
        let result = op(&mut con)?;
        *slot = Some(con);
        Ok(result)
    }
}

impl PersistentStore for RedisStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_connection(|con| con.get(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_connection(|con| con.set::<_, _, ()>(key, value))
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.with_connection(|con| con.del::<_, ()>(key))
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{}*", escape_glob(prefix));
        let keys: Vec<String> =
            self.with_connection(|con| Ok(con.scan_match::<_, String>(&pattern)?.collect()))?;
        debug!("Redis scan {pattern} matched {} keys", keys.len());
        Ok(keys)
    }
}

/// Escapes Redis glob metacharacters so a prefix matches literally.
fn escape_glob(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_quota_rejects_oversized_write() {
        let store = MemoryStore::with_quota(16);
        store.set_item("a", "12345").unwrap();
        let err = store.set_item("b", "this value is far too long").unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { limit: 16, .. }));
        assert!(store.get_item("b").unwrap().is_none());
    }

    #[test]
    fn test_memory_store_overwrite_does_not_double_count() {
        let store = MemoryStore::with_quota(10);
        store.set_item("k", "12345678").unwrap();
        store.set_item("k", "87654321").unwrap();
        assert_eq!(store.get_item("k").unwrap().as_deref(), Some("87654321"));
    }

    #[test]
    fn test_memory_store_keys_by_prefix() {
        let store = MemoryStore::new();
        store.set_item("coach:analysis:1", "x").unwrap();
        store.set_item("coach:research:2", "y").unwrap();
        store.set_item("other:3", "z").unwrap();
        let mut keys = store.keys("coach:").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["coach:analysis:1", "coach:research:2"]);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("store.json");

        let store = FileStore::open(&path).unwrap();
        store.set_item("coach:answer:abc", "{\"v\":1}").unwrap();
        store.set_item("coach:answer:def", "{\"v\":2}").unwrap();
        store.remove_item("coach:answer:def").unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get_item("coach:answer:abc").unwrap().as_deref(),
            Some("{\"v\":1}")
        );
        assert!(reopened.get_item("coach:answer:def").unwrap().is_none());
        assert_eq!(reopened.keys("coach:").unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_file_store_prefix_scan_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("s.json")).unwrap();
        store.set_item("coach:a", "1").unwrap();
        store.set_item("coach:b", "2").unwrap();
        store.set_item("coachx:c", "3").unwrap();
        store.set_item("zzz", "4").unwrap();
        assert_eq!(store.keys("coach:").unwrap(), vec!["coach:a", "coach:b"]);
    }

    #[test]
    fn test_unreachable_redis_fails_fast() {
        // Port 9 (discard) is closed on test hosts; the connect is refused or times out.
        let store = RedisStore::new(redis::Client::open("redis://127.0.0.1:9/").unwrap());
        let started = std::time::Instant::now();
        assert!(matches!(store.get_item("coach:a"), Err(StoreError::Redis(_))));
        assert!(store.set_item("coach:a", "1").is_err());
        assert!(started.elapsed() < REDIS_CONNECT_TIMEOUT * 4);
        assert!(store.connection.lock().unwrap().is_none());
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("coach:"), "coach:");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }
}
