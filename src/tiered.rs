//! Two-tier cache facade: memory first, disk as reload warmth
//!
//! `TieredCache` composes the bounded in-memory cache with an optional
//! persistent partition. Reads check memory first and only touch disk on a
//! miss, promoting disk hits back into memory. Writes update memory
//! synchronously and mirror to disk in the background, so the common path
//! never waits on I/O and a persistent-tier failure can only ever cost
//! reload warmth, not session correctness.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use directories::ProjectDirs;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::memory::MemoryCache;
use crate::persistent::{PersistedEntry, PersistentStore};

/// Configuration for one cache namespace
#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    /// Maximum number of entries held in memory
    pub max_size: usize,
    /// How long entries stay fresh, in memory and across reloads.
    /// `None` means entries never expire.
    pub ttl: Option<Duration>,
    /// Whether writes are mirrored to a persistent partition
    pub persistent: bool,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            ttl: Some(Duration::from_secs(5 * 60)),
            persistent: true,
        }
    }
}

/// Cache facade coordinating the memory and persistent tiers
///
/// Each instance owns one namespace: one bounded memory cache and, when
/// configured, one persistent partition named after the namespace. The
/// memory tier is authoritative for the current session; the persistent
/// tier is best-effort and its failures are logged, never surfaced.
#[derive(Debug)]
pub struct TieredCache<T> {
    memory: Mutex<MemoryCache<T>>,
    persistent: Option<Arc<PersistentStore>>,
    ttl: Option<Duration>,
}

impl<T> TieredCache<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    /// Creates a cache for `namespace` persisted under the platform cache
    /// directory of `app` (`~/.cache/<app>/<namespace>/` on Linux).
    ///
    /// When no platform cache directory can be determined, or persistence is
    /// disabled in the config, the cache runs memory-only.
    pub fn new(app: &str, namespace: &str, config: TieredCacheConfig) -> Self {
        let persistent = if config.persistent {
            match ProjectDirs::from("", "", app) {
                Some(dirs) => {
                    let dir = dirs.cache_dir().join(namespace);
                    Some(Arc::new(PersistentStore::new(dir)))
                }
                None => {
                    tracing::warn!(
                        namespace,
                        "no platform cache directory; running memory-only"
                    );
                    None
                }
            }
        } else {
            None
        };

        Self::build(persistent, config)
    }

    /// Creates a cache for `namespace` persisted under an explicit base
    /// directory. Useful for testing or sandboxed deployments.
    pub fn with_dir(base_dir: PathBuf, namespace: &str, config: TieredCacheConfig) -> Self {
        let persistent = config
            .persistent
            .then(|| Arc::new(PersistentStore::new(base_dir.join(namespace))));

        Self::build(persistent, config)
    }

    fn build(persistent: Option<Arc<PersistentStore>>, config: TieredCacheConfig) -> Self {
        let memory = match config.ttl {
            Some(ttl) => MemoryCache::with_default_ttl(config.max_size, ttl),
            None => MemoryCache::new(config.max_size),
        };

        Self {
            memory: Mutex::new(memory),
            persistent,
            ttl: config.ttl,
        }
    }

    /// Looks up `key`, memory tier first.
    ///
    /// A memory hit returns without any I/O. On a miss the persistent tier
    /// is consulted; a fresh record found there is promoted back into memory
    /// and returned. Stale records are dropped instead of promoted.
    /// Persistent-tier trouble is logged and reads as a miss.
    pub async fn get(&self, key: &str) -> Option<T> {
        let memory_hit = self.memory.lock().get(key).cloned();
        if let Some(value) = memory_hit {
            return Some(value);
        }

        let store = self.persistent.as_ref()?;
        let entry = match store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(key, error = %err, "persistent tier read failed");
                return None;
            }
        };

        if self.is_stale(&entry) {
            tracing::debug!(key, "persisted record is stale; dropping instead of promoting");
            let store = Arc::clone(store);
            let owned_key = key.to_string();
            spawn_mirror(async move {
                if let Err(err) = store.remove(&owned_key).await {
                    tracing::warn!(key = %owned_key, error = %err, "failed to drop stale record");
                }
            });
            return None;
        }

        let value: T = match serde_json::from_value(entry.value) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %err, "persisted record failed to decode");
                return None;
            }
        };

        self.memory.lock().set(key, value.clone());
        Some(value)
    }

    /// Writes `key` through both tiers.
    ///
    /// The memory tier is updated synchronously — a `get` on the same key
    /// immediately after `set` observes the new value. The persistent mirror
    /// write happens in the background and its failure is logged, never
    /// surfaced.
    pub fn set(&self, key: &str, value: T) {
        self.memory.lock().set(key, value.clone());

        let Some(store) = &self.persistent else {
            return;
        };
        let json = match serde_json::to_value(&value) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(key, error = %err, "value not serializable; skipping mirror write");
                return;
            }
        };

        let store = Arc::clone(store);
        let owned_key = key.to_string();
        spawn_mirror(async move {
            if let Err(err) = store.set(&owned_key, json).await {
                tracing::warn!(key = %owned_key, error = %err, "persistent tier write failed");
            }
        });
    }

    /// Removes `key` from both tiers; the persistent leg is best-effort.
    pub fn remove(&self, key: &str) {
        self.memory.lock().remove(key);

        if let Some(store) = &self.persistent {
            let store = Arc::clone(store);
            let owned_key = key.to_string();
            spawn_mirror(async move {
                if let Err(err) = store.remove(&owned_key).await {
                    tracing::warn!(key = %owned_key, error = %err, "persistent tier remove failed");
                }
            });
        }
    }

    /// Empties both tiers; the persistent leg is best-effort.
    pub fn clear(&self) {
        self.memory.lock().clear();

        if let Some(store) = &self.persistent {
            let store = Arc::clone(store);
            spawn_mirror(async move {
                if let Err(err) = store.clear().await {
                    tracing::warn!(error = %err, "persistent tier clear failed");
                }
            });
        }
    }

    /// Whether `key` is live in the memory tier. The persistent tier is not
    /// consulted, which keeps this synchronous.
    pub fn contains(&self, key: &str) -> bool {
        self.memory.lock().contains(key)
    }

    /// Number of entries in the memory tier.
    pub fn len(&self) -> usize {
        self.memory.lock().len()
    }

    /// Whether the memory tier is empty.
    pub fn is_empty(&self) -> bool {
        self.memory.lock().is_empty()
    }

    /// Whether a persisted record has outlived this cache's TTL.
    fn is_stale(&self, entry: &PersistedEntry) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        let age = Utc::now().signed_duration_since(entry.timestamp);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => age > ttl,
            // TTL too large for the calendar type; nothing is that old
            Err(_) => false,
        }
    }
}

/// Runs a best-effort persistent-tier leg in the background.
///
/// Outside a Tokio runtime there is nowhere to run it; the leg is skipped
/// with a warning and the memory tier stays authoritative.
fn spawn_mirror<F>(work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(work);
        }
        Err(_) => {
            tracing::warn!("no async runtime available; skipping persistent tier update");
        }
    }
}
