//! Bounded in-memory cache with per-entry expiry
//!
//! Provides a `MemoryCache` that holds values behind string keys with a
//! capacity bound and optional time-to-live. Eviction is FIFO by insertion
//! order, and expiry is checked lazily on access rather than by a background
//! sweep, so the store never needs a timer task.

use std::time::{Duration, Instant};

use indexmap::IndexMap;

/// A cached value together with its write-time metadata
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    /// The cached value
    value: T,
    /// When the value was written; never updated in place
    inserted: Instant,
    /// Per-entry TTL override; `None` falls back to the store default
    ttl: Option<Duration>,
}

impl<T> CacheEntry<T> {
    /// Whether the entry has outlived its TTL.
    ///
    /// An entry with no TTL of its own and no store default never expires.
    /// The boundary is strict: an entry whose elapsed time equals its TTL
    /// exactly is still valid.
    fn is_expired(&self, default_ttl: Option<Duration>) -> bool {
        match self.ttl.or(default_ttl) {
            Some(ttl) => self.inserted.elapsed() > ttl,
            None => false,
        }
    }
}

/// In-memory key/value cache with bounded size and lazy TTL expiry
///
/// The cache holds at most `max_size` entries. Inserting a new key at
/// capacity evicts the oldest-inserted surviving key first, regardless of
/// how recently it was read and regardless of whether it already expired.
/// Overwriting an existing key keeps its place in the insertion order and
/// never triggers eviction.
///
/// Expired entries are deleted as a side effect of the access that finds
/// them, so `len` may briefly count entries that are already stale.
#[derive(Debug)]
pub struct MemoryCache<T> {
    /// Entries in insertion order; order is what makes eviction FIFO
    entries: IndexMap<String, CacheEntry<T>>,
    /// Capacity bound enforced on every insert
    max_size: usize,
    /// TTL applied to entries that don't carry their own
    default_ttl: Option<Duration>,
}

impl<T> MemoryCache<T> {
    /// Creates a cache holding at most `max_size` entries, with no default
    /// TTL (entries without a per-entry TTL never expire).
    ///
    /// A capacity of zero is treated as one.
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            max_size: max_size.max(1),
            default_ttl: None,
        }
    }

    /// Creates a cache where entries expire `default_ttl` after being
    /// written unless they carry their own TTL.
    pub fn with_default_ttl(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            entries: IndexMap::new(),
            max_size: max_size.max(1),
            default_ttl: Some(default_ttl),
        }
    }

    /// Inserts or overwrites a value under `key`, expiring per the store
    /// default TTL.
    pub fn set(&mut self, key: impl Into<String>, value: T) {
        self.insert(key.into(), value, None);
    }

    /// Inserts or overwrites a value under `key` with its own TTL,
    /// overriding the store default for this entry only.
    pub fn set_with_ttl(&mut self, key: impl Into<String>, value: T, ttl: Duration) {
        self.insert(key.into(), value, Some(ttl));
    }

    fn insert(&mut self, key: String, value: T, ttl: Option<Duration>) {
        // Only a genuinely new key counts against capacity; an overwrite
        // reuses the existing slot and keeps its insertion-order position.
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.entries.shift_remove_index(0);
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted: Instant::now(),
                ttl,
            },
        );
    }

    /// Returns the value for `key` if present and not expired.
    ///
    /// An expired entry is removed here and reported as absent; a miss is
    /// `None`, never an error.
    pub fn get(&mut self, key: &str) -> Option<&T> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(self.default_ttl));

        if expired {
            // shift (not swap) so the remaining entries keep their order
            self.entries.shift_remove(key);
            return None;
        }

        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Whether `key` holds a live value. Triggers the same lazy-expiry
    /// removal as `get`.
    pub fn contains(&mut self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key` if present. Returns whether anything was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries currently stored, including entries that have
    /// expired but not yet been touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
