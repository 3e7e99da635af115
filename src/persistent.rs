//! Durable key/value tier backed by per-key JSON files
//!
//! Provides a `PersistentStore` that keeps one partition directory per cache
//! namespace, with one JSON record per key. Records survive application
//! restarts. Writes are committed by writing to a temp file and renaming it
//! over the record, so a crashed or failed write never leaves a half-written
//! record behind.
//!
//! The store applies no TTL of its own — records live until explicitly
//! removed. Callers that want expiry (the tiered facade does) apply it
//! against the record's `timestamp`.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::sync::OnceCell;

use crate::error::PersistenceError;

/// On-disk layout of one persisted record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntry {
    /// The cached value, opaque to this tier
    pub value: Value,
    /// When the record was written
    pub timestamp: DateTime<Utc>,
}

/// Asynchronous key/value store persisting one JSON file per key
///
/// The partition directory is created lazily on first use; concurrent first
/// operations share a single initialization rather than racing to create it.
/// There is no close operation — the store lives for the process lifetime.
#[derive(Debug)]
pub struct PersistentStore {
    /// Partition directory holding this store's records
    dir: PathBuf,
    /// One-shot lazy initialization of the partition directory
    opened: OnceCell<()>,
}

impl PersistentStore {
    /// Creates a store over the given partition directory.
    ///
    /// The directory is not touched until the first operation.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            opened: OnceCell::new(),
        }
    }

    /// Directory holding this store's records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lazily creates the partition directory.
    ///
    /// Idempotent, and safe under concurrency: all callers resolve through
    /// the same in-flight initialization.
    async fn open(&self) -> Result<(), PersistenceError> {
        self.opened
            .get_or_try_init(|| async {
                fs::create_dir_all(&self.dir).await?;
                Ok::<(), PersistenceError>(())
            })
            .await?;
        Ok(())
    }

    /// Returns the path of the record file for `key`.
    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }

    /// Writes `{ value, timestamp: now }` for `key`, replacing any previous
    /// record.
    ///
    /// The write lands atomically: the record is either the old one or the
    /// new one, never a mix.
    pub async fn set(&self, key: &str, value: Value) -> Result<(), PersistenceError> {
        self.open().await?;

        let entry = PersistedEntry {
            value,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&entry)?;

        let mut staged = NamedTempFile::new_in(&self.dir)?;
        staged.write_all(&json)?;
        staged
            .persist(self.record_path(key))
            .map_err(|err| err.error)?;

        Ok(())
    }

    /// Reads the record for `key`.
    ///
    /// Resolves to `Ok(None)` when no record exists; only real I/O or decode
    /// trouble is an error.
    pub async fn get(&self, key: &str) -> Result<Option<PersistedEntry>, PersistenceError> {
        self.open().await?;

        let bytes = match fs::read(self.record_path(key)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Removes the record for `key`. Removing a missing key is fine.
    pub async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.open().await?;

        match fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes every record in the partition.
    pub async fn clear(&self) -> Result<(), PersistenceError> {
        self.open().await?;

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        while let Some(item) = entries.next_entry().await? {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    // a concurrent remove already got it
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(())
    }
}

/// Maps an arbitrary key string onto a safe file name.
///
/// Alphanumerics plus `-`, `_` and `.` pass through; every other byte is
/// escaped as `%XX`, so keys like `products/42:list` cannot walk out of the
/// partition directory or collide with each other.
pub(crate) fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}
