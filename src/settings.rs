//! Synchronous preference store
//!
//! Small key/value storage for UI preferences and saved filter sets: one
//! JSON file per key, no TTL, no eviction. Nothing here ever fails loudly —
//! a write that cannot land is logged and skipped, and a read that cannot
//! be served falls back to the caller's default.

use std::fs;
use std::io;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::persistent::encode_key;

/// Key/value store for JSON-serializable preferences
#[derive(Debug, Clone)]
pub struct SettingsStore {
    /// Directory where preference files are stored
    dir: PathBuf,
}

impl SettingsStore {
    /// Creates a store under the platform config directory of `app`
    /// (`~/.config/<app>/settings/` on Linux).
    ///
    /// Returns `None` if no platform config directory can be determined.
    pub fn new(app: &str) -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", app)?;
        Some(Self {
            dir: project_dirs.config_dir().join("settings"),
        })
    }

    /// Creates a store over an explicit directory, for testing or sandboxed
    /// deployments.
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }

    /// Stores `value` under `key`.
    ///
    /// Serialization or I/O trouble is logged and swallowed; the previous
    /// value (if any) stays in place.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let json = match serde_json::to_vec_pretty(value) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(key, error = %err, "setting not serializable; keeping previous value");
                return;
            }
        };

        let written = fs::create_dir_all(&self.dir).and_then(|()| fs::write(self.entry_path(key), json));
        if let Err(err) = written {
            tracing::warn!(key, error = %err, "failed to write setting");
        }
    }

    /// Reads the value under `key`, or `default` when the record is
    /// missing, unreadable, or not decodable as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let bytes = match fs::read(self.entry_path(key)) {
            Ok(bytes) => bytes,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(key, error = %err, "failed to read setting; using default");
                }
                return default;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %err, "setting record corrupt; using default");
                default
            }
        }
    }

    /// Removes the value under `key`, if any.
    pub fn remove(&self, key: &str) {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(key, error = %err, "failed to remove setting"),
        }
    }

    /// Removes every stored preference.
    pub fn clear(&self) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list settings for clear");
                return;
            }
        };

        for item in entries.flatten() {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Err(err) = fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %err, "failed to remove setting");
                }
            }
        }
    }
}
