//! Stockroom — client-side tiered caching for retail management apps
//!
//! Keeps recently fetched records close at hand so the UI doesn't re-fetch
//! what it just displayed: a bounded in-memory tier answers the common path
//! synchronously, an optional persistent tier keeps a warm cache across
//! application restarts, and a request deduplicator collapses concurrent
//! identical fetches into one in-flight operation.
//!
//! The memory tier is always authoritative for the current session. The
//! persistent tier is best-effort — when it misbehaves the cache degrades
//! to memory-only and the caller never notices beyond a log line.

pub mod dedupe;
pub mod error;
pub mod memory;
pub mod persistent;
pub mod settings;
pub mod tiered;

pub use dedupe::RequestDeduplicator;
pub use error::{DedupeError, PersistenceError};
pub use memory::MemoryCache;
pub use persistent::{PersistedEntry, PersistentStore};
pub use settings::SettingsStore;
pub use tiered::{TieredCache, TieredCacheConfig};
