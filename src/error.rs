//! Error types for the cache tiers
//!
//! A cache miss is never an error anywhere in this crate — absent values are
//! `None`. The types here cover the failures that can actually happen: the
//! persistent tier losing a filesystem transaction, and a deduplicated
//! operation failing or dying before it settles.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors raised by the persistent tier
///
/// The tiered facade catches these at its boundary and downgrades them to
/// warnings; callers only see them when talking to a `PersistentStore`
/// directly.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Underlying filesystem operation failed
    #[error("persistent tier I/O failed: {0}")]
    Io(#[from] io::Error),

    /// Record could not be encoded to or decoded from JSON
    #[error("persistent record could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced to waiters of a deduplicated operation
#[derive(Debug, Error)]
pub enum DedupeError<E> {
    /// The underlying operation failed. Every coalesced waiter observes the
    /// same error value through the shared `Arc`.
    #[error("deduplicated operation failed")]
    Operation(Arc<E>),

    /// The operation task died (panicked) before producing a result
    #[error("deduplicated operation did not settle")]
    OperationPanicked,
}
