//! Record extraction error types.

use thiserror::Error;

use super::parse::Collection;
use crate::storage::RecordKey;

/// Result type for record extraction.
pub type RecordResult<T> = Result<T, RecordError>;

/// Errors that can occur while turning a record block into a typed body.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The collection is not one we know how to read.
    #[error("unsupported collection: {0}")]
    UnsupportedCollection(String),

    /// The key has no `collection/` part.
    #[error("key {0} has no collection")]
    MissingCollection(RecordKey),

    /// A created key whose record block was never seen by the walk.
    #[error("record for {0} is not in the cache")]
    NotCached(RecordKey),

    /// The record does not match its collection's shape.
    #[error("invalid {collection} record: {source}")]
    Invalid {
        collection: Collection,
        #[source]
        source: serde_json::Error,
    },
}
