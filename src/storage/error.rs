//! Storage layer error types
//!
//! All errors that can occur while reading a block store are defined here.
//! We use `thiserror` for ergonomic error definition and better error messages

use thiserror::Error;

use crate::storage::tid::TidError;
use crate::storage::types::{BlockId, InvalidIdError, RecordKey};

/// the main error type for block store operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// a pointer names a block the store does not hold
    #[error("missing block: {id}")]
    MissingBlock { id: BlockId },

    /// a tree entry lacks a required field or cannot produce a key
    #[error("malformed entry {index} in node {node}: {reason}")]
    MalformedEntry {
        node: BlockId,
        index: usize,
        reason: String,
    },

    /// a tree node whose fields have the wrong shape
    #[error("malformed node {node}: {reason}")]
    MalformedNode { node: BlockId, reason: String },

    /// a pointer resolved to a block of the wrong shape
    #[error("unexpected block kind at {id}: expected {expected}, found {found}")]
    UnexpectedBlockKind {
        id: BlockId,
        expected: &'static str,
        found: &'static str,
    },

    /// a commit block that cannot be read
    #[error("invalid commit {id}: {reason}")]
    InvalidCommit { id: BlockId, reason: String },

    /// a revision marker that cannot be decoded
    #[error("invalid revision: {0}")]
    InvalidRevision(#[from] TidError),

    /// invalid block identifier
    #[error("invalid block id: {0}")]
    InvalidId(#[from] InvalidIdError),

    /// the walk went deeper than the configured bound
    #[error("tree under {root} exceeds max depth {max_depth}")]
    TreeTooDeep { root: BlockId, max_depth: usize },

    /// a node was reached twice in one walk
    #[error("cycle detected: node {id} visited twice")]
    CycleDetected { id: BlockId },

    /// keys did not come out strictly ascending
    #[error("key out of order: {key} follows {previous}")]
    KeyOutOfOrder {
        previous: RecordKey,
        key: RecordKey,
    },

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// check if this error indicates a referenced block doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::MissingBlock { .. })
    }

    /// check if this error means the store content itself is bad
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            StorageError::MalformedEntry { .. }
                | StorageError::MalformedNode { .. }
                | StorageError::UnexpectedBlockKind { .. }
                | StorageError::InvalidCommit { .. }
                | StorageError::InvalidRevision(_)
                | StorageError::CycleDetected { .. }
                | StorageError::KeyOutOfOrder { .. }
        )
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
