//! core type-safe wrappers around block store primitives.

use std::fmt;
use std::fmt::Formatter;

use serde::{Deserialize, Serialize};

/// A content-addressed block identifier (a CID in its string form).
///
/// This makes sure we don't accidentally pass a record key where a block
/// pointer is expected. The identifier is opaque: the store never hashes
/// anything itself, it only looks identifiers up.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockId(String);

impl BlockId {
    /// create a new BlockId, validating the input
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidIdError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    fn validate(id: &str) -> Result<(), InvalidIdError> {
        if id.is_empty() {
            return Err(InvalidIdError::Empty);
        }

        for (i, c) in id.chars().enumerate() {
            if c.is_whitespace() || c.is_control() {
                return Err(InvalidIdError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// short form of the identifier, for log lines
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl TryFrom<String> for BlockId {
    type Error = InvalidIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BlockId> for String {
    fn from(id: BlockId) -> Self {
        id.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BlockId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A logical record key reconstructed from a tree walk.
///
/// Keys are path-like: `{collection}/{rkey}`, e.g.
/// `app.bsky.feed.post/3k2yihcrp6f2c`. Ordering is plain string ordering,
/// which is the order the tree stores them in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }

    /// split into `(collection, rkey)` at the first `/`
    pub fn split(&self) -> Option<(&str, &str)> {
        self.0.split_once('/')
    }

    pub fn collection(&self) -> Option<&str> {
        self.split().map(|(collection, _)| collection)
    }

    pub fn rkey(&self) -> Option<&str> {
        self.split().map(|(_, rkey)| rkey)
    }

    /// number of leading characters shared with `other`
    ///
    /// this is the inverse of prefix compression: for well-formed tree
    /// entries it gives back the stored prefix length.
    pub fn shared_prefix_len(&self, other: &str) -> usize {
        self.0
            .chars()
            .zip(other.chars())
            .take_while(|(a, b)| a == b)
            .count()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// error type for invalid block identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidIdError {
    Empty,
    InvalidCharacter { char: char, position: usize },
}

impl fmt::Display for InvalidIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "block id cannot be empty"),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
        }
    }
}

impl std::error::Error for InvalidIdError {}

/// represents a change in a diff between commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub key: RecordKey,
    pub status: ChangeStatus,
}

/// the type of change in a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeStatus {
    #[serde(rename = "create")]
    Created,
    #[serde(rename = "delete")]
    Deleted,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Created => "create",
            ChangeStatus::Deleted => "delete",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
