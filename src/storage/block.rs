//! Decoded blocks and their typed views.
//!
//! A block arrives as a JSON object. Which shape it has is decided from its
//! fields, the same way the repository format itself does it:
//!
//! ```text
//! commit:  { "did", "rev", "data", "prev", "version", "sig" }
//! node:    { "l": <link|null>, "e": [ { "p", "k", "v", "t" }, ... ] }
//! record:  { "$type": "app.bsky.feed.post", ... }
//! ```
//!
//! Links may be plain strings, DAG-JSON `{"/": cid}` or lexicon
//! `{"$link": cid}` objects. Key suffixes may be strings or byte arrays.

use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlockId, InvalidIdError};

/// one decoded block from the store
#[derive(Debug, Clone, PartialEq)]
pub struct Block(Map<String, Value>);

/// the shape of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Commit,
    Node,
    Record,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Commit => "commit",
            BlockKind::Node => "tree node",
            BlockKind::Record => "record",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Block {
    /// wrap a decoded JSON object
    pub fn from_value(id: &BlockId, value: Value) -> StorageResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(StorageError::UnexpectedBlockKind {
                id: id.clone(),
                expected: "object",
                found: json_type_name(&other),
            }),
        }
    }

    pub fn kind(&self) -> BlockKind {
        let fields = self.fields();
        if fields.contains_key("$type") {
            BlockKind::Record
        } else if fields.contains_key("rev") {
            BlockKind::Commit
        } else if fields.contains_key("e") {
            BlockKind::Node
        } else {
            BlockKind::Record
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// the lexicon type of a record block (`$type`)
    pub fn record_type(&self) -> Option<&str> {
        self.get("$type").and_then(Value::as_str)
    }

    pub fn created_at(&self) -> Option<&str> {
        self.get("createdAt").and_then(Value::as_str)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    /// read this block as a tree node
    pub fn as_node(&self, id: &BlockId) -> StorageResult<TreeNode> {
        let kind = self.kind();
        if kind != BlockKind::Node {
            return Err(StorageError::UnexpectedBlockKind {
                id: id.clone(),
                expected: BlockKind::Node.as_str(),
                found: kind.as_str(),
            });
        }

        let raw: RawNode =
            serde_json::from_value(self.to_value()).map_err(|e| StorageError::MalformedNode {
                node: id.clone(),
                reason: e.to_string(),
            })?;

        let left = raw
            .l
            .map(LinkRepr::into_block_id)
            .transpose()
            .map_err(|e| StorageError::MalformedNode {
                node: id.clone(),
                reason: format!("left pointer: {}", e),
            })?;

        let entries = raw
            .e
            .into_iter()
            .enumerate()
            .map(|(index, entry)| entry.into_entry(id, index))
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(TreeNode { left, entries })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// a tree node: an optional left subtree and a sorted run of entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub left: Option<BlockId>,
    pub entries: Vec<TreeEntry>,
}

/// one entry of a tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// characters reused from the previous key in the same node
    pub prefix_len: usize,
    /// bytes appended after the shared prefix
    pub suffix: Vec<u8>,
    /// block holding the record
    pub value: BlockId,
    /// subtree holding the keys between this entry and the next
    pub right: Option<BlockId>,
}

/// why an entry could not produce a key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("prefix length {prefix} exceeds previous key length {available}")]
    PrefixOutOfRange { prefix: usize, available: usize },

    #[error("suffix is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

impl TreeEntry {
    /// rebuild this entry's key from the previous key in the node
    pub fn reconstruct_key(&self, previous: &str) -> Result<String, KeyError> {
        let suffix = std::str::from_utf8(&self.suffix)?;

        let available = previous.chars().count();
        if self.prefix_len > available {
            return Err(KeyError::PrefixOutOfRange {
                prefix: self.prefix_len,
                available,
            });
        }

        let prefix_end = previous
            .char_indices()
            .nth(self.prefix_len)
            .map(|(i, _)| i)
            .unwrap_or(previous.len());

        let mut key = String::with_capacity(prefix_end + suffix.len());
        key.push_str(&previous[..prefix_end]);
        key.push_str(suffix);
        Ok(key)
    }
}

/// a link as it appears in decoded JSON
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum LinkRepr {
    Plain(String),
    Dag {
        #[serde(rename = "/")]
        cid: String,
    },
    Lexicon {
        #[serde(rename = "$link")]
        cid: String,
    },
}

impl LinkRepr {
    pub(crate) fn into_string(self) -> String {
        match self {
            LinkRepr::Plain(cid) | LinkRepr::Dag { cid } | LinkRepr::Lexicon { cid } => cid,
        }
    }

    pub(crate) fn into_block_id(self) -> Result<BlockId, InvalidIdError> {
        BlockId::new(self.into_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BytesRepr {
    Text(String),
    Raw(Vec<u8>),
}

impl BytesRepr {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            BytesRepr::Text(s) => s.into_bytes(),
            BytesRepr::Raw(bytes) => bytes,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    l: Option<LinkRepr>,
    e: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    p: Option<u64>,
    #[serde(default)]
    k: Option<BytesRepr>,
    #[serde(default)]
    v: Option<LinkRepr>,
    #[serde(default)]
    t: Option<LinkRepr>,
}

impl RawEntry {
    fn into_entry(self, node: &BlockId, index: usize) -> StorageResult<TreeEntry> {
        let malformed = |reason: String| StorageError::MalformedEntry {
            node: node.clone(),
            index,
            reason,
        };

        let prefix = self.p.ok_or_else(|| malformed("missing field `p`".into()))?;
        let prefix_len = usize::try_from(prefix)
            .map_err(|_| malformed(format!("prefix length {} does not fit", prefix)))?;
        let suffix = self
            .k
            .ok_or_else(|| malformed("missing field `k`".into()))?
            .into_bytes();
        let value = self
            .v
            .ok_or_else(|| malformed("missing field `v`".into()))?
            .into_block_id()
            .map_err(|e| malformed(format!("value pointer: {}", e)))?;
        let right = self
            .t
            .map(LinkRepr::into_block_id)
            .transpose()
            .map_err(|e| malformed(format!("right pointer: {}", e)))?;

        Ok(TreeEntry {
            prefix_len,
            suffix,
            value,
            right,
        })
    }
}
