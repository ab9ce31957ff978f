//! Test helpers for assembling block stores by hand.

use serde_json::{json, Value};

use crate::storage::store::BlockStore;
use crate::storage::types::{BlockId, RecordKey};

/// split `key` into (shared prefix length, suffix) against `previous`
pub(crate) fn compress(previous: &str, key: &str) -> (usize, String) {
    let shared = RecordKey::new(key).shared_prefix_len(previous);
    (shared, key.chars().skip(shared).collect())
}

/// Builds a store one block at a time, handing out sequential ids.
pub(crate) struct StoreBuilder {
    store: BlockStore,
    next: usize,
}

impl StoreBuilder {
    pub(crate) fn new() -> Self {
        Self {
            store: BlockStore::new(),
            next: 0,
        }
    }

    pub(crate) fn raw(&mut self, value: Value) -> BlockId {
        self.next += 1;
        let id = BlockId::new(format!("bafyrei{:06}", self.next)).unwrap();
        self.store.insert_value(id.clone(), value).unwrap();
        id
    }

    /// a record block whose `$type` is the key's collection
    pub(crate) fn record(&mut self, key: &str) -> BlockId {
        let collection = key.split_once('/').map(|(c, _)| c).unwrap_or("test.record");
        self.raw(json!({
            "$type": collection,
            "createdAt": "2023-05-01T12:00:00.000Z",
            "key": key,
        }))
    }

    /// a tree node; keys are given in full and compressed here
    pub(crate) fn node(
        &mut self,
        left: Option<&BlockId>,
        entries: &[(&str, BlockId, Option<BlockId>)],
    ) -> BlockId {
        let mut previous = "";
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value, right) in entries {
            let (p, k) = compress(previous, key);
            encoded.push(json!({
                "p": p,
                "k": k,
                "v": value.as_str(),
                "t": right.as_ref().map(BlockId::as_str),
            }));
            previous = *key;
        }
        self.raw(json!({
            "l": left.map(BlockId::as_str),
            "e": encoded,
        }))
    }

    /// a balanced tree over sorted, unique keys with one record per key
    pub(crate) fn tree(&mut self, keys: &[&str], fanout: usize) -> BlockId {
        let entries: Vec<(String, BlockId)> = keys
            .iter()
            .map(|key| (key.to_string(), self.record(key)))
            .collect();
        self.tree_with_values(&entries, fanout)
    }

    pub(crate) fn tree_with_values(&mut self, entries: &[(String, BlockId)], fanout: usize) -> BlockId {
        if entries.is_empty() {
            return self.node(None, &[]);
        }
        self.node_over(entries, fanout.max(1))
    }

    fn subtree(&mut self, entries: &[(String, BlockId)], fanout: usize) -> Option<BlockId> {
        if entries.is_empty() {
            None
        } else {
            Some(self.node_over(entries, fanout))
        }
    }

    fn node_over(&mut self, entries: &[(String, BlockId)], fanout: usize) -> BlockId {
        if entries.len() <= fanout {
            let leaf: Vec<(&str, BlockId, Option<BlockId>)> = entries
                .iter()
                .map(|(key, value)| (key.as_str(), value.clone(), None))
                .collect();
            return self.node(None, &leaf);
        }

        // evenly spaced separators stay in this node, the gaps become subtrees
        let n = entries.len();
        let separators: Vec<usize> = (0..fanout).map(|j| (j + 1) * n / (fanout + 1)).collect();

        let left = self.subtree(&entries[..separators[0]], fanout);
        let mut list = Vec::with_capacity(fanout);
        for (j, &sep) in separators.iter().enumerate() {
            let end = separators.get(j + 1).copied().unwrap_or(n);
            let right = self.subtree(&entries[sep + 1..end], fanout);
            list.push((entries[sep].0.as_str(), entries[sep].1.clone(), right));
        }
        self.node(left.as_ref(), &list)
    }

    pub(crate) fn commit(&mut self, rev: &str, data: &BlockId) -> BlockId {
        self.raw(json!({
            "did": "did:plc:testrepo",
            "rev": rev,
            "data": {"/": data.as_str()},
            "prev": null,
            "version": 3,
        }))
    }

    pub(crate) fn build(self) -> BlockStore {
        self.store
    }
}
