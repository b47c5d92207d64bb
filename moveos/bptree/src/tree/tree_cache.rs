// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

//! Per-operation view over the backing store.
//!
//! One top-level mutation touches a handful of nodes: the descent path, the
//! target leaf, maybe a sibling and a few ancestors. `TreeCache` memoizes
//! the reads, keeps every put and delete pending so later steps of the same
//! operation observe them, and finally drains into a single [`WriteBatch`]
//! for the store to commit.

use crate::store::{OrderedStore, WriteBatch};
use crate::tree::metadata::{TreeMetadata, METADATA_KEY};
use crate::tree::node::{InternalNode, LeafNode, Node, NodeId};
use anyhow::{bail, format_err, Result};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};

pub(crate) struct TreeCache<'a, S> {
    store: &'a S,
    /// Nodes read from the store during this operation.
    reads: HashMap<NodeId, Node>,
    /// Pending mutations; `None` marks a deletion.
    pending: BTreeMap<NodeId, Option<Node>>,
}

impl<'a, S> TreeCache<'a, S>
where
    S: OrderedStore,
{
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            reads: HashMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Gets a node, observing pending mutations first. A record absent from
    /// both the pending set and the store means the tree structure points
    /// at a node that does not exist.
    pub fn get_node(&mut self, id: &NodeId) -> Result<Node> {
        if let Some(entry) = self.pending.get(id) {
            return entry
                .clone()
                .ok_or_else(|| format_err!("node {} was deleted by this operation", id));
        }
        if let Some(node) = self.reads.get(id) {
            return Ok(node.clone());
        }
        let Some(raw) = self.store.get(id.as_bytes())? else {
            bail!("missing node record at {}", id);
        };
        let node = Node::decode(&raw)?;
        self.reads.insert(id.clone(), node.clone());
        Ok(node)
    }

    pub fn get_leaf(&mut self, id: &NodeId) -> Result<LeafNode> {
        self.get_node(id)?.into_leaf(id)
    }

    pub fn get_internal(&mut self, id: &NodeId) -> Result<InternalNode> {
        self.get_node(id)?.into_internal(id)
    }

    pub fn put_node(&mut self, id: NodeId, node: Node) {
        self.pending.insert(id, Some(node));
    }

    pub fn delete_node(&mut self, id: NodeId) {
        self.pending.insert(id, None);
    }

    /// Drains the pending mutations into one batch, folding in the
    /// metadata record when the operation changed it.
    pub fn into_batch(self, meta: Option<&TreeMetadata>) -> Result<WriteBatch> {
        let mut batch = WriteBatch::new();
        for (id, entry) in &self.pending {
            if let Some(node) = entry {
                batch.put(id.to_bytes(), Bytes::from(node.encode()?));
            }
        }
        if let Some(meta) = meta {
            batch.put(Bytes::from_static(METADATA_KEY), Bytes::from(meta.encode()?));
        }
        for (id, entry) in &self.pending {
            if entry.is_none() {
                batch.remove(id.to_bytes());
            }
        }
        Ok(batch)
    }
}
