// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

//! Node types of the B+ tree.
//!
//! A [`LeafNode`] holds the user key/value pairs plus the identifier of its
//! right sibling, forming the chain that range scans walk. An
//! [`InternalNode`] holds separator keys and child identifiers. Both
//! serialize to a one-byte tag followed by a bcs body, so a persisted record
//! always announces its own role; the identifier's depth prefix is advisory
//! only.

#[cfg(test)]
mod node_test;

use anyhow::Result;
use bytes::Bytes;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier prefix for leaf nodes.
pub const LEAF_PREFIX: &str = "l:";
/// Identifier prefix for internal nodes.
pub const INTERNAL_PREFIX: &str = "i:";

/// Identifier of a persisted node, doubling as its key in the backing
/// store. Identifiers are allocated from a monotonic counter and never
/// reused after a node is deleted.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(Bytes);

impl NodeId {
    /// The identifier of the initial empty root leaf.
    pub fn root_leaf() -> Self {
        Self(Bytes::from_static(b"l:root"))
    }

    pub(crate) fn leaf(seq: u64) -> Self {
        Self(Bytes::from(format!("{LEAF_PREFIX}{seq}")))
    }

    pub(crate) fn internal(seq: u64) -> Self {
        Self(Bytes::from(format!("{INTERNAL_PREFIX}{seq}")))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Terminal node: user keys in ascending order, values in positional
/// correspondence, and the next leaf on the sibling chain.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LeafNode {
    pub(crate) keys: Vec<Bytes>,
    pub(crate) values: Vec<Bytes>,
    pub(crate) next: Option<NodeId>,
}

impl LeafNode {
    pub fn keys(&self) -> &[Bytes] {
        &self.keys
    }

    pub fn values(&self) -> &[Bytes] {
        &self.values
    }

    pub fn next(&self) -> Option<&NodeId> {
        self.next.as_ref()
    }

    pub fn num_entries(&self) -> usize {
        self.keys.len()
    }

    /// Index of the first key not less than `key`: the slot a fresh entry
    /// splices into.
    pub(crate) fn insertion_slot(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_ref() < key)
    }

    /// Index of the entry whose key equals `key`, if present.
    pub(crate) fn entry_index(&self, key: &[u8]) -> Option<usize> {
        let slot = self.insertion_slot(key);
        (self.keys.get(slot).map(Bytes::as_ref) == Some(key)).then_some(slot)
    }
}

/// Non-terminal node: `n` separator keys framing `n + 1` children. The
/// separator at index `i` equals the smallest key reachable under child
/// `i + 1`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InternalNode {
    pub(crate) keys: Vec<Bytes>,
    pub(crate) children: Vec<NodeId>,
}

impl InternalNode {
    pub fn keys(&self) -> &[Bytes] {
        &self.keys
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Child slot to descend into for `key`. Separators equal to `key` send
    /// the descent right, which is where leaf splits place the equal key.
    pub(crate) fn child_slot(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|sep| sep.as_ref() <= key)
    }
}

#[repr(u8)]
#[derive(FromPrimitive, ToPrimitive)]
enum NodeTag {
    Internal = 1,
    Leaf = 2,
}

/// A persisted node body: either a leaf or an internal node. The variant is
/// carried by the record itself, not inferred from the identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl From<InternalNode> for Node {
    fn from(node: InternalNode) -> Self {
        Node::Internal(node)
    }
}

impl From<LeafNode> for Node {
    fn from(node: LeafNode) -> Self {
        Node::Leaf(node)
    }
}

impl Node {
    /// Creates an empty leaf.
    pub fn new_leaf() -> Self {
        Node::Leaf(LeafNode::default())
    }

    /// Returns `true` if the node is a leaf node.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub(crate) fn into_leaf(self, id: &NodeId) -> Result<LeafNode> {
        match self {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => anyhow::bail!("node {} is not a leaf", id),
        }
    }

    pub(crate) fn into_internal(self, id: &NodeId) -> Result<InternalNode> {
        match self {
            Node::Internal(internal) => Ok(internal),
            Node::Leaf(_) => anyhow::bail!("node {} is not an internal node", id),
        }
    }

    /// Serializes to bytes for physical storage.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![];
        match self {
            Node::Internal(internal) => {
                out.push(NodeTag::Internal as u8);
                out.extend(bcs::to_bytes(internal)?);
            }
            Node::Leaf(leaf) => {
                out.push(NodeTag::Leaf as u8);
                out.extend(bcs::to_bytes(leaf)?);
            }
        }
        Ok(out)
    }

    /// Recovers from serialized bytes in physical storage.
    pub fn decode(val: &[u8]) -> Result<Node> {
        if val.is_empty() {
            return Err(NodeDecodeError::EmptyInput.into());
        }
        let tag = val[0];
        match NodeTag::from_u8(tag) {
            Some(NodeTag::Internal) => {
                let node: InternalNode = bcs::from_bytes(&val[1..])?;
                if node.children.len() != node.keys.len() + 1 {
                    return Err(NodeDecodeError::ChildCountMismatch {
                        keys: node.keys.len(),
                        children: node.children.len(),
                    }
                    .into());
                }
                Ok(Node::Internal(node))
            }
            Some(NodeTag::Leaf) => {
                let node: LeafNode = bcs::from_bytes(&val[1..])?;
                if node.values.len() != node.keys.len() {
                    return Err(NodeDecodeError::ValueCountMismatch {
                        keys: node.keys.len(),
                        values: node.values.len(),
                    }
                    .into());
                }
                Ok(Node::Leaf(node))
            }
            None => Err(NodeDecodeError::UnknownTag { unknown_tag: tag }.into()),
        }
    }
}

/// Error thrown when a [`Node`] fails to be deserialized out of a byte
/// sequence stored in physical storage, via [`Node::decode`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum NodeDecodeError {
    /// Input is empty.
    #[error("Missing tag due to empty input")]
    EmptyInput,

    /// The first byte of the input is not a known tag representing one of
    /// the variants.
    #[error("lead tag byte is unknown: {}", unknown_tag)]
    UnknownTag { unknown_tag: u8 },

    /// An internal body whose child count does not frame its key count.
    #[error("internal node has {} children for {} keys", children, keys)]
    ChildCountMismatch { keys: usize, children: usize },

    /// A leaf body whose value count diverges from its key count.
    #[error("leaf node has {} values for {} keys", values, keys)]
    ValueCountMismatch { keys: usize, values: usize },
}
