// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

//! The durable identity of a tree.
//!
//! A single reserved record in the backing store carries everything needed
//! to reopen the tree: where the root lives, how tall the tree is, and the
//! next node identifier to hand out. The record is rewritten in the same
//! batch as any operation that changes one of those facts.

use crate::tree::node::NodeId;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Reserved store key holding the serialized [`TreeMetadata`].
pub const METADATA_KEY: &[u8] = b"m:meta";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TreeMetadata {
    /// Identifier of the current root node.
    pub root_id: NodeId,
    /// Number of internal hops from the root to any leaf; zero means the
    /// root itself is a leaf.
    pub height: u64,
    /// Monotonic allocation counter for node identifiers.
    pub(crate) next_node_id: u64,
}

impl TreeMetadata {
    /// Metadata of a freshly initialized tree: an empty root leaf at the
    /// well-known identifier, zero height.
    pub(crate) fn initial() -> Self {
        Self {
            root_id: NodeId::root_leaf(),
            height: 0,
            next_node_id: 1,
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        Ok(bcs::to_bytes(self)?)
    }

    pub(crate) fn decode(val: &[u8]) -> Result<Self> {
        Ok(bcs::from_bytes(val)?)
    }

    pub(crate) fn allocate_leaf_id(&mut self) -> NodeId {
        let seq = self.next_node_id;
        self.next_node_id += 1;
        NodeId::leaf(seq)
    }

    pub(crate) fn allocate_internal_id(&mut self) -> NodeId {
        let seq = self.next_node_id;
        self.next_node_id += 1;
        NodeId::internal(seq)
    }
}
