// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! A persistent B+ tree index layered on a pluggable ordered key-value
//! store.
//!
//! The backing store only needs exact-key reads and batched writes (the
//! [`OrderedStore`] contract); the tree adds logarithmic-depth navigation
//! and ordered range scans on top, and re-exposes the very same contract.
//! Because consumed and exposed contracts coincide, a tree can itself serve
//! as the backing store of another tree.
//!
//! Every node lives as one record in the backing store, keyed by its
//! [`NodeId`]; leaves are chained left to right so range scans walk
//! siblings without revisiting internal nodes. A reserved record at
//! [`METADATA_KEY`] carries the root identifier, the height, and the node
//! allocation counter, which makes the whole structure recoverable from the
//! store alone:
//!
//! ```
//! use bptree::{BPlusTree, MemStore, ScanArgs, TreeOptions};
//! use bytes::Bytes;
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = MemStore::new();
//! let tree = BPlusTree::open(&store, TreeOptions::default())?;
//! tree.set(Bytes::from("a"), Bytes::from("1"))?;
//! tree.set(Bytes::from("b"), Bytes::from("2"))?;
//! assert_eq!(tree.get(b"b")?, Some(Bytes::from("2")));
//!
//! // A second handle over the same store adopts the persisted metadata.
//! let reopened = BPlusTree::open(&store, TreeOptions::default())?;
//! assert_eq!(reopened.list(&ScanArgs::new())?.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! The engine offers no internal concurrency control: callers keep at most
//! one mutating operation in flight and synchronize readers externally.

mod mem_store;
mod store;
mod tree;

pub use mem_store::MemStore;
pub use store::{byte_order, KeyComparator, OrderedStore, ScanArgs, WriteBatch};
pub use tree::metadata::{TreeMetadata, METADATA_KEY};
pub use tree::node::{
    InternalNode, LeafNode, Node, NodeDecodeError, NodeId, INTERNAL_PREFIX, LEAF_PREFIX,
};
pub use tree::{BPlusTree, TreeOptions};
