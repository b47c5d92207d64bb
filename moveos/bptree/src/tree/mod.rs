// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

//! The B+ tree engine.
//!
//! [`BPlusTree`] keeps every node as a record in a backing [`OrderedStore`]
//! and re-exposes the same store contract with logarithmic-depth
//! navigation. Point operations descend from the root, capture the path,
//! edit the target leaf, and repair the structure upward when a node
//! overflows or underflows. All record mutations of one operation are
//! committed as a single batch.
//!
//! The engine assumes a single-writer discipline: at most one in-flight
//! mutating operation at a time. Readers running concurrently with a
//! mutation observe an undefined intermediate state and must synchronize
//! externally. In-memory state is limited to the metadata snapshot; every
//! operation re-fetches the nodes it touches.

pub(crate) mod metadata;
pub mod node;
pub(crate) mod tree_cache;

use crate::store::{byte_order, OrderedStore, ScanArgs, WriteBatch};
use anyhow::{ensure, Result};
use bytes::Bytes;
use metadata::{TreeMetadata, METADATA_KEY};
use node::{InternalNode, LeafNode, Node, NodeId};
use parking_lot::RwLock;
use tracing::debug;
use tree_cache::TreeCache;

/// Fan-out bounds of the tree. A node holding more keys than its bound is
/// split; a non-root node holding fewer than half its bound is repaired by
/// borrowing from or merging with a sibling.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TreeOptions {
    /// Split threshold for leaves.
    pub max_leaf_size: usize,
    /// Split threshold for internal nodes.
    pub max_internal_size: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            max_leaf_size: 32,
            max_internal_size: 32,
        }
    }
}

/// Underflow threshold for a node with the given fan-out bound.
fn min_occupancy(max: usize) -> usize {
    max.div_ceil(2)
}

/// One internal hop of a root-to-leaf descent: the node visited and the
/// child slot taken out of it.
struct PathEntry {
    id: NodeId,
    child_index: usize,
}

/// Which role the node under repair plays; borrow and merge move different
/// material for leaves and internals, and each role underflows against its
/// own bound.
#[derive(Clone, Copy)]
enum NodeRole {
    Leaf,
    Internal,
}

/// A persistent B+ tree over an [`OrderedStore`].
///
/// The tree owns every record it writes: one per live node, keyed by the
/// node's identifier, plus one reserved metadata record that makes the
/// structure recoverable from the store alone. Non-tree keys may coexist in
/// the same store as long as they avoid the reserved identifier space.
pub struct BPlusTree<S> {
    store: S,
    options: TreeOptions,
    meta: RwLock<TreeMetadata>,
}

impl<S> BPlusTree<S>
where
    S: OrderedStore,
{
    /// Opens a tree over `store`, adopting the persisted metadata record or
    /// initializing a fresh empty root when none exists. Initialization
    /// writes the empty root leaf and the metadata record in one batch, so
    /// a reopen always finds both or neither.
    pub fn open(store: S, options: TreeOptions) -> Result<Self> {
        ensure!(
            options.max_leaf_size >= 2 && options.max_internal_size >= 2,
            "fan-out bounds must be at least 2"
        );
        let meta = match store.get(METADATA_KEY)? {
            Some(raw) => TreeMetadata::decode(&raw)?,
            None => {
                let meta = TreeMetadata::initial();
                let mut batch = WriteBatch::new();
                batch.put(
                    meta.root_id.to_bytes(),
                    Bytes::from(Node::new_leaf().encode()?),
                );
                batch.put(Bytes::from_static(METADATA_KEY), Bytes::from(meta.encode()?));
                store.write(batch)?;
                meta
            }
        };
        Ok(Self {
            store,
            options,
            meta: RwLock::new(meta),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> TreeOptions {
        self.options
    }

    /// Snapshot of the durable tree identity.
    pub fn metadata(&self) -> TreeMetadata {
        self.meta.read().clone()
    }

    /// Gets the value stored under `key`, or `None` if the key is absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let meta = self.meta.read().clone();
        let mut cache = TreeCache::new(&self.store);
        let (_, leaf, _) = self.descend(&mut cache, &meta, key)?;
        Ok(leaf.entry_index(key).map(|i| leaf.values[i].clone()))
    }

    /// Sets `key` to `value`, overwriting any previous value.
    pub fn set(&self, key: Bytes, value: Bytes) -> Result<()> {
        self.insert_one(key, value)
    }

    /// Deletes `key`. Deleting an absent key is a no-op.
    pub fn delete(&self, key: Bytes) -> Result<()> {
        self.remove_one(&key)
    }

    /// Applies `batch` against the tree: all sets in listed order, then all
    /// deletes. Each entry commits its own node batch to the backing store;
    /// there is no rollback on partial failure, and the last write to a key
    /// wins.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        let (sets, deletes) = batch.into_parts();
        for (key, value) in sets {
            self.insert_one(key, value)?;
        }
        for key in deletes {
            self.remove_one(&key)?;
        }
        Ok(())
    }

    /// Ordered enumeration of the entries satisfying `args`.
    ///
    /// Entries are collected forward along the leaf sibling chain from the
    /// lower bound; `offset` then drops the head of the collected run,
    /// `reverse` flips what remains, and `limit` truncates last, so a
    /// reversed scan emits the tail of the range. Conflicting bound pairs
    /// log a warning and yield an empty result.
    pub fn list(&self, args: &ScanArgs) -> Result<Vec<(Bytes, Bytes)>> {
        if !args.is_satisfiable(byte_order) || args.limit == Some(0) {
            return Ok(Vec::new());
        }
        let meta = self.meta.read().clone();
        let mut cache = TreeCache::new(&self.store);
        let lower = args.gt.as_ref().or(args.gte.as_ref());
        let mut leaf = match lower {
            Some(start) => self.descend(&mut cache, &meta, start)?.1,
            None => self.descend_leftmost(&mut cache, &meta)?,
        };
        let mut idx = if let Some(gt) = &args.gt {
            leaf.keys.partition_point(|k| k.as_ref() <= gt.as_ref())
        } else if let Some(gte) = &args.gte {
            leaf.insertion_slot(gte)
        } else {
            0
        };
        let mut out = Vec::new();
        loop {
            while idx < leaf.keys.len() {
                let key = &leaf.keys[idx];
                if !args.within_upper(key, byte_order) {
                    return Ok(args.apply_post(out));
                }
                out.push((key.clone(), leaf.values[idx].clone()));
                if args.collected_enough(out.len()) {
                    return Ok(args.apply_post(out));
                }
                idx += 1;
            }
            match leaf.next.take() {
                Some(next) => {
                    leaf = cache.get_leaf(&next)?;
                    idx = 0;
                }
                None => return Ok(args.apply_post(out)),
            }
        }
    }

    /// Root-to-leaf descent for `key`, recording the internal hops taken.
    fn descend(
        &self,
        cache: &mut TreeCache<S>,
        meta: &TreeMetadata,
        key: &[u8],
    ) -> Result<(NodeId, LeafNode, Vec<PathEntry>)> {
        let mut id = meta.root_id.clone();
        let mut path = Vec::with_capacity(meta.height as usize);
        for _ in 0..meta.height {
            let internal = cache.get_internal(&id)?;
            let slot = internal.child_slot(key);
            let child = internal.children[slot].clone();
            path.push(PathEntry {
                id,
                child_index: slot,
            });
            id = child;
        }
        let leaf = cache.get_leaf(&id)?;
        Ok((id, leaf, path))
    }

    /// Descent that always takes the leftmost child, landing on the first
    /// leaf of the sibling chain.
    fn descend_leftmost(&self, cache: &mut TreeCache<S>, meta: &TreeMetadata) -> Result<LeafNode> {
        let mut id = meta.root_id.clone();
        for _ in 0..meta.height {
            id = cache.get_internal(&id)?.children[0].clone();
        }
        cache.get_leaf(&id)
    }

    fn insert_one(&self, key: Bytes, value: Bytes) -> Result<()> {
        let meta_before = self.meta.read().clone();
        let mut meta = meta_before.clone();
        let mut cache = TreeCache::new(&self.store);
        let (leaf_id, mut leaf, path) = self.descend(&mut cache, &meta, &key)?;
        let slot = leaf.insertion_slot(&key);
        if leaf.keys.get(slot).map(Bytes::as_ref) == Some(key.as_ref()) {
            // Overwrite in place; the shape is untouched.
            leaf.values[slot] = value;
            cache.put_node(leaf_id, leaf.into());
        } else {
            leaf.keys.insert(slot, key);
            leaf.values.insert(slot, value);
            if leaf.keys.len() <= self.options.max_leaf_size {
                cache.put_node(leaf_id, leaf.into());
            } else {
                self.split_leaf(&mut cache, &mut meta, leaf_id, leaf, path)?;
            }
        }
        self.commit(cache, meta_before, meta)
    }

    fn remove_one(&self, key: &[u8]) -> Result<()> {
        let meta_before = self.meta.read().clone();
        let mut meta = meta_before.clone();
        let mut cache = TreeCache::new(&self.store);
        let (leaf_id, mut leaf, path) = self.descend(&mut cache, &meta, key)?;
        let Some(idx) = leaf.entry_index(key) else {
            // Removing an absent key changes nothing.
            return Ok(());
        };
        leaf.keys.remove(idx);
        leaf.values.remove(idx);
        let keeps_occupancy = leaf.keys.len() >= min_occupancy(self.options.max_leaf_size);
        cache.put_node(leaf_id, leaf.into());
        // The root leaf may drain all the way to empty; anything deeper is
        // rebalanced.
        if !path.is_empty() && !keeps_occupancy {
            self.repair(&mut cache, &mut meta, path)?;
        }
        self.commit(cache, meta_before, meta)
    }

    /// Halves an overfull leaf and promotes the separator upward.
    fn split_leaf(
        &self,
        cache: &mut TreeCache<S>,
        meta: &mut TreeMetadata,
        leaf_id: NodeId,
        mut leaf: LeafNode,
        path: Vec<PathEntry>,
    ) -> Result<()> {
        let mid = leaf.keys.len() / 2;
        let right_id = meta.allocate_leaf_id();
        let right = LeafNode {
            keys: leaf.keys.split_off(mid),
            values: leaf.values.split_off(mid),
            next: leaf.next.take(),
        };
        // The separator is a copy of the smallest key kept by the right
        // half; both halves retain their user entries.
        let separator = right.keys[0].clone();
        leaf.next = Some(right_id.clone());
        debug!(left = %leaf_id, right = %right_id, "split leaf");
        cache.put_node(leaf_id, leaf.into());
        cache.put_node(right_id.clone(), right.into());
        self.promote(cache, meta, path, separator, right_id)
    }

    /// Inserts a promoted separator and its right child into the parent on
    /// top of `path`, splitting internal nodes upward as needed. When
    /// promotion runs past the root, the tree grows a new root and gains a
    /// level.
    fn promote(
        &self,
        cache: &mut TreeCache<S>,
        meta: &mut TreeMetadata,
        mut path: Vec<PathEntry>,
        mut separator: Bytes,
        mut right_id: NodeId,
    ) -> Result<()> {
        loop {
            let Some(PathEntry { id, child_index }) = path.pop() else {
                let new_root_id = meta.allocate_internal_id();
                let root = InternalNode {
                    keys: vec![separator],
                    children: vec![meta.root_id.clone(), right_id],
                };
                cache.put_node(new_root_id.clone(), root.into());
                meta.root_id = new_root_id;
                meta.height += 1;
                debug!(root = %meta.root_id, height = meta.height, "grew new root");
                return Ok(());
            };
            let mut parent = cache.get_internal(&id)?;
            parent.keys.insert(child_index, separator);
            parent.children.insert(child_index + 1, right_id);
            if parent.keys.len() <= self.options.max_internal_size {
                cache.put_node(id, parent.into());
                return Ok(());
            }
            // Internal split: the median separator moves up without
            // staying in either half.
            let mid = parent.keys.len() / 2;
            let new_right_id = meta.allocate_internal_id();
            let right = InternalNode {
                keys: parent.keys.split_off(mid + 1),
                children: parent.children.split_off(mid + 1),
            };
            let up = parent.keys.pop().expect("split point is below key count");
            debug!(left = %id, right = %new_right_id, "split internal node");
            cache.put_node(id.clone(), parent.into());
            cache.put_node(new_right_id.clone(), right.into());
            separator = up;
            right_id = new_right_id;
        }
    }

    /// Walks the captured path upward restoring occupancy, starting at the
    /// underflowing leaf and cascading through any parents that fall below
    /// their own bound. Collapses the root when it runs out of separators.
    fn repair(
        &self,
        cache: &mut TreeCache<S>,
        meta: &mut TreeMetadata,
        mut path: Vec<PathEntry>,
    ) -> Result<()> {
        let mut role = NodeRole::Leaf;
        while let Some(PathEntry {
            id: parent_id,
            child_index,
        }) = path.pop()
        {
            let mut parent = cache.get_internal(&parent_id)?;
            match role {
                NodeRole::Leaf => self.repair_leaf_under(cache, &mut parent, child_index)?,
                NodeRole::Internal => self.repair_internal_under(cache, &mut parent, child_index)?,
            }
            if path.is_empty() {
                // `parent` is the root. A root left with no separators has
                // exactly one child, which takes over as the new root.
                if parent.keys.is_empty() {
                    let new_root = parent.children[0].clone();
                    cache.delete_node(parent_id.clone());
                    meta.height -= 1;
                    debug!(old_root = %parent_id, new_root = %new_root, height = meta.height, "demoted root");
                    meta.root_id = new_root;
                } else {
                    cache.put_node(parent_id, parent.into());
                }
                return Ok(());
            }
            let keeps_occupancy =
                parent.keys.len() >= min_occupancy(self.options.max_internal_size);
            cache.put_node(parent_id, parent.into());
            if keeps_occupancy {
                return Ok(());
            }
            role = NodeRole::Internal;
        }
        Ok(())
    }

    /// Restores occupancy for the leaf at `child_index` under `parent`:
    /// borrow from the left sibling, else the right, else merge left, else
    /// merge right.
    fn repair_leaf_under(
        &self,
        cache: &mut TreeCache<S>,
        parent: &mut InternalNode,
        child_index: usize,
    ) -> Result<()> {
        let min = min_occupancy(self.options.max_leaf_size);
        let node_id = parent.children[child_index].clone();
        let mut node = cache.get_leaf(&node_id)?;

        if child_index > 0 {
            let donor_id = parent.children[child_index - 1].clone();
            let mut donor = cache.get_leaf(&donor_id)?;
            if donor.keys.len() > min {
                let key = donor.keys.pop().expect("donor leaf has entries");
                let value = donor.values.pop().expect("donor leaf has entries");
                // The moved entry becomes the smallest on the right side of
                // the boundary, so the separator becomes a copy of it.
                parent.keys[child_index - 1] = key.clone();
                node.keys.insert(0, key);
                node.values.insert(0, value);
                debug!(node = %node_id, donor = %donor_id, "borrowed leaf entry from left sibling");
                cache.put_node(donor_id, donor.into());
                cache.put_node(node_id, node.into());
                return Ok(());
            }
        }
        if child_index + 1 < parent.children.len() {
            let donor_id = parent.children[child_index + 1].clone();
            let mut donor = cache.get_leaf(&donor_id)?;
            if donor.keys.len() > min {
                let key = donor.keys.remove(0);
                let value = donor.values.remove(0);
                node.keys.push(key);
                node.values.push(value);
                parent.keys[child_index] = donor.keys[0].clone();
                debug!(node = %node_id, donor = %donor_id, "borrowed leaf entry from right sibling");
                cache.put_node(donor_id, donor.into());
                cache.put_node(node_id, node.into());
                return Ok(());
            }
        }
        if child_index > 0 {
            // Merge into the left sibling; the right record dies and the
            // chain skips over it.
            let left_id = parent.children[child_index - 1].clone();
            let mut left = cache.get_leaf(&left_id)?;
            left.keys.append(&mut node.keys);
            left.values.append(&mut node.values);
            left.next = node.next.take();
            debug!(left = %left_id, right = %node_id, "merged leaf into left sibling");
            cache.put_node(left_id, left.into());
            cache.delete_node(node_id);
            parent.keys.remove(child_index - 1);
            parent.children.remove(child_index);
        } else {
            let right_id = parent.children[child_index + 1].clone();
            let mut right = cache.get_leaf(&right_id)?;
            node.keys.append(&mut right.keys);
            node.values.append(&mut right.values);
            node.next = right.next.take();
            debug!(left = %node_id, right = %right_id, "merged right sibling into leaf");
            cache.put_node(node_id, node.into());
            cache.delete_node(right_id);
            parent.keys.remove(child_index);
            parent.children.remove(child_index + 1);
        }
        Ok(())
    }

    /// Restores occupancy for the internal node at `child_index` under
    /// `parent`. Borrowing rotates through the parent: the boundary
    /// separator comes down, the donor's boundary key goes up, and the
    /// donor's boundary child changes sides. Merging consumes the boundary
    /// separator.
    fn repair_internal_under(
        &self,
        cache: &mut TreeCache<S>,
        parent: &mut InternalNode,
        child_index: usize,
    ) -> Result<()> {
        let min = min_occupancy(self.options.max_internal_size);
        let node_id = parent.children[child_index].clone();
        let mut node = cache.get_internal(&node_id)?;

        if child_index > 0 {
            let donor_id = parent.children[child_index - 1].clone();
            let mut donor = cache.get_internal(&donor_id)?;
            if donor.keys.len() > min {
                let child = donor.children.pop().expect("donor has children");
                let up = donor.keys.pop().expect("donor has separators");
                node.children.insert(0, child);
                node.keys.insert(0, parent.keys[child_index - 1].clone());
                parent.keys[child_index - 1] = up;
                debug!(node = %node_id, donor = %donor_id, "rotated separator from left sibling");
                cache.put_node(donor_id, donor.into());
                cache.put_node(node_id, node.into());
                return Ok(());
            }
        }
        if child_index + 1 < parent.children.len() {
            let donor_id = parent.children[child_index + 1].clone();
            let mut donor = cache.get_internal(&donor_id)?;
            if donor.keys.len() > min {
                let child = donor.children.remove(0);
                let up = donor.keys.remove(0);
                node.children.push(child);
                node.keys.push(parent.keys[child_index].clone());
                parent.keys[child_index] = up;
                debug!(node = %node_id, donor = %donor_id, "rotated separator from right sibling");
                cache.put_node(donor_id, donor.into());
                cache.put_node(node_id, node.into());
                return Ok(());
            }
        }
        if child_index > 0 {
            let left_id = parent.children[child_index - 1].clone();
            let mut left = cache.get_internal(&left_id)?;
            left.keys.push(parent.keys[child_index - 1].clone());
            left.keys.append(&mut node.keys);
            left.children.append(&mut node.children);
            debug!(left = %left_id, right = %node_id, "merged internal node into left sibling");
            cache.put_node(left_id, left.into());
            cache.delete_node(node_id);
            parent.keys.remove(child_index - 1);
            parent.children.remove(child_index);
        } else {
            let right_id = parent.children[child_index + 1].clone();
            let mut right = cache.get_internal(&right_id)?;
            node.keys.push(parent.keys[child_index].clone());
            node.keys.append(&mut right.keys);
            node.children.append(&mut right.children);
            debug!(left = %node_id, right = %right_id, "merged right sibling into internal node");
            cache.put_node(node_id, node.into());
            cache.delete_node(right_id);
            parent.keys.remove(child_index);
            parent.children.remove(child_index + 1);
        }
        Ok(())
    }

    /// Commits an operation: one batch of node records, with the metadata
    /// record folded in when the durable identity changed.
    fn commit(&self, cache: TreeCache<S>, before: TreeMetadata, after: TreeMetadata) -> Result<()> {
        let changed = before != after;
        let batch = cache.into_batch(changed.then_some(&after))?;
        if !batch.is_empty() {
            self.store.write(batch)?;
        }
        if changed {
            *self.meta.write() = after;
        }
        Ok(())
    }
}

impl<S> OrderedStore for BPlusTree<S>
where
    S: OrderedStore,
{
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        BPlusTree::get(self, key)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        BPlusTree::write(self, batch)
    }

    fn list(&self, args: &ScanArgs) -> Result<Vec<(Bytes, Bytes)>> {
        BPlusTree::list(self, args)
    }
}
