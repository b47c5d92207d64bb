// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

//! An in-memory [`OrderedStore`] backed by a sorted array.
//!
//! This is the reference collaborator for the tree: small, totally ordered
//! by a pluggable comparator, and safe to share behind a reference. Tests
//! run against it, and it is equally usable as a scratch store in its own
//! right.

use crate::store::{byte_order, KeyComparator, OrderedStore, ScanArgs, WriteBatch};
use anyhow::Result;
use bytes::Bytes;
use parking_lot::RwLock;

/// Sorted-array store guarded by a lock, ordered by `cmp`.
pub struct MemStore {
    cmp: KeyComparator,
    entries: RwLock<Vec<(Bytes, Bytes)>>,
}

impl MemStore {
    /// Creates an empty store with the byte-lexicographic key order.
    pub fn new() -> Self {
        Self::with_comparator(byte_order)
    }

    /// Creates an empty store ordered by `cmp`. The comparator must be a
    /// total order over byte strings.
    pub fn with_comparator(cmp: KeyComparator) -> Self {
        Self {
            cmp,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn position(&self, entries: &[(Bytes, Bytes)], key: &[u8]) -> Result<usize, usize> {
        entries.binary_search_by(|(k, _)| (self.cmp)(k, key))
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderedStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let entries = self.entries.read();
        Ok(self
            .position(&entries, key)
            .ok()
            .map(|i| entries[i].1.clone()))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let (sets, deletes) = batch.into_parts();
        let mut entries = self.entries.write();
        for (key, value) in sets {
            match self.position(&entries, &key) {
                Ok(i) => entries[i].1 = value,
                Err(i) => entries.insert(i, (key, value)),
            }
        }
        for key in deletes {
            if let Ok(i) = self.position(&entries, &key) {
                entries.remove(i);
            }
        }
        Ok(())
    }

    fn list(&self, args: &ScanArgs) -> Result<Vec<(Bytes, Bytes)>> {
        if !args.is_satisfiable(self.cmp) || args.limit == Some(0) {
            return Ok(Vec::new());
        }
        let entries = self.entries.read();
        let start = entries.partition_point(|(k, _)| !args.admits_lower(k, self.cmp));
        let mut out = Vec::new();
        for (key, value) in &entries[start..] {
            if !args.within_upper(key, self.cmp) {
                break;
            }
            out.push((key.clone(), value.clone()));
            if args.collected_enough(out.len()) {
                break;
            }
        }
        Ok(args.apply_post(out))
    }
}
