// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

//! The ordered key-value contract consumed by the tree.
//!
//! [`OrderedStore`] is the seam between the tree and whatever holds its
//! records: exact-key reads plus batched writes, with an ordered range scan
//! for direct callers. The tree implements the trait itself, so a tree can
//! serve as the backing store of another tree.

use anyhow::Result;
use bytes::Bytes;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::warn;

/// Total order over user keys.
pub type KeyComparator = fn(&[u8], &[u8]) -> Ordering;

/// The default key order: byte-lexicographic.
pub fn byte_order(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Bounds and post-processing options for an ordered range scan.
///
/// `gt`/`gte` and `lt`/`lte` are mutually exclusive per side; supplying both
/// for one side is a caller error and yields an empty scan. Entries are
/// gathered forward across the bounded run; `offset` then drops the head of
/// the run, `reverse` flips what remains, and `limit` finally truncates. A
/// reversed scan therefore emits the tail of the range, newest-boundary
/// first.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanArgs {
    /// Emit only keys strictly greater than this bound.
    pub gt: Option<Bytes>,
    /// Emit only keys greater than or equal to this bound.
    pub gte: Option<Bytes>,
    /// Stop before keys greater than or equal to this bound.
    pub lt: Option<Bytes>,
    /// Stop before keys strictly greater than this bound.
    pub lte: Option<Bytes>,
    /// Upper bound on the number of collected entries.
    pub limit: Option<usize>,
    /// Number of collected entries to drop, applied after collection.
    pub offset: usize,
    /// Reverse the final collected sequence.
    pub reverse: bool,
}

impl ScanArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gt(mut self, key: impl Into<Bytes>) -> Self {
        self.gt = Some(key.into());
        self
    }

    pub fn gte(mut self, key: impl Into<Bytes>) -> Self {
        self.gte = Some(key.into());
        self
    }

    pub fn lt(mut self, key: impl Into<Bytes>) -> Self {
        self.lt = Some(key.into());
        self
    }

    pub fn lte(mut self, key: impl Into<Bytes>) -> Self {
        self.lte = Some(key.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Whether any key can satisfy these bounds under `cmp`. Conflicting
    /// bound pairs additionally log a warning through the host's `tracing`
    /// subscriber.
    pub(crate) fn is_satisfiable(&self, cmp: KeyComparator) -> bool {
        if self.gt.is_some() && self.gte.is_some() {
            warn!("range scan supplied both gt and gte lower bounds");
            return false;
        }
        if self.lt.is_some() && self.lte.is_some() {
            warn!("range scan supplied both lt and lte upper bounds");
            return false;
        }
        let start = self.gt.as_ref().or(self.gte.as_ref());
        let end = self.lt.as_ref().or(self.lte.as_ref());
        if let (Some(start), Some(end)) = (start, end) {
            match cmp(start, end) {
                Ordering::Greater => return false,
                // A degenerate point is only reachable when both ends
                // include it.
                Ordering::Equal => return self.gte.is_some() && self.lte.is_some(),
                Ordering::Less => {}
            }
        }
        true
    }

    /// Whether `key` clears the lower bound.
    pub(crate) fn admits_lower(&self, key: &[u8], cmp: KeyComparator) -> bool {
        if let Some(gt) = &self.gt {
            return cmp(key, gt) == Ordering::Greater;
        }
        if let Some(gte) = &self.gte {
            return cmp(key, gte) != Ordering::Less;
        }
        true
    }

    /// Whether `key` is still below the upper bound.
    pub(crate) fn within_upper(&self, key: &[u8], cmp: KeyComparator) -> bool {
        if let Some(lt) = &self.lt {
            return cmp(key, lt) == Ordering::Less;
        }
        if let Some(lte) = &self.lte {
            return cmp(key, lte) != Ordering::Greater;
        }
        true
    }

    /// Whether collection may stop once `len` entries are gathered. With
    /// `reverse` the emitted window is anchored at the far end of the run,
    /// so the whole run has to be gathered first.
    pub(crate) fn collected_enough(&self, len: usize) -> bool {
        if self.reverse {
            return false;
        }
        self.limit
            .is_some_and(|limit| len >= limit.saturating_add(self.offset))
    }

    /// Post-collection pass: drop the first `offset` entries, reverse, then
    /// truncate to `limit`.
    pub(crate) fn apply_post(&self, mut entries: Vec<(Bytes, Bytes)>) -> Vec<(Bytes, Bytes)> {
        if self.offset > 0 {
            entries.drain(..self.offset.min(entries.len()));
        }
        if self.reverse {
            entries.reverse();
        }
        if let Some(limit) = self.limit {
            entries.truncate(limit);
        }
        entries
    }
}

/// A batch of set and delete operations applied through
/// [`OrderedStore::write`].
///
/// Sets apply first in their listed order, then deletes in theirs. The batch
/// keeps duplicates and never reorders, so the last write to a key wins.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WriteBatch {
    sets: Vec<(Bytes, Bytes)>,
    deletes: Vec<Bytes>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a set operation to the batch.
    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.sets.push((key.into(), value.into()));
    }

    /// Add batch set operations to the batch.
    pub fn puts(&mut self, entries: impl IntoIterator<Item = (Bytes, Bytes)>) {
        self.sets.extend(entries);
    }

    /// Add a delete operation to the batch.
    pub fn remove(&mut self, key: impl Into<Bytes>) {
        self.deletes.push(key.into());
    }

    pub fn sets(&self) -> &[(Bytes, Bytes)] {
        &self.sets
    }

    pub fn deletes(&self) -> &[Bytes] {
        &self.deletes
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sets.len() + self.deletes.len()
    }

    pub fn into_parts(self) -> (Vec<(Bytes, Bytes)>, Vec<Bytes>) {
        (self.sets, self.deletes)
    }
}

impl From<(Bytes, Bytes)> for WriteBatch {
    fn from((key, value): (Bytes, Bytes)) -> Self {
        let mut batch = Self::new();
        batch.put(key, value);
        batch
    }
}

impl From<Vec<(Bytes, Bytes)>> for WriteBatch {
    fn from(entries: Vec<(Bytes, Bytes)>) -> Self {
        let mut batch = Self::new();
        batch.puts(entries);
        batch
    }
}

/// An ordered byte-string key to byte-string value store.
///
/// Implementations must preserve written bytes exactly; values hold
/// serialized node bodies containing arbitrary bytes. Errors from the
/// underlying medium propagate unchanged, and a partially applied batch is
/// the caller's problem to reconcile.
pub trait OrderedStore {
    /// Gets the value stored at `key`. Returns `None` if the key is absent.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Applies `batch`: all sets in listed order, then all deletes.
    fn write(&self, batch: WriteBatch) -> Result<()>;

    /// Ordered enumeration of the entries satisfying `args`.
    fn list(&self, args: &ScanArgs) -> Result<Vec<(Bytes, Bytes)>>;

    /// Point-set sugar over [`write`](OrderedStore::write).
    fn set(&self, key: Bytes, value: Bytes) -> Result<()> {
        self.write(WriteBatch::from((key, value)))
    }

    /// Point-delete sugar over [`write`](OrderedStore::write). Deleting an
    /// absent key is a no-op.
    fn delete(&self, key: Bytes) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.remove(key);
        self.write(batch)
    }
}

impl<T: OrderedStore + ?Sized> OrderedStore for &T {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        (**self).get(key)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        (**self).write(batch)
    }

    fn list(&self, args: &ScanArgs) -> Result<Vec<(Bytes, Bytes)>> {
        (**self).list(args)
    }
}

impl<T: OrderedStore + ?Sized> OrderedStore for Arc<T> {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        (**self).get(key)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        (**self).write(batch)
    }

    fn list(&self, args: &ScanArgs) -> Result<Vec<(Bytes, Bytes)>> {
        (**self).list(args)
    }
}
