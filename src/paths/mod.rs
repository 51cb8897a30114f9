//! Append-only store of threading paths.
//!
//! Paths are variable-length nucleotide strings (junction choices) anchored
//! at graph nodes. The store is one byte arena of packed entries; each node
//! owns a singly linked chain of entries threaded through `prev` offsets,
//! newest first. Offsets never move once issued.
//!
//! Entry layout, starting at its arena offset:
//!
//! ```text
//! prev       u64 LE   offset of the next entry in this node's chain,
//!                     PATH_NULL when the chain ends
//! colset     ceil(C/8) bytes, bit i set iff color i witnessed the path
//! lenorient  u32 LE   low 31 bits length in bases, top bit orientation
//! bases      ceil(len/4) bytes, packed two bits per base
//! ```
//!
//! Concurrency: writers reserve space with a fetch-add on the bump pointer,
//! fill the entry, then publish it by CAS on the node's head offset. Bytes
//! are fully written before the head CAS, so readers following published
//! offsets always see complete entries. Color bits are merged with atomic
//! OR, so deduplication against an already-published entry needs no lock.

pub mod packed;

use crate::error::{GraphError, Result};
use crate::hash_table::HKey;
use crate::kmer::{Nucleotide, Orientation};
use packed::{combine_lenorient, packed_len_bytes, split_lenorient, PathLen};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// Byte offset of a path entry in the arena.
pub type PathIndex = u64;

/// End-of-chain sentinel (all ones).
pub const PATH_NULL: PathIndex = u64::MAX;

pub struct PathStore {
    arena: Box<[AtomicU8]>,
    bump: AtomicUsize,
    /// Head entry offset per node, indexed by `HKey`.
    heads: Box<[AtomicU64]>,
    num_cols: usize,
    colset_bytes: usize,
    num_paths: AtomicU64,
}

impl PathStore {
    /// Allocate a store for a graph of `capacity` nodes and `num_cols`
    /// colors, with an arena of `arena_bytes`.
    pub fn new(capacity: u64, num_cols: usize, arena_bytes: usize) -> Self {
        PathStore {
            arena: (0..arena_bytes).map(|_| AtomicU8::new(0)).collect(),
            bump: AtomicUsize::new(0),
            heads: (0..=capacity).map(|_| AtomicU64::new(PATH_NULL)).collect(),
            num_cols,
            colset_bytes: (num_cols + 7) / 8,
            num_paths: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Distinct paths stored (merges don't count).
    #[inline]
    pub fn num_paths(&self) -> u64 {
        self.num_paths.load(Ordering::Acquire)
    }

    /// Arena bytes in use.
    #[inline]
    pub fn bytes_used(&self) -> usize {
        self.bump.load(Ordering::Acquire).min(self.arena.len())
    }

    /// Nodes with at least one path.
    pub fn num_kmers_with_paths(&self) -> u64 {
        self.heads
            .iter()
            .filter(|h| h.load(Ordering::Acquire) != PATH_NULL)
            .count() as u64
    }

    #[inline]
    pub fn head(&self, hkey: HKey) -> PathIndex {
        self.heads[hkey as usize].load(Ordering::Acquire)
    }

    fn entry_size(&self, len: usize) -> usize {
        8 + self.colset_bytes + 4 + packed_len_bytes(len)
    }

    #[inline]
    fn read_byte(&self, off: usize) -> u8 {
        self.arena[off].load(Ordering::Relaxed)
    }

    fn read_u64(&self, off: usize) -> u64 {
        let mut bytes = [0u8; 8];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.read_byte(off + i);
        }
        u64::from_le_bytes(bytes)
    }

    fn read_u32(&self, off: usize) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.read_byte(off + i);
        }
        u32::from_le_bytes(bytes)
    }

    fn write_bytes(&self, off: usize, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.arena[off + i].store(b, Ordering::Relaxed);
        }
    }

    /// Offset of the next entry in the chain.
    #[inline]
    pub fn entry_prev(&self, index: PathIndex) -> PathIndex {
        self.read_u64(index as usize)
    }

    /// Length and anchor orientation of an entry.
    #[inline]
    pub fn entry_len_orient(&self, index: PathIndex) -> (PathLen, Orientation) {
        split_lenorient(self.read_u32(index as usize + 8 + self.colset_bytes))
    }

    /// Whether color `col` witnessed this entry.
    #[inline]
    pub fn entry_has_col(&self, index: PathIndex, col: usize) -> bool {
        debug_assert!(col < self.num_cols);
        self.read_byte(index as usize + 8 + col / 8) & (1 << (col % 8)) != 0
    }

    fn entry_set_col(&self, index: PathIndex, col: usize) {
        self.arena[index as usize + 8 + col / 8].fetch_or(1 << (col % 8), Ordering::AcqRel);
    }

    /// Raw color bitmap of an entry.
    pub fn entry_colset(&self, index: PathIndex) -> Vec<u8> {
        (0..self.colset_bytes)
            .map(|i| self.read_byte(index as usize + 8 + i))
            .collect()
    }

    /// Unpack an entry's bases into `dst` (resized to the path length).
    pub fn fetch(&self, index: PathIndex, dst: &mut Vec<Nucleotide>) {
        let (len, _) = self.entry_len_orient(index);
        let base_off = index as usize + 8 + self.colset_bytes + 4;
        dst.clear();
        dst.resize(len as usize, 0);
        for (i, d) in dst.iter_mut().enumerate() {
            *d = (self.read_byte(base_off + i / 4) >> (2 * (i % 4))) & 3;
        }
    }

    fn entry_bases_match(&self, index: PathIndex, packed: &[u8]) -> bool {
        let base_off = index as usize + 8 + self.colset_bytes + 4;
        packed
            .iter()
            .enumerate()
            .all(|(i, &b)| self.read_byte(base_off + i) == b)
    }

    /// Scan a chain from `from` down to (excluding) `until` for an entry
    /// with identical orientation, length and bases.
    fn find_dup(
        &self,
        from: PathIndex,
        until: PathIndex,
        lenorient: u32,
        packed: &[u8],
    ) -> Option<PathIndex> {
        let mut idx = from;
        while idx != until && idx != PATH_NULL {
            if self.read_u32(idx as usize + 8 + self.colset_bytes) == lenorient
                && self.entry_bases_match(idx, packed)
            {
                return Some(idx);
            }
            idx = self.entry_prev(idx);
        }
        None
    }

    /// Append a path at `hkey`, or merge `col` into an existing identical
    /// entry. Returns the entry's offset.
    ///
    /// Safe to call concurrently; chains linearize in CAS success order.
    pub fn append(
        &self,
        hkey: HKey,
        orient: Orientation,
        bases: &[Nucleotide],
        col: usize,
    ) -> Result<PathIndex> {
        debug_assert!(col < self.num_cols);
        debug_assert!(bases.len() as u64 <= packed::MAX_PATH_LEN as u64);

        let lenorient = combine_lenorient(bases.len() as PathLen, orient);
        let mut pbuf = vec![0u8; packed_len_bytes(bases.len())];
        packed::pack_bases(&mut pbuf, bases);

        let head = &self.heads[hkey as usize];
        let mut old_head = head.load(Ordering::Acquire);

        // Merge into an existing identical entry if the chain has one.
        if let Some(dup) = self.find_dup(old_head, PATH_NULL, lenorient, &pbuf) {
            self.entry_set_col(dup, col);
            return Ok(dup);
        }

        let size = self.entry_size(bases.len());
        let off = self.bump.fetch_add(size, Ordering::AcqRel);
        if off + size > self.arena.len() {
            return Err(GraphError::ArenaFull);
        }

        let mut colset = vec![0u8; self.colset_bytes];
        colset[col / 8] = 1 << (col % 8);
        self.write_bytes(off + 8, &colset);
        self.write_bytes(off + 8 + self.colset_bytes, &lenorient.to_le_bytes());
        self.write_bytes(off + 8 + self.colset_bytes + 4, &pbuf);

        loop {
            self.write_bytes(off, &old_head.to_le_bytes());
            match head.compare_exchange(
                old_head,
                off as u64,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.num_paths.fetch_add(1, Ordering::AcqRel);
                    return Ok(off as u64);
                }
                Err(newer) => {
                    // Someone else published first: re-scan only the new
                    // prefix of the chain before retrying. If they added
                    // our path, merge and abandon the reserved bytes.
                    if let Some(dup) = self.find_dup(newer, old_head, lenorient, &pbuf) {
                        self.entry_set_col(dup, col);
                        return Ok(dup);
                    }
                    old_head = newer;
                }
            }
        }
    }

    /// Iterate entry offsets in a node's chain, newest first.
    pub fn iter(&self, hkey: HKey) -> PathChainIter<'_> {
        PathChainIter {
            store: self,
            next: self.head(hkey),
        }
    }

    /// Install raw arena bytes loaded from a path file. Offsets in the file
    /// are preserved; heads must be set afterwards with [`Self::set_head`].
    pub fn install_arena(&self, bytes: &[u8], num_paths: u64) -> Result<()> {
        if bytes.len() > self.arena.len() {
            return Err(GraphError::ArenaFull);
        }
        self.write_bytes(0, bytes);
        self.bump.store(bytes.len(), Ordering::Release);
        self.num_paths.store(num_paths, Ordering::Release);
        Ok(())
    }

    pub fn set_head(&self, hkey: HKey, index: PathIndex) {
        self.heads[hkey as usize].store(index, Ordering::Release);
    }

    /// Copy the used part of the arena out, for serialization.
    pub fn arena_snapshot(&self) -> Vec<u8> {
        (0..self.bytes_used()).map(|i| self.read_byte(i)).collect()
    }
}

pub struct PathChainIter<'a> {
    store: &'a PathStore,
    next: PathIndex,
}

impl Iterator for PathChainIter<'_> {
    type Item = PathIndex;

    fn next(&mut self) -> Option<PathIndex> {
        if self.next == PATH_NULL {
            return None;
        }
        let idx = self.next;
        self.next = self.store.entry_prev(idx);
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PathStore {
        PathStore::new(64, 4, 4096)
    }

    #[test]
    fn test_append_and_fetch() {
        let ps = store();
        let idx = ps.append(5, Orientation::Forward, &[0, 1, 2, 3, 1], 0).unwrap();
        assert_eq!(ps.num_paths(), 1);

        let (len, orient) = ps.entry_len_orient(idx);
        assert_eq!(len, 5);
        assert_eq!(orient, Orientation::Forward);
        assert!(ps.entry_has_col(idx, 0));
        assert!(!ps.entry_has_col(idx, 1));

        let mut bases = Vec::new();
        ps.fetch(idx, &mut bases);
        assert_eq!(bases, vec![0, 1, 2, 3, 1]);
    }

    #[test]
    fn test_duplicate_append_merges_colors() {
        // Same path appended in colors 0 and 2 yields one entry with both
        // bits set.
        let ps = store();
        let a = ps.append(7, Orientation::Forward, &[0, 1, 2], 0).unwrap();
        let b = ps.append(7, Orientation::Forward, &[0, 1, 2], 2).unwrap();
        assert_eq!(a, b);
        assert_eq!(ps.num_paths(), 1);
        assert_eq!(ps.iter(7).count(), 1);
        assert!(ps.entry_has_col(a, 0));
        assert!(!ps.entry_has_col(a, 1));
        assert!(ps.entry_has_col(a, 2));
    }

    #[test]
    fn test_distinct_entries_chain() {
        let ps = store();
        // Differ by bases, length, or orientation: all distinct entries.
        ps.append(3, Orientation::Forward, &[0, 1], 0).unwrap();
        ps.append(3, Orientation::Forward, &[0, 2], 0).unwrap();
        ps.append(3, Orientation::Forward, &[0, 1, 2], 0).unwrap();
        ps.append(3, Orientation::Reverse, &[0, 1], 1).unwrap();
        assert_eq!(ps.num_paths(), 4);

        let mut seen = Vec::new();
        let mut bases = Vec::new();
        for idx in ps.iter(3) {
            let (len, orient) = ps.entry_len_orient(idx);
            ps.fetch(idx, &mut bases);
            seen.push((orient, len, bases.clone()));
        }
        // Newest first.
        assert_eq!(
            seen,
            vec![
                (Orientation::Reverse, 2, vec![0, 1]),
                (Orientation::Forward, 3, vec![0, 1, 2]),
                (Orientation::Forward, 2, vec![0, 2]),
                (Orientation::Forward, 2, vec![0, 1]),
            ]
        );
    }

    #[test]
    fn test_arena_full() {
        let ps = PathStore::new(8, 1, 32);
        let mut err = None;
        for i in 0..100u8 {
            if let Err(e) = ps.append(1, Orientation::Forward, &[i & 3, 1, 2, 3], 0) {
                err = Some(e);
                break;
            }
        }
        assert!(matches!(err, Some(GraphError::ArenaFull)));
    }

    #[test]
    fn test_concurrent_appends_linearize() {
        let ps = PathStore::new(16, 8, 1 << 16);
        std::thread::scope(|scope| {
            for t in 0..8u8 {
                let ps = &ps;
                scope.spawn(move || {
                    for i in 0..16u8 {
                        ps.append(9, Orientation::Forward, &[t & 3, i & 3, (t ^ i) & 3], t as usize)
                            .unwrap();
                    }
                });
            }
        });
        // Every appended (bases) triple is present exactly once.
        let total = ps.iter(9).count() as u64;
        assert_eq!(total, ps.num_paths());
        let mut bases = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for idx in ps.iter(9) {
            ps.fetch(idx, &mut bases);
            assert!(seen.insert(bases.clone()), "duplicate chain entry");
        }
    }
}
