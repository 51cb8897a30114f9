//! The colored de Bruijn graph: hash table plus per-(node, color) coverage,
//! edge bytes, per-color metadata, and the optional path store.
//!
//! Edges are bit flags, never references: the low nibble of a node's edge
//! byte marks which bases extend the stored canonical k-mer forward, the
//! high nibble which bases extend its reverse complement. Traversal is
//! always a canonical lookup, so cycles cost nothing.

use crate::error::Result;
use crate::hash_table::{HKey, KmerHashTable};
use crate::kmer::{nuc_complement, BinaryKmer, Nucleotide, Orientation};
use crate::paths::PathStore;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Read coverage of a (node, color), saturating at `u32::MAX`.
pub type Covg = u32;

/// Edge byte of a (node, color).
pub type Edges = u8;

/// Select the out-edge nibble for an orientation.
#[inline]
pub fn edges_with_orientation(edges: Edges, orient: Orientation) -> u8 {
    match orient {
        Orientation::Forward => edges & 0xf,
        Orientation::Reverse => edges >> 4,
    }
}

/// The single bit marking an extension by `nuc` in `orient`.
#[inline]
pub fn edge_bit(nuc: Nucleotide, orient: Orientation) -> Edges {
    1 << (nuc + 4 * orient.as_bit() as u8)
}

/// Number of extensions in an orientation.
#[inline]
pub fn outdegree(edges: Edges, orient: Orientation) -> u32 {
    edges_with_orientation(edges, orient).count_ones()
}

/// Number of edges arriving at a node travelling in `orient`: its
/// out-degree in the opposite direction.
#[inline]
pub fn indegree(edges: Edges, orient: Orientation) -> u32 {
    outdegree(edges, orient.opposite())
}

/// Per-color error-cleaning provenance, carried in graph file headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorCleaning {
    pub cleaned_tips: bool,
    pub cleaned_snodes: bool,
    pub snodes_threshold: u32,
    pub nodes_threshold: u32,
    pub is_cleaned_against: bool,
    pub cleaned_against_name: String,
}

/// Per-color sample metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphInfo {
    pub sample_name: String,
    pub mean_read_len: u32,
    pub total_seq: u64,
    pub error_rate: f64,
    pub cleaning: ErrorCleaning,
}

impl GraphInfo {
    /// Merge another color's stats into this one (used when joining files
    /// into a shared color). Mean read length is weighted by sequence.
    pub fn merge(&mut self, other: &GraphInfo) {
        let total = self.total_seq + other.total_seq;
        if total > 0 {
            let weighted = self.mean_read_len as u64 * self.total_seq
                + other.mean_read_len as u64 * other.total_seq;
            self.mean_read_len = (weighted / total) as u32;
        } else {
            self.mean_read_len = self.mean_read_len.max(other.mean_read_len);
        }
        self.total_seq = total;
        if self.sample_name.is_empty() {
            self.sample_name = other.sample_name.clone();
        }
        self.error_rate = self.error_rate.max(other.error_rate);

        let c = &mut self.cleaning;
        let oc = &other.cleaning;
        c.cleaned_tips |= oc.cleaned_tips;
        if oc.cleaned_snodes {
            c.snodes_threshold = if c.cleaned_snodes {
                c.snodes_threshold.min(oc.snodes_threshold)
            } else {
                oc.snodes_threshold
            };
            c.cleaned_snodes = true;
        }
    }
}

/// Up to four neighbors of an oriented node.
#[derive(Debug, Clone, Copy, Default)]
pub struct Neighbors {
    nodes: [(HKey, Orientation, Nucleotide); 4],
    len: u8,
}

impl Neighbors {
    #[inline]
    fn push(&mut self, node: HKey, orient: Orientation, nuc: Nucleotide) {
        self.nodes[self.len as usize] = (node, orient, nuc);
        self.len += 1;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, i: usize) -> (HKey, Orientation, Nucleotide) {
        debug_assert!(i < self.len());
        self.nodes[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = (HKey, Orientation, Nucleotide)> + '_ {
        self.nodes[..self.len as usize].iter().copied()
    }
}

pub struct Graph {
    kmer_size: u32,
    num_cols: usize,
    pub ht: KmerHashTable,
    /// (capacity + 1) * num_cols, indexed node-major.
    covgs: Box<[AtomicU32]>,
    edges: Box<[AtomicU8]>,
    pub info: Vec<GraphInfo>,
    pub paths: Option<PathStore>,
}

impl Graph {
    /// Allocate a graph sized for `nkmers` k-mers across `num_cols` colors.
    pub fn new(kmer_size: u32, num_cols: usize, nkmers: u64) -> Self {
        let ht = KmerHashTable::new(kmer_size, nkmers);
        let nslots = (ht.capacity() as usize + 1) * num_cols;
        Graph {
            kmer_size,
            num_cols,
            ht,
            covgs: (0..nslots).map(|_| AtomicU32::new(0)).collect(),
            edges: (0..nslots).map(|_| AtomicU8::new(0)).collect(),
            info: vec![GraphInfo::default(); num_cols],
            paths: None,
        }
    }

    /// Attach a path store with the given arena size.
    pub fn alloc_paths(&mut self, arena_bytes: usize) {
        self.paths = Some(PathStore::new(
            self.ht.capacity(),
            self.num_cols,
            arena_bytes,
        ));
    }

    #[inline]
    pub fn kmer_size(&self) -> u32 {
        self.kmer_size
    }

    #[inline]
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    #[inline]
    fn slot(&self, hkey: HKey, col: usize) -> usize {
        debug_assert!(col < self.num_cols);
        hkey as usize * self.num_cols + col
    }

    #[inline]
    pub fn covg(&self, hkey: HKey, col: usize) -> Covg {
        self.covgs[self.slot(hkey, col)].load(Ordering::Relaxed)
    }

    /// Saturating coverage increment.
    pub fn covg_add(&self, hkey: HKey, col: usize, add: Covg) {
        let a = &self.covgs[self.slot(hkey, col)];
        let mut cur = a.load(Ordering::Relaxed);
        loop {
            let new = cur.saturating_add(add);
            match a.compare_exchange_weak(cur, new, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(seen) => cur = seen,
            }
        }
    }

    /// Sum of coverage across colors, saturating.
    pub fn covg_total(&self, hkey: HKey) -> Covg {
        (0..self.num_cols).fold(0u32, |acc, c| acc.saturating_add(self.covg(hkey, c)))
    }

    /// Whether the node carries evidence in a color.
    #[inline]
    pub fn has_col(&self, hkey: HKey, col: usize) -> bool {
        self.covg(hkey, col) > 0
    }

    #[inline]
    pub fn col_edges(&self, hkey: HKey, col: usize) -> Edges {
        self.edges[self.slot(hkey, col)].load(Ordering::Relaxed)
    }

    /// OR of all colors' edge bytes.
    pub fn union_edges(&self, hkey: HKey) -> Edges {
        (0..self.num_cols).fold(0u8, |acc, c| acc | self.col_edges(hkey, c))
    }

    #[inline]
    pub fn set_edge(&self, hkey: HKey, col: usize, nuc: Nucleotide, orient: Orientation) {
        self.edges[self.slot(hkey, col)].fetch_or(edge_bit(nuc, orient), Ordering::Relaxed);
    }

    #[inline]
    pub fn clear_edge(&self, hkey: HKey, col: usize, nuc: Nucleotide, orient: Orientation) {
        self.edges[self.slot(hkey, col)].fetch_and(!edge_bit(nuc, orient), Ordering::Relaxed);
    }

    /// Merge a loaded edge byte into a node's color (file loading).
    #[inline]
    pub fn set_col_edges(&self, hkey: HKey, col: usize, e: Edges) {
        self.edges[self.slot(hkey, col)].fetch_or(e, Ordering::Relaxed);
    }

    /// Merge loaded coverage into a node's color (saturating).
    #[inline]
    pub fn add_col_covg(&self, hkey: HKey, col: usize, covg: Covg) {
        self.covg_add(hkey, col, covg);
    }

    /// The stored canonical key re-oriented for traversal.
    #[inline]
    pub fn oriented_bkmer(&self, hkey: HKey, orient: Orientation) -> BinaryKmer {
        self.ht.kmer_at(hkey).oriented(self.kmer_size, orient)
    }

    /// Recover the orientation of an oriented k-mer at a known node.
    #[inline]
    pub fn orientation_of(&self, hkey: HKey, bkmer: BinaryKmer) -> Orientation {
        if self.ht.kmer_at(hkey) == bkmer {
            Orientation::Forward
        } else {
            Orientation::Reverse
        }
    }

    /// Resolve the neighbors reachable from an oriented k-mer through the
    /// bits of `edges_nibble` (an out-edge nibble, low four bits).
    pub fn next_nodes(&self, bkmer: BinaryKmer, edges_nibble: u8) -> Neighbors {
        let mut nb = Neighbors::default();
        for nuc in 0..4u8 {
            if edges_nibble & (1 << nuc) != 0 {
                let next = bkmer.left_shift_add(self.kmer_size, nuc);
                if let Some((key, orient)) = self.ht.find(next) {
                    nb.push(key, orient, nuc);
                }
            }
        }
        nb
    }

    /// Neighbors of a node in an orientation, via union edges.
    pub fn neighbors(&self, hkey: HKey, orient: Orientation) -> Neighbors {
        let e = edges_with_orientation(self.union_edges(hkey), orient);
        self.next_nodes(self.oriented_bkmer(hkey, orient), e)
    }

    #[inline]
    pub fn node_outdegree(&self, hkey: HKey, orient: Orientation) -> u32 {
        outdegree(self.union_edges(hkey), orient)
    }

    #[inline]
    pub fn node_indegree(&self, hkey: HKey, orient: Orientation) -> u32 {
        indegree(self.union_edges(hkey), orient)
    }

    /// Record the edge between two consecutive oriented k-mers of a read.
    /// Both directions are set: the forward bit on the earlier node and the
    /// reciprocal bit on the later one.
    pub fn add_edge_pair(
        &self,
        col: usize,
        prev: (HKey, Orientation),
        prev_first_nuc: Nucleotide,
        cur: (HKey, Orientation),
        cur_last_nuc: Nucleotide,
    ) {
        self.set_edge(prev.0, col, cur_last_nuc, prev.1);
        self.set_edge(cur.0, col, nuc_complement(prev_first_nuc), cur.1.opposite());
    }

    /// Insert one k-mer observed in a read: bump coverage, return its node.
    pub fn add_kmer(&self, col: usize, bk: BinaryKmer) -> Result<(HKey, Orientation)> {
        let (hkey, orient, _) = self.ht.find_or_insert(bk)?;
        self.covg_add(hkey, col, 1);
        Ok((hkey, orient))
    }

    /// Delete a node outright: coverage, edges, then the hash slot.
    /// Exclusive access only; dangling neighbor bits are the caller's to
    /// sweep afterwards.
    pub fn remove_node(&mut self, hkey: HKey) {
        for col in 0..self.num_cols {
            self.covgs[self.slot(hkey, col)].store(0, Ordering::Relaxed);
            self.edges[self.slot(hkey, col)].store(0, Ordering::Relaxed);
        }
        self.ht.remove(hkey);
    }

    /// Paths attached to a node, or the null chain when no store is loaded.
    #[inline]
    pub fn path_head(&self, hkey: HKey) -> crate::paths::PathIndex {
        match &self.paths {
            Some(ps) => ps.head(hkey),
            None => crate::paths::PATH_NULL,
        }
    }
}
