//! Graph cleaning: tip clipping and low-coverage supernode removal.
//!
//! Both passes run in exclusive-mutate mode: collect doomed nodes over the
//! whole table first, delete them, then sweep edge bytes so no surviving
//! node points at a removed neighbor.

use crate::graph::{edges_with_orientation, Graph};
use crate::hash_table::HKey;
use crate::kmer::Orientation;
use crate::supernode::Supernode;
use crate::util::bits_to_words;
use rayon::prelude::*;

/// Supernode length histogram cap, in nodes.
pub const LEN_HIST_CAP: usize = 2000;

/// A plain bit array over node ids. Bit 0 belongs to the sentinel hkey and
/// is never marked by a pass, so it doubles as a dirty flag: passes sharing
/// one bitset call [`Bitset::clear_if_dirty`] on entry and
/// [`Bitset::mark_dirty`] when done, and a never-used array skips the zeroing.
pub struct Bitset {
    words: Vec<u64>,
}

impl Bitset {
    pub fn with_capacity(bits: u64) -> Self {
        Bitset {
            words: vec![0u64; bits_to_words(bits as usize + 1)],
        }
    }

    #[inline]
    pub fn get(&self, i: u64) -> bool {
        self.words[(i / 64) as usize] & (1 << (i % 64)) != 0
    }

    #[inline]
    pub fn set(&mut self, i: u64) {
        self.words[(i / 64) as usize] |= 1 << (i % 64);
    }

    #[inline]
    pub fn mark_dirty(&mut self) {
        self.set(0);
    }

    pub fn clear_if_dirty(&mut self) {
        if self.get(0) {
            self.words.fill(0);
        }
    }
}

/// Clear edge bits that point at nodes no longer in the table.
pub fn prune_dangling_edges(graph: &Graph) {
    let k = graph.kmer_size();
    (1..=graph.ht.capacity()).into_par_iter().for_each(|hkey| {
        if !graph.ht.is_live(hkey) {
            return;
        }
        for orient in [Orientation::Forward, Orientation::Reverse] {
            let bkmer = graph.oriented_bkmer(hkey, orient);
            let nibble = edges_with_orientation(graph.union_edges(hkey), orient);
            for nuc in 0..4u8 {
                if nibble & (1 << nuc) != 0 {
                    let next = bkmer.left_shift_add(k, nuc);
                    if graph.ht.find(next).is_none() {
                        for col in 0..graph.num_cols() {
                            graph.clear_edge(hkey, col, nuc, orient);
                        }
                    }
                }
            }
        }
    });
}

fn delete_nodes(graph: &mut Graph, doomed: Vec<HKey>) -> u64 {
    let removed = doomed.len() as u64;
    for hkey in doomed {
        graph.remove_node(hkey);
    }
    prune_dangling_edges(graph);
    removed
}

/// Remove tips: supernodes shorter than `max_tip_len` nodes with a dead end
/// on at least one side. Returns nodes removed. Running the pass twice with
/// the same limit removes nothing the second time.
pub fn remove_tips(graph: &mut Graph, max_tip_len: usize, visited: &mut Bitset) -> u64 {
    visited.clear_if_dirty();
    let mut doomed = Vec::new();

    for hkey in 1..=graph.ht.capacity() {
        if !graph.ht.is_live(hkey) || visited.get(hkey) {
            continue;
        }
        let sn = Supernode::containing(graph, hkey);
        for &(node, _) in &sn.nodes {
            visited.set(node);
        }
        if sn.len() < max_tip_len && (sn.left_dead_end(graph) || sn.right_dead_end(graph)) {
            doomed.extend(sn.nodes.iter().map(|&(node, _)| node));
        }
    }
    visited.mark_dirty();
    delete_nodes(graph, doomed)
}

/// Histogram of supernode mean coverages: `hist[c]` counts supernodes with
/// mean coverage `c`.
pub fn supernode_covg_histogram(
    graph: &Graph,
    col: Option<usize>,
    visited: &mut Bitset,
) -> Vec<u64> {
    visited.clear_if_dirty();
    let mut hist: Vec<u64> = Vec::new();

    for hkey in 1..=graph.ht.capacity() {
        if !graph.ht.is_live(hkey) || visited.get(hkey) {
            continue;
        }
        let sn = Supernode::containing(graph, hkey);
        for &(node, _) in &sn.nodes {
            visited.set(node);
        }
        let mean = sn.mean_covg(graph, col) as usize;
        if hist.len() <= mean {
            hist.resize(mean + 1, 0);
        }
        hist[mean] += 1;
    }
    visited.mark_dirty();
    hist
}

/// Histogram of supernode lengths in nodes, capped at `cap`.
pub fn supernode_len_histogram(graph: &Graph, cap: usize, visited: &mut Bitset) -> Vec<u64> {
    visited.clear_if_dirty();
    let mut hist = vec![0u64; cap + 1];

    for hkey in 1..=graph.ht.capacity() {
        if !graph.ht.is_live(hkey) || visited.get(hkey) {
            continue;
        }
        let sn = Supernode::containing(graph, hkey);
        for &(node, _) in &sn.nodes {
            visited.set(node);
        }
        hist[sn.len().min(cap)] += 1;
    }
    visited.mark_dirty();
    hist
}

/// Pick a cleaning threshold from a supernode coverage histogram: the
/// smallest coverage `c >= 2` where the histogram stops decreasing (the
/// error/signal boundary). Returns 0 when the histogram never turns, in
/// which case the caller should leave the graph untouched.
pub fn pick_threshold(hist: &[u64]) -> u32 {
    for c in 2..hist.len().saturating_sub(1) {
        if hist[c] <= hist[c + 1] {
            return c as u32;
        }
    }
    0
}

/// Threshold from sequencing depth `d` and mean read length `r`:
/// `d * (r - k + 1) / r`.
pub fn threshold_from_depth(d: f64, r: u32, k: u32) -> u32 {
    if r == 0 || r < k {
        return 0;
    }
    (d * ((r - k + 1) as f64) / r as f64).round() as u32
}

/// Remove supernodes whose mean coverage is below `threshold`. Returns
/// nodes removed.
pub fn remove_low_covg_supernodes(
    graph: &mut Graph,
    threshold: u32,
    col: Option<usize>,
    visited: &mut Bitset,
) -> u64 {
    visited.clear_if_dirty();
    let mut doomed = Vec::new();

    for hkey in 1..=graph.ht.capacity() {
        if !graph.ht.is_live(hkey) || visited.get(hkey) {
            continue;
        }
        let sn = Supernode::containing(graph, hkey);
        for &(node, _) in &sn.nodes {
            visited.set(node);
        }
        if sn.mean_covg(graph, col) < threshold {
            doomed.extend(sn.nodes.iter().map(|&(node, _)| node));
        }
    }
    visited.mark_dirty();
    delete_nodes(graph, doomed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::graph_from_reads;
    use crate::kmer::BinaryKmer;

    fn find(g: &Graph, s: &str) -> Option<HKey> {
        g.ht
            .find(BinaryKmer::from_seq(s.as_bytes(), s.len() as u32).unwrap())
            .map(|(h, _)| h)
    }

    #[test]
    fn test_tip_removal_clips_short_dead_end() {
        // Trunk AAACGGA with a one-node tip ACT hanging off the AAC fork.
        let mut g = graph_from_reads(3, &["AAACGGA", "AAACT"]);
        let mut visited = Bitset::with_capacity(g.ht.capacity());

        let act = find(&g, "ACT").unwrap();
        let aac = find(&g, "AAC").unwrap();
        assert_eq!(g.node_outdegree(aac, Orientation::Forward), 2);

        let removed = remove_tips(&mut g, 2, &mut visited);
        assert_eq!(removed, 1);
        assert!(!g.ht.is_live(act));
        assert!(find(&g, "ACT").is_none());
        // Trunk survives and the dangling AAC->ACT edge is cleared.
        assert!(find(&g, "AAA").is_some());
        assert!(find(&g, "ACG").is_some());
        assert_eq!(g.node_outdegree(aac, Orientation::Forward), 1);
    }

    #[test]
    fn test_tip_removal_is_monotone() {
        let mut g = graph_from_reads(3, &["AAACGGA", "AAACT", "CCCAG"]);
        let mut visited = Bitset::with_capacity(g.ht.capacity());
        remove_tips(&mut g, 2, &mut visited);
        let again = remove_tips(&mut g, 2, &mut visited);
        assert_eq!(again, 0);
    }

    #[test]
    fn test_isolated_short_supernode_is_a_tip() {
        // A lone 3-node chain is shorter than L=4 and dead-ended both
        // sides, so the whole thing goes.
        let mut g = graph_from_reads(3, &["AAACT"]);
        let mut visited = Bitset::with_capacity(g.ht.capacity());
        let removed = remove_tips(&mut g, 4, &mut visited);
        assert_eq!(removed, 3);
        assert_eq!(g.ht.num_kmers(), 0);
    }

    #[test]
    fn test_pick_threshold() {
        // Error regime decays 20,5,2,1 then the signal appears: the first
        // non-decreasing step is at c=5.
        let mut hist = vec![0u64, 20, 5, 2, 1, 0, 0, 1, 1, 1, 1];
        assert_eq!(pick_threshold(&hist), 5);

        // Strictly decreasing histogram: no threshold.
        hist = vec![0, 9, 7, 5, 3, 1];
        assert_eq!(pick_threshold(&hist), 0);

        assert_eq!(pick_threshold(&[]), 0);
        assert_eq!(pick_threshold(&[0, 1]), 0);
    }

    #[test]
    fn test_threshold_from_depth() {
        // d * (r - k + 1) / r
        assert_eq!(threshold_from_depth(10.0, 100, 31), 7);
        assert_eq!(threshold_from_depth(10.0, 0, 31), 0);
        assert_eq!(threshold_from_depth(10.0, 20, 31), 0);
    }

    #[test]
    fn test_low_covg_supernode_removed() {
        // One well-covered supernode, one singly-covered one.
        let mut g = graph_from_reads(
            3,
            &["AAACT", "AAACT", "AAACT", "AAACT", "GGGTG"],
        );
        let mut visited = Bitset::with_capacity(g.ht.capacity());
        let removed = remove_low_covg_supernodes(&mut g, 3, None, &mut visited);
        assert!(removed > 0);
        assert!(find(&g, "AAA").is_some());
        assert!(find(&g, "GGG").is_none());
    }

    #[test]
    fn test_covg_histogram_counts_supernodes() {
        let g = graph_from_reads(3, &["AAACT", "AAACT", "GGGTG"]);
        let mut visited = Bitset::with_capacity(g.ht.capacity());
        let hist = supernode_covg_histogram(&g, None, &mut visited);
        assert_eq!(hist.iter().sum::<u64>(), 2);
        assert_eq!(hist[1], 1); // GGGTG seen once
        assert_eq!(hist[2], 1); // AAACT seen twice
    }

    #[test]
    fn test_len_histogram_and_dirty_reuse() {
        let g = graph_from_reads(3, &["AAACT"]);
        let mut visited = Bitset::with_capacity(g.ht.capacity());
        let h1 = supernode_len_histogram(&g, LEN_HIST_CAP, &mut visited);
        assert_eq!(h1[3], 1);
        // The same bitset is reusable thanks to the dirty flag.
        let h2 = supernode_len_histogram(&g, LEN_HIST_CAP, &mut visited);
        assert_eq!(h2[3], 1);
    }

    #[test]
    fn test_bitset_dirty_flag() {
        let mut bs = Bitset::with_capacity(100);
        bs.clear_if_dirty(); // clean: no-op
        bs.set(42);
        bs.mark_dirty();
        assert!(bs.get(42));
        bs.clear_if_dirty();
        assert!(!bs.get(42));
        assert!(!bs.get(0));
    }
}
