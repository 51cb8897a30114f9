//! Supernode collection: maximal unambiguous runs of nodes.
//!
//! A supernode extends through a node while the current node has exactly
//! one out-edge and the next node has exactly one in-edge on the arrival
//! strand. Extension also stops when it would close a cycle back onto the
//! first node.

use crate::graph::Graph;
use crate::hash_table::HKey;
use crate::kmer::{nuc_to_char, Orientation};

/// An oriented run of nodes, left to right.
#[derive(Debug, Clone)]
pub struct Supernode {
    pub nodes: Vec<(HKey, Orientation)>,
}

fn extend_right(graph: &Graph, nodes: &mut Vec<(HKey, Orientation)>) {
    loop {
        let &(cur, orient) = nodes.last().unwrap();
        if graph.node_outdegree(cur, orient) != 1 {
            return;
        }
        let nb = graph.neighbors(cur, orient);
        if nb.len() != 1 {
            return; // dangling edge bit
        }
        let (next, next_orient, _) = nb.get(0);
        if graph.node_indegree(next, next_orient) != 1 {
            return; // join point
        }
        if next == nodes[0].0 {
            return; // cycle closed
        }
        nodes.push((next, next_orient));
    }
}

fn reverse_flip(nodes: &mut [(HKey, Orientation)]) {
    nodes.reverse();
    for (_, orient) in nodes.iter_mut() {
        *orient = orient.opposite();
    }
}

impl Supernode {
    /// Collect the supernode containing `seed`.
    pub fn containing(graph: &Graph, seed: HKey) -> Supernode {
        let mut nodes = vec![(seed, Orientation::Forward)];
        extend_right(graph, &mut nodes);
        reverse_flip(&mut nodes);
        extend_right(graph, &mut nodes);
        reverse_flip(&mut nodes);
        Supernode { nodes }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// No edges arriving at the left end.
    pub fn left_dead_end(&self, graph: &Graph) -> bool {
        let (first, orient) = self.nodes[0];
        graph.node_indegree(first, orient) == 0
    }

    /// No edges leaving the right end.
    pub fn right_dead_end(&self, graph: &Graph) -> bool {
        let (last, orient) = self.nodes[self.len() - 1];
        graph.node_outdegree(last, orient) == 0
    }

    /// Mean node coverage, rounded to nearest. `col` selects one color;
    /// `None` sums across all loaded colors.
    pub fn mean_covg(&self, graph: &Graph, col: Option<usize>) -> u32 {
        let sum: u64 = self
            .nodes
            .iter()
            .map(|&(h, _)| match col {
                Some(c) => graph.covg(h, c) as u64,
                None => graph.covg_total(h) as u64,
            })
            .sum();
        ((sum + self.len() as u64 / 2) / self.len() as u64) as u32
    }

    /// The assembled sequence: first k-mer plus one base per further node.
    pub fn seq(&self, graph: &Graph) -> String {
        let k = graph.kmer_size();
        let (first, orient) = self.nodes[0];
        let mut s = graph.oriented_bkmer(first, orient).to_seq(k);
        for &(h, o) in &self.nodes[1..] {
            s.push(nuc_to_char(graph.oriented_bkmer(h, o).last_nuc()) as char);
        }
        s
    }

    /// Flip so the sequence is the lexicographically smaller strand, for
    /// stable output.
    pub fn normalize(&mut self, graph: &Graph) {
        let fwd = self.seq(graph);
        reverse_flip(&mut self.nodes);
        let rev = self.seq(graph);
        if fwd <= rev {
            reverse_flip(&mut self.nodes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::graph_from_reads;
    use crate::kmer::BinaryKmer;

    fn node(g: &Graph, s: &str) -> HKey {
        g.ht
            .find(BinaryKmer::from_seq(s.as_bytes(), s.len() as u32).unwrap())
            .unwrap()
            .0
    }

    #[test]
    fn test_chain_is_one_supernode() {
        let g = graph_from_reads(3, &["AAACT"]);
        let sn = Supernode::containing(&g, node(&g, "AAC"));
        assert_eq!(sn.len(), 3);
        let seq = sn.seq(&g);
        assert!(seq == "AAACT" || seq == "AGTTT", "got {}", seq);
        assert!(sn.left_dead_end(&g));
        assert!(sn.right_dead_end(&g));
    }

    #[test]
    fn test_fork_splits_supernodes() {
        // AAC forks to ACT and ACG, so each branch tip is its own supernode.
        let g = graph_from_reads(3, &["AAACT", "AAACG"]);
        let sn = Supernode::containing(&g, node(&g, "ACT"));
        assert_eq!(sn.len(), 1);
        assert!(sn.right_dead_end(&g) || sn.left_dead_end(&g));

        // The trunk stops at the fork node.
        let trunk = Supernode::containing(&g, node(&g, "AAA"));
        assert_eq!(trunk.len(), 2);
    }

    #[test]
    fn test_mean_covg() {
        let g = graph_from_reads(3, &["AAACT", "AAACT", "AAACT"]);
        let sn = Supernode::containing(&g, node(&g, "AAA"));
        assert_eq!(sn.mean_covg(&g, Some(0)), 3);
        assert_eq!(sn.mean_covg(&g, None), 3);
    }

    #[test]
    fn test_normalize_is_stable() {
        let g = graph_from_reads(3, &["AAACT"]);
        let mut a = Supernode::containing(&g, node(&g, "AAA"));
        let mut b = Supernode::containing(&g, node(&g, "ACT"));
        a.normalize(&g);
        b.normalize(&g);
        assert_eq!(a.seq(&g), b.seq(&g));
    }
}
