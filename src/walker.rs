//! Path-guided graph traversal.
//!
//! The walker sits on an oriented node and consumes path evidence to pick a
//! unique extension at forks. Paths are held in a pool of reusable records;
//! the four partitions (`curr`, `new`, `counter`, `unused`) are index lists
//! into that pool, so pool growth never invalidates a path in flight.
//!
//! Partition roles:
//! - `curr`: paths committed as evidence for the walk so far.
//! - `new`: paths picked up at the current node, not yet past a fork. They
//!   do not vote at the node they were picked up at.
//! - `counter`: paths picked up at predecessors of the walk; they answer
//!   "does every sibling branch have evidence?" without proposing a branch.
//! - `unused`: free records.
//!
//! A walker is single-threaded and never blocks; it allocates only when the
//! pool grows (doubling).

use crate::graph::{edges_with_orientation, Graph, Neighbors};
use crate::hash_table::HKey;
use crate::kmer::{nuc_complement, nuc_to_char, BinaryKmer, KmerStr, Nucleotide, Orientation};
use crate::paths::packed::PathLen;

#[derive(Debug, Default, Clone)]
struct FollowPath {
    bases: Vec<Nucleotide>,
    pos: PathLen,
    len: PathLen,
}

impl FollowPath {
    #[inline]
    fn head_base(&self) -> Nucleotide {
        self.bases[self.pos as usize]
    }
}

pub struct GraphWalker<'g> {
    graph: &'g Graph,
    color: usize,
    pub node: HKey,
    pub orient: Orientation,
    /// The anchor k-mer in walk orientation (not necessarily canonical).
    pub bkmer: BinaryKmer,
    pool: Vec<FollowPath>,
    curr: Vec<u32>,
    new: Vec<u32>,
    counter: Vec<u32>,
    unused: Vec<u32>,
}

impl<'g> GraphWalker<'g> {
    pub fn new(graph: &'g Graph, color: usize) -> Self {
        GraphWalker {
            graph,
            color,
            node: crate::hash_table::HKEY_NULL,
            orient: Orientation::Forward,
            bkmer: BinaryKmer::zero(),
            pool: Vec::new(),
            curr: Vec::new(),
            new: Vec::new(),
            counter: Vec::new(),
            unused: Vec::new(),
        }
    }

    #[inline]
    pub fn color(&self) -> usize {
        self.color
    }

    /// The graph this walker traverses.
    #[inline]
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    fn acquire(&mut self) -> u32 {
        if let Some(idx) = self.unused.pop() {
            return idx;
        }
        let first = self.pool.len() as u32;
        let grow = self.pool.len().max(2);
        self.pool
            .extend(std::iter::repeat_with(FollowPath::default).take(grow));
        self.unused.extend(first + 1..first + grow as u32);
        first
    }

    /// Pick up paths anchored at `node` that match `orient` and the walk
    /// color. Returns how many were taken.
    fn pickup_paths(&mut self, node: HKey, orient: Orientation, into_counter: bool) -> usize {
        let Some(store) = self.graph.paths.as_ref() else {
            return 0;
        };
        let mut taken = 0;
        let mut index = store.head(node);
        while index != crate::paths::PATH_NULL {
            let (len, porient) = store.entry_len_orient(index);
            if porient == orient && store.entry_has_col(index, self.color) {
                let idx = self.acquire();
                let path = &mut self.pool[idx as usize];
                store.fetch(index, &mut path.bases);
                path.pos = 0;
                path.len = len;
                if into_counter {
                    self.counter.push(idx);
                } else {
                    self.new.push(idx);
                }
                taken += 1;
            }
            index = store.entry_prev(index);
        }
        taken
    }

    /// Anchor the walker. Any previous walk must have been `finish`ed.
    pub fn init(&mut self, node: HKey, orient: Orientation) {
        debug_assert!(self.curr.is_empty() && self.new.is_empty() && self.counter.is_empty());
        self.node = node;
        self.orient = orient;
        self.bkmer = self.graph.oriented_bkmer(node, orient);
        self.pickup_paths(node, orient, false);
    }

    /// Return every path to the pool, ready for the next `init`.
    pub fn finish(&mut self) {
        self.unused.extend(self.curr.drain(..));
        self.unused.extend(self.new.drain(..));
        self.unused.extend(self.counter.drain(..));
    }

    fn dump_paths(out: &mut String, pool: &[FollowPath], part: &[u32]) {
        for &idx in part {
            let p = &pool[idx as usize];
            let seq: String = p.bases.iter().map(|&b| nuc_to_char(b) as char).collect();
            out.push_str(&format!("   {} [{}/{}]\n", seq, p.pos, p.len));
        }
    }

    /// Render walker state for corruption diagnostics.
    pub fn state_dump(&self) -> String {
        let k = self.graph.kmer_size();
        let mut s = format!(
            "walker at {} ({}:{:?})\n curr ({}):\n",
            KmerStr(self.bkmer, k),
            KmerStr(self.graph.ht.kmer_at(self.node), k),
            self.orient,
            self.curr.len()
        );
        Self::dump_paths(&mut s, &self.pool, &self.curr);
        s.push_str(&format!(" new ({}):\n", self.new.len()));
        Self::dump_paths(&mut s, &self.pool, &self.new);
        s.push_str(&format!(" counter ({}):\n", self.counter.len()));
        Self::dump_paths(&mut s, &self.pool, &self.counter);
        s
    }

    /// Pick the extension the path evidence agrees on, or `None` when the
    /// evidence is absent, split, or doesn't cover every sibling branch.
    /// Returns an index into `next`.
    ///
    /// A result is a pure function of (current paths, counter paths, next
    /// nodes, color); it reads no other walker state.
    pub fn choose(&self, next: &Neighbors) -> Option<usize> {
        if next.is_empty() {
            return None;
        }
        if next.len() == 1 {
            return Some(0);
        }

        // Restrict to branches present in the walk color.
        let mut indices = [0usize; 4];
        let mut bases = [0u8; 4];
        let mut m = 0;
        for (i, (node, _, nuc)) in next.iter().enumerate() {
            if self.graph.has_col(node, self.color) {
                indices[m] = i;
                bases[m] = nuc;
                m += 1;
            }
        }
        if m == 1 {
            return Some(indices[0]);
        }
        if m == 0 || self.curr.is_empty() {
            return None;
        }

        // The oldest commitment decides; every path of the same age must
        // agree. `curr` is ordered oldest first by construction.
        let oldest = &self.pool[self.curr[0] as usize];
        let greatest_age = oldest.pos;
        let greatest_nuc = oldest.head_base();
        for &idx in &self.curr[1..] {
            let p = &self.pool[idx as usize];
            if p.pos < greatest_age {
                break;
            }
            if p.head_base() != greatest_nuc {
                return None;
            }
        }

        // Counter check: every sibling branch must be advocated by some
        // path, or choosing here would be unfounded.
        let mut seen = [false; 4];
        let mut distinct = 0;
        for &idx in self.curr.iter().chain(&self.counter) {
            let b = self.pool[idx as usize].head_base() as usize;
            if !seen[b] {
                seen[b] = true;
                distinct += 1;
                if distinct == m {
                    break;
                }
            }
        }
        if distinct < m {
            return None;
        }
        if distinct > m {
            panic!("counter path corruption\n{}", self.state_dump());
        }

        for i in 0..m {
            if bases[i] == greatest_nuc {
                return Some(indices[i]);
            }
        }
        panic!(
            "path corruption: no branch matches {} among {} next nodes\n{}",
            nuc_to_char(greatest_nuc) as char,
            m,
            self.state_dump()
        );
    }

    /// Keep only paths consistent with crossing a fork on `base`, advance
    /// their positions, release the rest.
    fn filter_paths(pool: &mut [FollowPath], part: &mut Vec<u32>, unused: &mut Vec<u32>, base: Nucleotide) {
        let mut kept = 0;
        for i in 0..part.len() {
            let idx = part[i];
            let p = &mut pool[idx as usize];
            if p.pos + 1 < p.len && p.head_base() == base {
                p.pos += 1;
                part[kept] = idx;
                kept += 1;
            } else {
                unused.push(idx);
            }
        }
        part.truncate(kept);
    }

    /// Move the walker to `(node, bkmer)`. If `forked`, the move crossed a
    /// fork and every held path is filtered against the base taken.
    pub fn traverse_force_jump(&mut self, node: HKey, bkmer: BinaryKmer, forked: bool) {
        self.curr.extend(self.new.drain(..));
        if forked {
            let base = bkmer.last_nuc();
            Self::filter_paths(&mut self.pool, &mut self.curr, &mut self.unused, base);
            Self::filter_paths(&mut self.pool, &mut self.counter, &mut self.unused, base);
        }

        self.node = node;
        self.bkmer = bkmer;
        self.orient = self.graph.orientation_of(node, bkmer);
        self.pickup_paths(node, self.orient, false);
    }

    /// Move by appending one base to the current k-mer.
    pub fn traverse_force(&mut self, node: HKey, base: Nucleotide, forked: bool) {
        let bkmer = self.bkmer.left_shift_add(self.graph.kmer_size(), base);
        self.traverse_force_jump(node, bkmer, forked);
    }

    /// Pick up counter evidence from predecessor nodes. `prev` orientations
    /// point toward the walker's position. Where a predecessor is itself a
    /// fork, its paths have one base consumed already; length-one paths
    /// carry no remaining constraint and go straight back to the pool.
    pub fn add_counter_paths(&mut self, prev: &[(HKey, Orientation)]) {
        for &(pnode, porient) in prev {
            let start = self.counter.len();
            self.pickup_paths(pnode, porient, true);
            if crate::graph::outdegree(self.graph.union_edges(pnode), porient) > 1 {
                let mut kept = start;
                for i in start..self.counter.len() {
                    let idx = self.counter[i];
                    let p = &mut self.pool[idx as usize];
                    if p.len > 1 {
                        p.pos += 1;
                        self.counter[kept] = idx;
                        kept += 1;
                    } else {
                        self.unused.push(idx);
                    }
                }
                self.counter.truncate(kept);
            }
        }
    }

    /// Gather counter paths from the predecessors of `(node, orient)`,
    /// excluding the edge the walker itself arrived by. `prev_nuc` is the
    /// first base of the previous oriented k-mer.
    pub fn node_add_counter_paths(
        &mut self,
        node: HKey,
        orient: Orientation,
        prev_nuc: Nucleotide,
    ) {
        let back = orient.opposite();
        let edges = self.graph.union_edges(node)
            & !crate::graph::edge_bit(nuc_complement(prev_nuc), back);
        let bkmer = self.graph.oriented_bkmer(node, back);
        let nbrs = self
            .graph
            .next_nodes(bkmer, edges_with_orientation(edges, back));
        let prev: Vec<(HKey, Orientation)> = nbrs
            .iter()
            .map(|(n, o, _)| (n, o.opposite()))
            .collect();
        self.add_counter_paths(&prev);
    }

    /// One guided step. Returns false when the evidence gives no unique
    /// extension (dead end, split vote, or uncovered sibling branch).
    pub fn traverse(&mut self) -> bool {
        let e = edges_with_orientation(self.graph.union_edges(self.node), self.orient);
        let nbrs = self.graph.next_nodes(self.bkmer, e);
        self.traverse_nodes(&nbrs)
    }

    /// As [`Self::traverse`], over a precomputed neighbor set.
    pub fn traverse_nodes(&mut self, next: &Neighbors) -> bool {
        match self.choose(next) {
            None => false,
            Some(i) => {
                let (node, _, base) = next.get(i);
                self.traverse_force(node, base, next.len() > 1);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::graph_from_reads;
    use crate::kmer::BinaryKmer;

    const K: u32 = 5;

    fn node(g: &Graph, s: &str) -> HKey {
        g.ht.find(BinaryKmer::from_seq(s.as_bytes(), K).unwrap()).unwrap().0
    }

    /// Fork graph: trunk GGCTA -> GCTAA -> CTAAC, forking to TAACA (A) and
    /// TAACC (C), plus a second predecessor TCTAA -> CTAAC for counter
    /// evidence.
    fn fork_graph() -> Graph {
        let mut g = graph_from_reads(K, &["GGCTAACAT", "GCTAACCT", "TCTAACCT"]);
        g.alloc_paths(4096);
        g
    }

    /// Walk from the anchor collecting bases until the walker stops.
    fn assemble(wlk: &mut GraphWalker, anchor: HKey) -> String {
        wlk.init(anchor, Orientation::Forward);
        let mut seq = wlk.bkmer.to_seq(K);
        loop {
            let prev_first = wlk.bkmer.first_nuc(K);
            if !wlk.traverse() {
                break;
            }
            seq.push(nuc_to_char(wlk.bkmer.last_nuc()) as char);
            if wlk.graph.node_indegree(wlk.node, wlk.orient) > 1 {
                let (node, orient) = (wlk.node, wlk.orient);
                wlk.node_add_counter_paths(node, orient, prev_first);
            }
            if seq.len() > 100 {
                break;
            }
        }
        wlk.finish();
        seq
    }

    #[test]
    fn test_no_evidence_stops_at_fork() {
        let g = fork_graph();
        let mut wlk = GraphWalker::new(&g, 0);
        // Without any paths the walk halts at the CTAAC fork.
        let seq = assemble(&mut wlk, node(&g, "GGCTA"));
        assert_eq!(seq, "GGCTAAC");
    }

    #[test]
    fn test_uncovered_sibling_gives_no_choice() {
        let g = fork_graph();
        let ps = g.paths.as_ref().unwrap();
        // Evidence for the A branch only: path [A, G] anchored two nodes
        // before the fork.
        ps.append(node(&g, "GCTAA"), Orientation::Forward, &[0, 2], 0).unwrap();

        let mut wlk = GraphWalker::new(&g, 0);
        wlk.init(node(&g, "GGCTA"), Orientation::Forward);
        assert!(wlk.traverse()); // -> GCTAA, picks up the path
        assert!(wlk.traverse()); // -> CTAAC, path promoted to curr
        // At the fork the C sibling has no evidence at all: no choice.
        assert!(!wlk.traverse());
        wlk.finish();
    }

    #[test]
    fn test_counter_coverage_resolves_fork() {
        let g = fork_graph();
        let ps = g.paths.as_ref().unwrap();
        ps.append(node(&g, "GCTAA"), Orientation::Forward, &[0, 2], 0).unwrap();
        // Counter evidence: the second predecessor TCTAA witnessed the C
        // branch.
        ps.append(node(&g, "TCTAA"), Orientation::Forward, &[1], 0).unwrap();

        let mut wlk = GraphWalker::new(&g, 0);
        let seq = assemble(&mut wlk, node(&g, "GGCTA"));
        // The A branch is taken and the walk runs to the read end.
        assert_eq!(seq, "GGCTAACAT");
    }

    #[test]
    fn test_choose_is_deterministic() {
        let g = fork_graph();
        let ps = g.paths.as_ref().unwrap();
        ps.append(node(&g, "GCTAA"), Orientation::Forward, &[0, 2], 0).unwrap();
        ps.append(node(&g, "TCTAA"), Orientation::Forward, &[1], 0).unwrap();

        let mut wlk = GraphWalker::new(&g, 0);
        wlk.init(node(&g, "GGCTA"), Orientation::Forward);
        assert!(wlk.traverse());
        let prev_first = wlk.bkmer.first_nuc(K);
        assert!(wlk.traverse());
        let (n, o) = (wlk.node, wlk.orient);
        wlk.node_add_counter_paths(n, o, prev_first);

        let e = edges_with_orientation(g.union_edges(wlk.node), wlk.orient);
        let nbrs = g.next_nodes(wlk.bkmer, e);
        let first = wlk.choose(&nbrs);
        for _ in 0..5 {
            assert_eq!(wlk.choose(&nbrs), first);
        }
        assert!(first.is_some());
        wlk.finish();
    }

    #[test]
    fn test_finish_recycles_pool() {
        let g = fork_graph();
        let ps = g.paths.as_ref().unwrap();
        ps.append(node(&g, "GCTAA"), Orientation::Forward, &[0, 2], 0).unwrap();
        ps.append(node(&g, "TCTAA"), Orientation::Forward, &[1], 0).unwrap();

        let mut wlk = GraphWalker::new(&g, 0);
        for _ in 0..10 {
            let seq = assemble(&mut wlk, node(&g, "GGCTA"));
            assert_eq!(seq, "GGCTAACAT");
        }
        // Pool never leaks paths across walks.
        assert_eq!(wlk.pool.len(), wlk.unused.len());
    }

    #[test]
    fn test_wrong_color_sees_no_branch() {
        // A two-color graph where color 1 has no coverage on the branches.
        let mut g = Graph::new(K, 2, 1024);
        for read in ["GGCTAACAT", "GCTAACCT"] {
            let mut prev: Option<(HKey, Orientation, BinaryKmer)> = None;
            for win in read.as_bytes().windows(K as usize) {
                let bk = BinaryKmer::from_seq(win, K).unwrap();
                let (hkey, orient) = g.add_kmer(0, bk).unwrap();
                if let Some((pk, por, pbk)) = prev {
                    g.add_edge_pair(0, (pk, por), pbk.first_nuc(K), (hkey, orient), bk.last_nuc());
                }
                prev = Some((hkey, orient, bk));
            }
        }
        g.alloc_paths(1024);
        let mut wlk = GraphWalker::new(&g, 1);
        wlk.init(node(&g, "CTAAC"), Orientation::Forward);
        // Neither branch exists in color 1: restriction leaves nothing.
        assert!(!wlk.traverse());
        wlk.finish();
    }
}
