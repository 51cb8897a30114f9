//! Inferedges command: connect adjacent k-mers that are both present but
//! were never linked by a read (typically after joining graphs).

use crate::error::Result;
use crate::format::{write_graph, GraphFileReader};
use crate::graph::Graph;
use crate::kmer::Orientation;
use crate::status;
use crate::util::{commify, kmers_in_hash};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct InferEdgesCommand {
    pub input: PathBuf,
    pub out: PathBuf,
    pub memory: Option<u64>,
    pub nkmers: Option<u64>,
}

/// Set an edge in every color where both endpoints carry coverage.
/// Returns the number of (node, color) edge bits newly set.
pub fn infer_edges(graph: &Graph) -> u64 {
    let k = graph.kmer_size();
    let added = AtomicU64::new(0);

    (1..=graph.ht.capacity()).into_par_iter().for_each(|hkey| {
        if !graph.ht.is_live(hkey) {
            return;
        }
        for orient in [Orientation::Forward, Orientation::Reverse] {
            let bkmer = graph.oriented_bkmer(hkey, orient);
            for nuc in 0..4u8 {
                let next = bkmer.left_shift_add(k, nuc);
                let Some((nkey, _)) = graph.ht.find(next) else {
                    continue;
                };
                for col in 0..graph.num_cols() {
                    if graph.has_col(hkey, col)
                        && graph.has_col(nkey, col)
                        && graph.col_edges(hkey, col) & crate::graph::edge_bit(nuc, orient) == 0
                    {
                        graph.set_edge(hkey, col, nuc, orient);
                        added.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    });
    added.load(Ordering::Relaxed)
}

impl InferEdgesCommand {
    pub fn run(&self) -> Result<()> {
        let rd = GraphFileReader::open(&self.input)?;
        let bytes_per_kmer = (16 + 5 * rd.num_cols() as u64) * 4 / 3;
        let nkmers = kmers_in_hash(self.memory, self.nkmers, rd.num_kmers(), bytes_per_kmer)?;
        let mut graph = Graph::new(rd.kmer_size(), rd.num_cols(), nkmers);
        rd.load_into(&graph, 0)?;
        for (i, info) in rd.header.infos.iter().enumerate() {
            graph.info[i] = info.clone();
        }

        let added = infer_edges(&graph);
        status!("[inferedges] set {} edge bits", commify(added));

        let written = write_graph(&self.out, &graph)?;
        status!(
            "[inferedges] wrote {} kmers to {}",
            commify(written),
            self.out.display()
        );
        Ok(())
    }
}
