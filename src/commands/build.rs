//! Build command: sequence reads -> graph file.

use crate::error::{GraphError, Result};
use crate::format::write_graph;
use crate::graph::Graph;
use crate::hash_table::HKey;
use crate::kmer::{nuc_from_char, BinaryKmer, Orientation};
use crate::seq::SeqReader;
use crate::status;
use crate::util::commify;
use crossbeam_channel::bounded;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Reads per batch handed to a worker.
const BATCH_SIZE: usize = 256;

/// Add one read's k-mers, coverage and edges to the graph. Invalid bases
/// split the read into independent runs.
pub fn load_read(graph: &Graph, col: usize, seq: &[u8]) -> Result<()> {
    let k = graph.kmer_size();
    let mut bk = BinaryKmer::zero();
    let mut run = 0u32;
    let mut prev: Option<(HKey, Orientation, BinaryKmer)> = None;

    for &c in seq {
        match nuc_from_char(c) {
            None => {
                run = 0;
                prev = None;
            }
            Some(nuc) => {
                bk = bk.left_shift_add(k, nuc);
                run += 1;
                if run >= k {
                    let (hkey, orient) = graph.add_kmer(col, bk)?;
                    if let Some((pk, por, pbk)) = prev {
                        graph.add_edge_pair(
                            col,
                            (pk, por),
                            pbk.first_nuc(k),
                            (hkey, orient),
                            bk.last_nuc(),
                        );
                    }
                    prev = Some((hkey, orient, bk));
                }
            }
        }
    }
    Ok(())
}

pub struct BuildCommand {
    pub kmer_size: u32,
    pub sample: String,
    pub seq_paths: Vec<PathBuf>,
    pub nkmers: u64,
    pub threads: usize,
}

impl BuildCommand {
    pub fn run(&self, out: &Path) -> Result<()> {
        let mut graph = Graph::new(self.kmer_size, 1, self.nkmers);
        status!(
            "[build] k={} hash capacity {} ({} MB)",
            self.kmer_size,
            commify(graph.ht.capacity()),
            graph.ht.mem_bytes() >> 20
        );

        let total_bases = AtomicU64::new(0);
        let num_reads = AtomicU64::new(0);

        let (tx, rx) = bounded::<Vec<Vec<u8>>>(self.threads * 4);
        let result: Result<()> = std::thread::scope(|scope| {
            let mut workers = Vec::new();
            for _ in 0..self.threads.max(1) {
                let rx = rx.clone();
                let graph = &graph;
                let total_bases = &total_bases;
                let num_reads = &num_reads;
                workers.push(scope.spawn(move || -> Result<()> {
                    while let Ok(batch) = rx.recv() {
                        for read in batch {
                            load_read(graph, 0, &read)?;
                            total_bases.fetch_add(read.len() as u64, Ordering::Relaxed);
                            num_reads.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Ok(())
                }));
            }
            drop(rx);

            let feed = || -> Result<()> {
                let mut batch = Vec::with_capacity(BATCH_SIZE);
                'files: for path in &self.seq_paths {
                    status!("[build] reading {}", path.display());
                    let mut reader = SeqReader::from_path(path)?;
                    while let Some(seq) = reader.read_seq()? {
                        batch.push(seq);
                        if batch.len() == BATCH_SIZE {
                            if tx.send(std::mem::take(&mut batch)).is_err() {
                                break 'files; // workers died; their error surfaces below
                            }
                            batch = Vec::with_capacity(BATCH_SIZE);
                        }
                    }
                }
                if !batch.is_empty() {
                    let _ = tx.send(batch);
                }
                Ok(())
            };
            let fed = feed();
            drop(tx);

            for w in workers {
                w.join().expect("worker thread panicked")?;
            }
            fed
        });
        result?;

        let bases = total_bases.load(Ordering::Relaxed);
        let reads = num_reads.load(Ordering::Relaxed);
        let info = &mut graph.info[0];
        info.sample_name = self.sample.clone();
        info.total_seq = bases;
        info.mean_read_len = if reads > 0 { (bases / reads) as u32 } else { 0 };

        status!(
            "[build] {} reads, {} bases, {} kmers",
            commify(reads),
            commify(bases),
            commify(graph.ht.num_kmers())
        );
        let written = write_graph(out, &graph)?;
        status!("[build] wrote {} kmers to {}", commify(written), out.display());
        Ok(())
    }
}

impl BuildCommand {
    pub fn validate(&self) -> Result<()> {
        if self.sample.is_empty() {
            return Err(GraphError::arg("--sample <name> is required"));
        }
        if self.seq_paths.is_empty() {
            return Err(GraphError::arg("give at least one sequence file"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_read_splits_on_invalid_bases() {
        let g = Graph::new(3, 1, 256);
        load_read(&g, 0, b"AAANCCC").unwrap();
        // AAA and CCC only; no kmer or edge spans the N.
        assert_eq!(g.ht.num_kmers(), 2);
        let (aaa, _) = g.ht.find(BinaryKmer::from_seq(b"AAA", 3).unwrap()).unwrap();
        assert_eq!(g.node_outdegree(aaa, Orientation::Forward), 0);
        assert_eq!(g.node_outdegree(aaa, Orientation::Reverse), 0);
    }

    #[test]
    fn test_load_read_counts_coverage() {
        let g = Graph::new(3, 1, 256);
        load_read(&g, 0, b"AAAA").unwrap();
        let (aaa, _) = g.ht.find(BinaryKmer::from_seq(b"AAA", 3).unwrap()).unwrap();
        assert_eq!(g.covg(aaa, 0), 2);
        // Self-loop edge AAA->AAA.
        assert_eq!(g.node_outdegree(aaa, Orientation::Forward), 1);
    }
}
