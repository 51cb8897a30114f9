//! Thread command: walk reads through a loaded graph and record their
//! junction choices as paths.
//!
//! For every fork a read crosses, the base it takes is appended to paths
//! anchored at the read's first node, at each fork node, and at each node
//! immediately before a fork. That is exactly the set of anchors the
//! walker can pick evidence up from: paths at a fork's predecessor vote on
//! the fork, paths at the fork itself answer counter-queries from walks
//! arriving through its other parents. Each read is threaded in both
//! directions.

use crate::error::{GraphError, Result};
use crate::format::{load_paths, write_paths, GraphFileReader};
use crate::graph::Graph;
use crate::hash_table::HKey;
use crate::kmer::{nuc_from_char, BinaryKmer, Orientation};
use crate::paths::PathStore;
use crate::seq::SeqReader;
use crate::status;
use crate::util::{commify, kmers_in_hash, parse_size};
use crossbeam_channel::bounded;
use std::path::PathBuf;

const BATCH_SIZE: usize = 256;

/// Default path arena size when `--paths-mem` is not given.
const DEFAULT_PATH_MEM: u64 = 16 << 20;

/// Split a read into runs of consecutive graph nodes, breaking at invalid
/// bases and at k-mers missing from the graph.
fn read_node_runs(graph: &Graph, seq: &[u8]) -> Vec<Vec<(HKey, Orientation)>> {
    let k = graph.kmer_size();
    let mut runs = Vec::new();
    let mut cur: Vec<(HKey, Orientation)> = Vec::new();
    let mut bk = BinaryKmer::zero();
    let mut len = 0u32;

    for &c in seq {
        match nuc_from_char(c) {
            None => {
                len = 0;
                if cur.len() > 1 {
                    runs.push(std::mem::take(&mut cur));
                } else {
                    cur.clear();
                }
            }
            Some(nuc) => {
                bk = bk.left_shift_add(k, nuc);
                len += 1;
                if len >= k {
                    match graph.ht.find(bk) {
                        Some(hit) => cur.push(hit),
                        None => {
                            if cur.len() > 1 {
                                runs.push(std::mem::take(&mut cur));
                            } else {
                                cur.clear();
                            }
                        }
                    }
                }
            }
        }
    }
    if cur.len() > 1 {
        runs.push(cur);
    }
    runs
}

/// Record one oriented run's junction choices into the path store.
fn add_run_paths(
    graph: &Graph,
    store: &PathStore,
    col: usize,
    nodes: &[(HKey, Orientation)],
) -> Result<()> {
    // Forks crossed by this run, with the base taken at each.
    let mut forks: Vec<(usize, u8)> = Vec::new();
    for i in 0..nodes.len() - 1 {
        let (node, orient) = nodes[i];
        if graph.node_outdegree(node, orient) > 1 {
            let (next, next_orient) = nodes[i + 1];
            forks.push((i, graph.oriented_bkmer(next, next_orient).last_nuc()));
        }
    }
    if forks.is_empty() {
        return Ok(());
    }

    // Anchor set: run start, fork nodes, and immediate fork predecessors.
    let mut anchors: Vec<usize> = vec![0];
    for &(i, _) in &forks {
        anchors.push(i);
        if i > 0 {
            anchors.push(i - 1);
        }
    }
    anchors.sort_unstable();
    anchors.dedup();

    for a in anchors {
        let bases: Vec<u8> = forks
            .iter()
            .filter(|&&(i, _)| i >= a)
            .map(|&(_, nuc)| nuc)
            .collect();
        if !bases.is_empty() {
            let (node, orient) = nodes[a];
            store.append(node, orient, &bases, col)?;
        }
    }
    Ok(())
}

/// Thread one read, both directions.
pub fn thread_read(graph: &Graph, col: usize, seq: &[u8]) -> Result<()> {
    let store = graph
        .paths
        .as_ref()
        .ok_or_else(|| GraphError::arg("graph has no path store"))?;
    for run in read_node_runs(graph, seq) {
        add_run_paths(graph, store, col, &run)?;
        let rev: Vec<(HKey, Orientation)> = run
            .iter()
            .rev()
            .map(|&(node, orient)| (node, orient.opposite()))
            .collect();
        add_run_paths(graph, store, col, &rev)?;
    }
    Ok(())
}

pub struct ThreadCommand {
    pub graph_file: PathBuf,
    pub seq_paths: Vec<PathBuf>,
    pub out: PathBuf,
    pub existing: Option<PathBuf>,
    pub color: usize,
    pub threads: usize,
    pub paths_mem: Option<String>,
    pub memory: Option<u64>,
    pub nkmers: Option<u64>,
}

impl ThreadCommand {
    pub fn run(&self) -> Result<()> {
        if self.seq_paths.is_empty() {
            return Err(GraphError::arg("give at least one sequence file"));
        }

        let rd = GraphFileReader::open(&self.graph_file)?;
        if self.color >= rd.num_cols() {
            return Err(GraphError::arg(format!(
                "--color {} out of range: graph has {} colors",
                self.color,
                rd.num_cols()
            )));
        }
        let bytes_per_kmer = (16 + 5 * rd.num_cols() as u64) * 4 / 3;
        let nkmers = kmers_in_hash(self.memory, self.nkmers, rd.num_kmers(), bytes_per_kmer)?;
        let mut graph = Graph::new(rd.kmer_size(), rd.num_cols(), nkmers);
        rd.load_into(&graph, 0)?;
        status!(
            "[thread] loaded {} kmers from {}",
            commify(graph.ht.num_kmers()),
            self.graph_file.display()
        );

        let arena_bytes = match &self.paths_mem {
            Some(s) => parse_size(s)?,
            None => DEFAULT_PATH_MEM,
        };
        graph.alloc_paths(arena_bytes as usize);
        if let Some(existing) = &self.existing {
            load_paths(existing, &mut graph)?;
            status!(
                "[thread] loaded {} existing paths from {}",
                commify(graph.paths.as_ref().map_or(0, |p| p.num_paths())),
                existing.display()
            );
        }

        let (tx, rx) = bounded::<Vec<Vec<u8>>>(self.threads * 4);
        let result: Result<()> = std::thread::scope(|scope| {
            let mut workers = Vec::new();
            for _ in 0..self.threads.max(1) {
                let rx = rx.clone();
                let graph = &graph;
                let col = self.color;
                workers.push(scope.spawn(move || -> Result<()> {
                    while let Ok(batch) = rx.recv() {
                        for read in batch {
                            thread_read(graph, col, &read)?;
                        }
                    }
                    Ok(())
                }));
            }
            drop(rx);

            let feed = || -> Result<()> {
                let mut batch = Vec::with_capacity(BATCH_SIZE);
                'files: for path in &self.seq_paths {
                    status!("[thread] reading {}", path.display());
                    let mut reader = SeqReader::from_path(path)?;
                    while let Some(seq) = reader.read_seq()? {
                        batch.push(seq);
                        if batch.len() == BATCH_SIZE {
                            if tx.send(std::mem::take(&mut batch)).is_err() {
                                break 'files;
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

        let store = graph.paths.as_ref().expect("path store allocated above");
        status!(
            "[thread] {} paths, {} bytes, {} kmers with paths",
            commify(store.num_paths()),
            commify(store.bytes_used() as u64),
            commify(store.num_kmers_with_paths())
        );
        write_paths(&self.out, &graph)?;
        status!("[thread] wrote {}", self.out.display());
        Ok(())
    }
}
