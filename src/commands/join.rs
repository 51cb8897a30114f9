//! Join command: merge graph files, mapping each input's colors onto a
//! fresh range of the output.

use crate::error::{GraphError, Result};
use crate::format::{write_graph, GraphFileReader};
use crate::graph::Graph;
use crate::status;
use crate::util::{commify, kmers_in_hash};
use std::path::PathBuf;

pub struct JoinCommand {
    pub inputs: Vec<PathBuf>,
    pub out: PathBuf,
    pub memory: Option<u64>,
    pub nkmers: Option<u64>,
}

impl JoinCommand {
    pub fn run(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(GraphError::arg("give at least one input graph file"));
        }

        let mut files = Vec::with_capacity(self.inputs.len());
        let mut total_cols = 0usize;
        let mut total_kmers = 0u64;
        for path in &self.inputs {
            let rd = GraphFileReader::open(path)?;
            if let Some(first) = files.first() {
                let first: &GraphFileReader = first;
                if first.kmer_size() != rd.kmer_size() {
                    return Err(GraphError::KmerSizeMismatch(
                        first.kmer_size(),
                        rd.kmer_size(),
                    ));
                }
            }
            total_cols += rd.num_cols();
            total_kmers += rd.num_kmers();
            files.push(rd);
        }

        let kmer_size = files[0].kmer_size();
        let bytes_per_kmer = (16 + 5 * total_cols as u64) * 4 / 3;
        let nkmers = kmers_in_hash(self.memory, self.nkmers, total_kmers, bytes_per_kmer)?;
        let mut graph = Graph::new(kmer_size, total_cols, nkmers);

        let mut col = 0;
        for rd in &files {
            let loaded = rd.load_into(&graph, col)?;
            status!(
                "[join] {}: {} kmers into colors {}..{}",
                rd.path.display(),
                commify(loaded),
                col,
                col + rd.num_cols()
            );
            for (i, info) in rd.header.infos.iter().enumerate() {
                graph.info[col + i] = info.clone();
            }
            col += rd.num_cols();
        }

        let written = write_graph(&self.out, &graph)?;
        status!(
            "[join] wrote {} kmers x {} colors to {}",
            commify(written),
            total_cols,
            self.out.display()
        );
        Ok(())
    }
}
