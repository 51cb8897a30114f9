//! Pview command: print the threading paths attached to each k-mer.

use crate::error::Result;
use crate::format::{load_paths, GraphFileReader};
use crate::graph::Graph;
use crate::kmer::{nuc_to_char, Orientation};
use crate::status;
use crate::util::{commify, kmers_in_hash};
use std::io::Write;
use std::path::PathBuf;

pub struct PviewCommand {
    pub input: PathBuf,
    pub paths: PathBuf,
    pub memory: Option<u64>,
    pub nkmers: Option<u64>,
}

impl PviewCommand {
    pub fn run<W: Write>(&self, out: &mut W) -> Result<()> {
        let rd = GraphFileReader::open(&self.input)?;
        let bytes_per_kmer = (16 + 5 * rd.num_cols() as u64) * 4 / 3;
        let nkmers = kmers_in_hash(self.memory, self.nkmers, rd.num_kmers(), bytes_per_kmer)?;
        let mut graph = Graph::new(rd.kmer_size(), rd.num_cols(), nkmers);
        rd.load_into(&graph, 0)?;
        load_paths(&self.paths, &mut graph)?;

        let store = graph.paths.as_ref().expect("paths just loaded");
        status!(
            "[pview] {} paths on {} kmers",
            commify(store.num_paths()),
            commify(store.num_kmers_with_paths())
        );

        let k = graph.kmer_size();
        let mut bases = Vec::new();
        for hkey in graph.ht.iter() {
            if store.head(hkey) == crate::paths::PATH_NULL {
                continue;
            }
            writeln!(out, "{}", graph.ht.kmer_at(hkey).to_seq(k))?;
            for idx in store.iter(hkey) {
                let (_, orient) = store.entry_len_orient(idx);
                store.fetch(idx, &mut bases);
                let seq: String = bases.iter().map(|&b| nuc_to_char(b) as char).collect();
                let cols: Vec<String> = (0..graph.num_cols())
                    .filter(|&c| store.entry_has_col(idx, c))
                    .map(|c| c.to_string())
                    .collect();
                writeln!(
                    out,
                    "  {} {} cols={}",
                    if orient == Orientation::Forward { 'F' } else { 'R' },
                    seq,
                    cols.join(",")
                )?;
            }
        }
        Ok(())
    }
}
