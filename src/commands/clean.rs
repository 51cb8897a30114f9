//! Clean command: tip clipping and supernode thresholding over one or more
//! graph files, joined into successive colors.

use crate::cleaning::{
    pick_threshold, remove_low_covg_supernodes, remove_tips, supernode_covg_histogram,
    supernode_len_histogram, threshold_from_depth, Bitset, LEN_HIST_CAP,
};
use crate::error::{GraphError, Result};
use crate::format::{write_graph, GraphFileReader};
use crate::graph::Graph;
use crate::status;
use crate::util::{commify, kmers_in_hash};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct CleanCommand {
    pub inputs: Vec<PathBuf>,
    pub out: Option<PathBuf>,
    /// Clip tips shorter than this many nodes; 0 means the 2k default.
    pub tips: Option<usize>,
    pub supernodes: bool,
    pub threshold: Option<u32>,
    pub kdepth: Option<f64>,
    pub covgs_out: Option<PathBuf>,
    pub len_before: Option<PathBuf>,
    pub len_after: Option<PathBuf>,
    pub memory: Option<u64>,
    pub nkmers: Option<u64>,
}

fn write_histogram_csv(path: &Path, header: &str, hist: &[u64]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "{}", header)?;
    let mut ibuf = itoa::Buffer::new();
    let mut vbuf = itoa::Buffer::new();
    for (i, &count) in hist.iter().enumerate() {
        if count > 0 {
            w.write_all(ibuf.format(i).as_bytes())?;
            w.write_all(b",")?;
            w.write_all(vbuf.format(count).as_bytes())?;
            w.write_all(b"\n")?;
        }
    }
    Ok(())
}

impl CleanCommand {
    fn validate(&self, tip_cleaning: bool, supernode_cleaning: bool) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(GraphError::arg("give at least one input graph file"));
        }
        if let Some(t) = self.threshold {
            if t <= 1 {
                return Err(GraphError::arg("--threshold <T> needs an integer > 1"));
            }
        }
        if let Some(d) = self.kdepth {
            if d <= 1.0 {
                return Err(GraphError::arg("--kdepth <C> needs a number > 1"));
            }
        }
        if let Some(l) = self.tips {
            if l <= 1 {
                return Err(GraphError::arg("--tips <L> needs an integer > 1"));
            }
        }
        if !supernode_cleaning && self.threshold.is_some() {
            return Err(GraphError::arg(
                "--threshold <T> not needed if not cleaning with --supernodes",
            ));
        }
        if !supernode_cleaning && self.kdepth.is_some() {
            return Err(GraphError::arg(
                "--kdepth <C> not needed if not cleaning with --supernodes",
            ));
        }
        if supernode_cleaning && self.threshold.is_some() && self.kdepth.is_some() {
            return Err(GraphError::arg(
                "supernode cleaning requires only one of --threshold <T>, --kdepth <C>",
            ));
        }
        if (tip_cleaning || supernode_cleaning) && self.out.is_none() {
            return Err(GraphError::arg("please specify --out <out.ctx> for cleaned graph"));
        }
        if self.len_after.is_some() && !tip_cleaning && !supernode_cleaning {
            return Err(GraphError::arg(
                "--len-after <out.csv> without any cleaning (set --supernodes or --tips)",
            ));
        }
        Ok(())
    }

    pub fn run(&self) -> Result<()> {
        let mut tip_cleaning = self.tips.is_some();
        let mut supernode_cleaning = self.supernodes;

        // Default: do both when an output is given and nothing was asked.
        if !tip_cleaning && !supernode_cleaning {
            if self.out.is_some() {
                tip_cleaning = true;
                supernode_cleaning = true;
            } else {
                status!("[clean] no cleaning being done: no --out <out.ctx> given");
            }
        }
        self.validate(tip_cleaning, supernode_cleaning)?;

        // Open inputs, check kmer sizes, count colors.
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
        let max_tip_len = match self.tips {
            Some(l) if l > 0 => l,
            _ => 2 * kmer_size as usize,
        };

        // Warn about inputs that were already cleaned.
        for rd in &files {
            for (col, info) in rd.header.infos.iter().enumerate() {
                if info.cleaning.cleaned_snodes && supernode_cleaning {
                    status!(
                        "[clean] warning: {}:{} already supernode-cleaned (threshold <{})",
                        rd.path.display(),
                        col,
                        info.cleaning.snodes_threshold
                    );
                }
                if info.cleaning.cleaned_tips && tip_cleaning {
                    status!(
                        "[clean] warning: {}:{} already tip-cleaned",
                        rd.path.display(),
                        col
                    );
                }
            }
        }

        let bytes_per_kmer = (16 + 5 * total_cols as u64) * 4 / 3;
        let nkmers = kmers_in_hash(self.memory, self.nkmers, total_kmers, bytes_per_kmer)?;
        let mut graph = Graph::new(kmer_size, total_cols, nkmers);

        let mut col = 0;
        for rd in &files {
            let loaded = rd.load_into(&graph, col)?;
            status!(
                "[clean] loaded {} kmers from {}",
                commify(loaded),
                rd.path.display()
            );
            for (i, info) in rd.header.infos.iter().enumerate() {
                graph.info[col + i] = info.clone();
            }
            col += rd.num_cols();
        }
        let initial_kmers = graph.ht.num_kmers();
        status!("[clean] total kmers loaded: {}", commify(initial_kmers));

        let mut visited = Bitset::with_capacity(graph.ht.capacity());

        if let Some(path) = &self.len_before {
            let hist = supernode_len_histogram(&graph, LEN_HIST_CAP, &mut visited);
            write_histogram_csv(path, "SupernodeLen,Count", &hist)?;
            status!("[clean] wrote supernode lengths to {}", path.display());
        }

        if tip_cleaning {
            let removed = remove_tips(&mut graph, max_tip_len, &mut visited);
            status!(
                "[clean] clipped tips shorter than {} nodes: removed {} kmers",
                max_tip_len,
                commify(removed)
            );
        }

        let mut applied_threshold = 0u32;
        if supernode_cleaning || self.covgs_out.is_some() {
            let hist = supernode_covg_histogram(&graph, None, &mut visited);
            if let Some(path) = &self.covgs_out {
                write_histogram_csv(path, "Covg,Supernodes", &hist)?;
                status!("[clean] wrote coverage distribution to {}", path.display());
            }

            if supernode_cleaning {
                applied_threshold = match (self.threshold, self.kdepth) {
                    (Some(t), _) => t,
                    (None, Some(d)) => {
                        // Depth formula wants a read length; use the merged
                        // mean over all colors.
                        let mut merged = graph.info[0].clone();
                        for info in &graph.info[1..] {
                            merged.merge(info);
                        }
                        threshold_from_depth(d, merged.mean_read_len, kmer_size)
                    }
                    (None, None) => pick_threshold(&hist),
                };

                if applied_threshold == 0 {
                    status!("[clean] no supernode threshold found (threshold 0); graph untouched");
                    supernode_cleaning = false;
                } else {
                    let removed = remove_low_covg_supernodes(
                        &mut graph,
                        applied_threshold,
                        None,
                        &mut visited,
                    );
                    status!(
                        "[clean] removed supernodes with mean coverage < {}: {} kmers",
                        applied_threshold,
                        commify(removed)
                    );
                }
            }
        }

        if let Some(path) = &self.len_after {
            let hist = supernode_len_histogram(&graph, LEN_HIST_CAP, &mut visited);
            write_histogram_csv(path, "SupernodeLen,Count", &hist)?;
            status!("[clean] wrote supernode lengths to {}", path.display());
        }

        if tip_cleaning || supernode_cleaning {
            // Stamp what was done into every color's cleaning record.
            for info in &mut graph.info {
                let c = &mut info.cleaning;
                c.cleaned_tips |= tip_cleaning;
                if supernode_cleaning {
                    c.snodes_threshold = if c.cleaned_snodes {
                        c.snodes_threshold.min(applied_threshold)
                    } else {
                        applied_threshold
                    };
                    c.cleaned_snodes = true;
                }
            }

            let removed = initial_kmers - graph.ht.num_kmers();
            let pct = 100.0 * removed as f64 / initial_kmers.max(1) as f64;
            status!(
                "[clean] removed {} of {} ({:.2}%) kmers",
                commify(removed),
                commify(initial_kmers),
                pct
            );
        }

        if let Some(out) = &self.out {
            let written = write_graph(out, &graph)?;
            status!("[clean] wrote {} kmers to {}", commify(written), out.display());
        }
        Ok(())
    }
}
