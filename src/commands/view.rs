//! View command: print a graph file's header and, optionally, its records.

use crate::error::Result;
use crate::format::GraphFileReader;
use crate::graph::Edges;
use crate::kmer::nuc_to_char;
use crate::util::commify;
use std::io::Write;
use std::path::PathBuf;

/// Render an edge byte as eight characters: reverse extensions in
/// lowercase, forward in uppercase, dots for absent edges.
pub fn edges_str(edges: Edges) -> String {
    let mut s = String::with_capacity(8);
    for nuc in 0..4u8 {
        s.push(if edges & (0x10 << nuc) != 0 {
            nuc_to_char(nuc).to_ascii_lowercase() as char
        } else {
            '.'
        });
    }
    for nuc in 0..4u8 {
        s.push(if edges & (1 << nuc) != 0 {
            nuc_to_char(nuc) as char
        } else {
            '.'
        });
    }
    s
}

pub struct ViewCommand {
    pub input: PathBuf,
    pub kmers: bool,
}

impl ViewCommand {
    pub fn run<W: Write>(&self, out: &mut W) -> Result<()> {
        let rd = GraphFileReader::open(&self.input)?;

        let mut fbuf = ryu::Buffer::new();
        writeln!(out, "file: {}", self.input.display())?;
        writeln!(out, "version: {}", rd.header.version)?;
        writeln!(out, "kmer size: {}", rd.kmer_size())?;
        writeln!(out, "colors: {}", rd.num_cols())?;
        writeln!(out, "kmers: {}", commify(rd.num_kmers()))?;
        for (col, info) in rd.header.infos.iter().enumerate() {
            writeln!(
                out,
                "color {}: '{}' mean_read_len={} total_seq={} error_rate={}",
                col,
                info.sample_name,
                info.mean_read_len,
                info.total_seq,
                fbuf.format(info.error_rate)
            )?;
            let c = &info.cleaning;
            writeln!(
                out,
                "  cleaned: tips={} supernodes={} snode_thresh={} node_thresh={}{}",
                c.cleaned_tips,
                c.cleaned_snodes,
                c.snodes_threshold,
                c.nodes_threshold,
                if c.is_cleaned_against {
                    format!(" cleaned_against='{}'", c.cleaned_against_name)
                } else {
                    String::new()
                }
            )?;
        }

        if self.kmers {
            let k = rd.kmer_size();
            let mut ibuf = itoa::Buffer::new();
            for i in 0..rd.num_kmers() {
                out.write_all(rd.kmer(i).to_seq(k).as_bytes())?;
                for col in 0..rd.num_cols() {
                    out.write_all(b" ")?;
                    out.write_all(ibuf.format(rd.covg(i, col)).as_bytes())?;
                }
                for col in 0..rd.num_cols() {
                    out.write_all(b" ")?;
                    out.write_all(edges_str(rd.edges(i, col)).as_bytes())?;
                }
                out.write_all(b"\n")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::build::load_read;
    use crate::format::write_graph;
    use crate::graph::Graph;
    use tempfile::tempdir;

    #[test]
    fn test_edges_str() {
        assert_eq!(edges_str(0x00), "........");
        assert_eq!(edges_str(0x01), "....A...");
        assert_eq!(edges_str(0x80), "...t....");
        assert_eq!(edges_str(0x18), "a......T");
    }

    #[test]
    fn test_view_lists_kmers() {
        let dir = tempdir().unwrap();
        let g = Graph::new(3, 1, 256);
        load_read(&g, 0, b"AAACT").unwrap();
        let path = dir.path().join("g.ctx");
        write_graph(&path, &g).unwrap();

        let cmd = ViewCommand {
            input: path,
            kmers: true,
        };
        let mut out = Vec::new();
        cmd.run(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("kmer size: 3"));
        assert!(text.contains("colors: 1"));
        // All three kmers listed with coverage 1.
        for kmer in ["AAA", "AAC", "ACT"] {
            assert!(text.contains(&format!("{} 1 ", kmer)), "missing {}", kmer);
        }
    }
}
