//! Healthcheck command: structural verification of a graph file.

use crate::error::{GraphError, Result};
use crate::format::GraphFileReader;
use crate::graph::{edges_with_orientation, Graph};
use crate::kmer::Orientation;
use crate::status;
use crate::util::{commify, kmers_in_hash};
use std::path::PathBuf;

pub struct HealthcheckCommand {
    pub input: PathBuf,
    pub memory: Option<u64>,
    pub nkmers: Option<u64>,
}

impl HealthcheckCommand {
    pub fn run(&self) -> Result<()> {
        let rd = GraphFileReader::open(&self.input)?;
        let k = rd.kmer_size();

        // Every stored kmer must be canonical.
        let mut non_canonical = 0u64;
        for i in 0..rd.num_kmers() {
            let bk = rd.kmer(i);
            if bk.canonical(k).0 != bk {
                non_canonical += 1;
            }
        }

        let bytes_per_kmer = (16 + 5 * rd.num_cols() as u64) * 4 / 3;
        let nkmers = kmers_in_hash(self.memory, self.nkmers, rd.num_kmers(), bytes_per_kmer)?;
        let graph = Graph::new(k, rd.num_cols(), nkmers);
        rd.load_into(&graph, 0)?;

        // Every edge must point at a node that exists.
        let mut dangling = 0u64;
        for hkey in graph.ht.iter() {
            for orient in [Orientation::Forward, Orientation::Reverse] {
                let bkmer = graph.oriented_bkmer(hkey, orient);
                let nibble = edges_with_orientation(graph.union_edges(hkey), orient);
                for nuc in 0..4u8 {
                    if nibble & (1 << nuc) != 0
                        && graph.ht.find(bkmer.left_shift_add(k, nuc)).is_none()
                    {
                        dangling += 1;
                    }
                }
            }
        }

        status!(
            "[healthcheck] {}: {} kmers, {} colors",
            self.input.display(),
            commify(rd.num_kmers()),
            rd.num_cols()
        );
        if non_canonical == 0 && dangling == 0 {
            status!("[healthcheck] ok");
            Ok(())
        } else {
            Err(GraphError::InvalidField {
                path: self.input.clone(),
                field: "graph body",
                message: format!(
                    "{} non-canonical kmers, {} dangling edges",
                    non_canonical, dangling
                ),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::build::load_read;
    use crate::format::write_graph;
    use tempfile::tempdir;

    #[test]
    fn test_healthy_graph_passes() {
        let dir = tempdir().unwrap();
        let g = Graph::new(3, 1, 256);
        load_read(&g, 0, b"AAACTGG").unwrap();
        let path = dir.path().join("g.ctx");
        write_graph(&path, &g).unwrap();

        let cmd = HealthcheckCommand {
            input: path,
            memory: None,
            nkmers: None,
        };
        cmd.run().unwrap();
    }

    #[test]
    fn test_dangling_edge_detected() {
        let dir = tempdir().unwrap();
        let g = Graph::new(3, 1, 256);
        load_read(&g, 0, b"AAACT").unwrap();
        // Fake an edge to a kmer that is not in the graph.
        let (aaa, _) = g
            .ht
            .find(crate::kmer::BinaryKmer::from_seq(b"AAA", 3).unwrap())
            .unwrap();
        g.set_edge(aaa, 0, 2, Orientation::Forward); // AAA -> AAG, absent
        let path = dir.path().join("g.ctx");
        write_graph(&path, &g).unwrap();

        let cmd = HealthcheckCommand {
            input: path,
            memory: None,
            nkmers: None,
        };
        assert!(cmd.run().is_err());
    }
}
