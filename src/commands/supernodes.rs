//! Supernodes command: emit every supernode as FASTA.

use crate::cleaning::Bitset;
use crate::error::Result;
use crate::format::GraphFileReader;
use crate::graph::Graph;
use crate::status;
use crate::supernode::Supernode;
use crate::util::{commify, kmers_in_hash};
use std::io::Write;
use std::path::PathBuf;

pub struct SupernodesCommand {
    pub input: PathBuf,
    pub memory: Option<u64>,
    pub nkmers: Option<u64>,
}

impl SupernodesCommand {
    pub fn run<W: Write>(&self, out: &mut W) -> Result<()> {
        let rd = GraphFileReader::open(&self.input)?;
        let bytes_per_kmer = (16 + 5 * rd.num_cols() as u64) * 4 / 3;
        let nkmers = kmers_in_hash(self.memory, self.nkmers, rd.num_kmers(), bytes_per_kmer)?;
        let graph = Graph::new(rd.kmer_size(), rd.num_cols(), nkmers);
        rd.load_into(&graph, 0)?;

        let mut visited = Bitset::with_capacity(graph.ht.capacity());
        let mut count = 0u64;
        let mut total_len = 0u64;
        let mut ibuf = itoa::Buffer::new();

        for hkey in 1..=graph.ht.capacity() {
            if !graph.ht.is_live(hkey) || visited.get(hkey) {
                continue;
            }
            let mut sn = Supernode::containing(&graph, hkey);
            for &(node, _) in &sn.nodes {
                visited.set(node);
            }
            sn.normalize(&graph);
            let seq = sn.seq(&graph);

            out.write_all(b">supernode")?;
            out.write_all(ibuf.format(count).as_bytes())?;
            out.write_all(b" length=")?;
            out.write_all(ibuf.format(seq.len()).as_bytes())?;
            out.write_all(b"\n")?;
            out.write_all(seq.as_bytes())?;
            out.write_all(b"\n")?;

            count += 1;
            total_len += seq.len() as u64;
        }

        status!(
            "[supernodes] {} supernodes, {} bases",
            commify(count),
            commify(total_len)
        );
        Ok(())
    }
}
