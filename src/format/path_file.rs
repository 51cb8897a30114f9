//! Path file (.ctp) codec.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic                 7 bytes "PATHS01"
//! num_paths             u64
//! num_path_bytes        u64
//! num_kmers_with_paths  u64
//! num_cols              u32
//! arena                 num_path_bytes bytes (see paths module layout)
//! per kmer with paths:
//!   kmer    words x u64, most significant word first
//!   head    u64 arena offset of the newest entry
//! ```
//!
//! The k-mer size is not recorded; path files always travel with the graph
//! they were threaded against, and the word count per k-mer is recovered
//! from the trailer size.

use super::ByteCursor;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::kmer::BinaryKmer;
use crate::paths::packed::packed_len_bytes;
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const PATHS_MAGIC: &[u8; 7] = b"PATHS01";

#[derive(Debug, Clone)]
pub struct PathFileHeader {
    pub num_paths: u64,
    pub num_path_bytes: u64,
    pub num_kmers_with_paths: u64,
    pub num_cols: u32,
}

/// A path file pulled into memory without graph resolution, for merging.
pub struct RawPathFile {
    pub path: PathBuf,
    pub header: PathFileHeader,
    pub arena: Vec<u8>,
    /// (kmer words, head offset) per kmer, file order.
    pub kmers: Vec<(Vec<u64>, u64)>,
    pub words_per_kmer: usize,
}

/// Split an entry in a raw arena into
/// `(prev, colset, lenorient, packed bases)`.
pub fn entry_parts(arena: &[u8], off: usize, colset_bytes: usize) -> (u64, &[u8], u32, &[u8]) {
    let mut prev = [0u8; 8];
    prev.copy_from_slice(&arena[off..off + 8]);
    let colset = &arena[off + 8..off + 8 + colset_bytes];
    let lo_off = off + 8 + colset_bytes;
    let lenorient = u32::from_le_bytes([
        arena[lo_off],
        arena[lo_off + 1],
        arena[lo_off + 2],
        arena[lo_off + 3],
    ]);
    let len = (lenorient & crate::paths::packed::MAX_PATH_LEN) as usize;
    let bases = &arena[lo_off + 4..lo_off + 4 + packed_len_bytes(len)];
    (u64::from_le_bytes(prev), colset, lenorient, bases)
}

/// Read a path file without resolving k-mers against a graph.
pub fn read_raw<P: AsRef<Path>>(path: P) -> Result<RawPathFile> {
    let path = path.as_ref().to_path_buf();
    let file = File::open(&path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let mut cur = ByteCursor {
        buf: &mmap,
        pos: 0,
        path: &path,
    };

    let magic = cur.take(PATHS_MAGIC.len(), "magic")?;
    if magic != PATHS_MAGIC {
        return Err(GraphError::BadMagic {
            path,
            expected: "PATHS01",
        });
    }
    let header = PathFileHeader {
        num_paths: cur.read_u64("num_paths")?,
        num_path_bytes: cur.read_u64("num_path_bytes")?,
        num_kmers_with_paths: cur.read_u64("num_kmers_with_paths")?,
        num_cols: cur.read_u32("num_cols")?,
    };
    let arena = cur.take(header.num_path_bytes as usize, "path arena")?.to_vec();

    let trailer = mmap.len() - cur.pos;
    let nkmers = header.num_kmers_with_paths as usize;
    let words_per_kmer = if nkmers == 0 {
        BinaryKmer::num_words(crate::kmer::MIN_KMER_SIZE)
    } else {
        if trailer % nkmers != 0 || (trailer / nkmers) < 16 || (trailer / nkmers - 8) % 8 != 0 {
            return Err(GraphError::Truncated {
                path,
                field: "kmer trailer",
            });
        }
        (trailer / nkmers - 8) / 8
    };

    let mut kmers = Vec::with_capacity(nkmers);
    for _ in 0..nkmers {
        let mut words = Vec::with_capacity(words_per_kmer);
        for _ in 0..words_per_kmer {
            words.push(cur.read_u64("path kmer")?);
        }
        kmers.push((words, cur.read_u64("path head offset")?));
    }

    Ok(RawPathFile {
        path,
        header,
        arena,
        kmers,
        words_per_kmer,
    })
}

/// Load a path file into a graph whose k-mers are already present. The
/// graph must have a path store with room for the arena (one is allocated
/// exactly sized if missing).
pub fn load_paths<P: AsRef<Path>>(path: P, graph: &mut Graph) -> Result<()> {
    let raw = read_raw(&path)?;
    if raw.header.num_cols as usize != graph.num_cols() {
        return Err(GraphError::InvalidField {
            path: raw.path,
            field: "num_cols",
            message: format!(
                "path file has {} colors, graph has {}",
                raw.header.num_cols,
                graph.num_cols()
            ),
        });
    }
    if raw.words_per_kmer != BinaryKmer::num_words(graph.kmer_size()) && !raw.kmers.is_empty() {
        return Err(GraphError::InvalidField {
            path: raw.path,
            field: "kmer words",
            message: format!(
                "{} words per kmer, graph k={} needs {}",
                raw.words_per_kmer,
                graph.kmer_size(),
                BinaryKmer::num_words(graph.kmer_size())
            ),
        });
    }

    if graph.paths.is_none() {
        graph.alloc_paths(raw.arena.len());
    }
    let store = graph.paths.as_ref().expect("path store just allocated");
    store.install_arena(&raw.arena, raw.header.num_paths)?;

    for (words, head) in &raw.kmers {
        let bk = BinaryKmer::from_words(words, graph.kmer_size());
        let (hkey, _) = graph.ht.find(bk).ok_or_else(|| GraphError::InvalidField {
            path: path.as_ref().to_path_buf(),
            field: "path kmer",
            message: format!("kmer {} not in graph", bk.to_seq(graph.kmer_size())),
        })?;
        store.set_head(hkey, *head);
    }
    Ok(())
}

/// Write a graph's path store to `path` atomically.
pub fn write_paths<P: AsRef<Path>>(path: P, graph: &Graph) -> Result<()> {
    let store = graph
        .paths
        .as_ref()
        .ok_or_else(|| GraphError::arg("graph has no paths to write"))?;

    let path = path.as_ref();
    let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
    let tmp = match dir {
        Some(d) => NamedTempFile::new_in(d)?,
        None => NamedTempFile::new_in(".")?,
    };
    let mut w = BufWriter::new(tmp);

    let arena = store.arena_snapshot();
    let with_paths: Vec<_> = (1..=graph.ht.capacity())
        .filter(|&h| graph.ht.is_live(h) && store.head(h) != crate::paths::PATH_NULL)
        .collect();

    w.write_all(PATHS_MAGIC)?;
    w.write_all(&store.num_paths().to_le_bytes())?;
    w.write_all(&(arena.len() as u64).to_le_bytes())?;
    w.write_all(&(with_paths.len() as u64).to_le_bytes())?;
    w.write_all(&(graph.num_cols() as u32).to_le_bytes())?;
    w.write_all(&arena)?;

    for hkey in with_paths {
        for word in graph.ht.kmer_at(hkey).to_words(graph.kmer_size()) {
            w.write_all(&word.to_le_bytes())?;
        }
        w.write_all(&store.head(hkey).to_le_bytes())?;
    }

    let tmp = w
        .into_inner()
        .map_err(|e| GraphError::Io(e.into_error()))?;
    tmp.persist(path).map_err(|e| GraphError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::graph_from_reads;
    use crate::kmer::Orientation;
    use tempfile::tempdir;

    fn node(g: &Graph, s: &str) -> crate::hash_table::HKey {
        g.ht
            .find(BinaryKmer::from_seq(s.as_bytes(), s.len() as u32).unwrap())
            .unwrap()
            .0
    }

    #[test]
    fn test_paths_round_trip() {
        let mut g = graph_from_reads(5, &["GGCTAACAT", "GCTAACCT"]);
        g.alloc_paths(4096);
        let ps = g.paths.as_ref().unwrap();
        ps.append(node(&g, "GCTAA"), Orientation::Forward, &[0, 2], 0).unwrap();
        ps.append(node(&g, "GCTAA"), Orientation::Reverse, &[3], 0).unwrap();
        ps.append(node(&g, "CTAAC"), Orientation::Forward, &[1], 0).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("out.ctp");
        write_paths(&path, &g).unwrap();

        // Reload into a fresh copy of the same graph.
        let mut g2 = graph_from_reads(5, &["GGCTAACAT", "GCTAACCT"]);
        load_paths(&path, &mut g2).unwrap();
        let ps2 = g2.paths.as_ref().unwrap();
        assert_eq!(ps2.num_paths(), 3);

        let anchor = node(&g2, "GCTAA");
        let mut seen = Vec::new();
        let mut bases = Vec::new();
        for idx in ps2.iter(anchor) {
            let (len, orient) = ps2.entry_len_orient(idx);
            ps2.fetch(idx, &mut bases);
            seen.push((orient, len, bases.clone()));
        }
        assert_eq!(
            seen,
            vec![
                (Orientation::Reverse, 1, vec![3]),
                (Orientation::Forward, 2, vec![0, 2]),
            ]
        );
        assert_eq!(ps2.iter(node(&g2, "CTAAC")).count(), 1);
    }

    #[test]
    fn test_read_raw_inference() {
        let mut g = graph_from_reads(5, &["GGCTAACAT"]);
        g.alloc_paths(1024);
        g.paths
            .as_ref()
            .unwrap()
            .append(node(&g, "GGCTA"), Orientation::Forward, &[0], 0)
            .unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("out.ctp");
        write_paths(&path, &g).unwrap();

        let raw = read_raw(&path).unwrap();
        assert_eq!(raw.header.num_paths, 1);
        assert_eq!(raw.header.num_kmers_with_paths, 1);
        assert_eq!(raw.words_per_kmer, 1);
        let (prev, colset, lenorient, _) = entry_parts(&raw.arena, raw.kmers[0].1 as usize, 1);
        assert_eq!(prev, crate::paths::PATH_NULL);
        assert_eq!(colset, &[1]);
        assert_eq!(lenorient, 1);
    }

    #[test]
    fn test_load_paths_missing_kmer_fails() {
        let mut g = graph_from_reads(5, &["GGCTAACAT"]);
        g.alloc_paths(1024);
        g.paths
            .as_ref()
            .unwrap()
            .append(node(&g, "GGCTA"), Orientation::Forward, &[0], 0)
            .unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.ctp");
        write_paths(&path, &g).unwrap();

        // A graph missing the anchor kmer rejects the file.
        let mut other = graph_from_reads(5, &["TTTTTGGGGG"]);
        assert!(load_paths(&path, &mut other).is_err());
    }
}
