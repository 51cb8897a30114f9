//! Graph file (.ctx) codec.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic      6 bytes  "CORTEX"
//! version    u32
//! kmer_size  u32
//! num_words  u32      ceil(2k / 64) 64-bit words per stored k-mer
//! num_cols   u32
//! per color:
//!   mean_read_len  u32
//!   total_seq      u64
//!   sample_name    NUL-terminated bytes
//!   error_rate     f64
//!   cleaned_tips   u8
//!   cleaned_snodes u8
//!   snodes_thresh  u32
//!   nodes_thresh   u32
//!   cleaned_against u8
//!   cleaned_against_name NUL-terminated bytes
//! records:
//!   kmer       num_words x u64, most significant word first
//!   covgs      num_cols x u32
//!   edges      num_cols x u8
//! ```
//!
//! The record count is implied by the file size; a remainder that is not a
//! whole number of records is reported as truncation.

use super::ByteCursor;
use crate::error::{GraphError, Result};
use crate::graph::{ErrorCleaning, Graph, GraphInfo};
use crate::kmer::BinaryKmer;
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const GRAPH_MAGIC: &[u8; 6] = b"CORTEX";
pub const GRAPH_VERSION: u32 = 6;

#[derive(Debug, Clone)]
pub struct GraphFileHeader {
    pub version: u32,
    pub kmer_size: u32,
    pub num_words: u32,
    pub infos: Vec<GraphInfo>,
}

impl GraphFileHeader {
    pub fn num_cols(&self) -> usize {
        self.infos.len()
    }

    fn read(cur: &mut ByteCursor) -> Result<Self> {
        let magic = cur.take(GRAPH_MAGIC.len(), "magic")?;
        if magic != GRAPH_MAGIC {
            return Err(GraphError::BadMagic {
                path: cur.path.to_path_buf(),
                expected: "CORTEX",
            });
        }
        let version = cur.read_u32("version")?;
        if version != GRAPH_VERSION {
            return Err(GraphError::BadVersion {
                path: cur.path.to_path_buf(),
                found: version,
                expected: GRAPH_VERSION,
            });
        }
        let kmer_size = cur.read_u32("kmer_size")?;
        let num_words = cur.read_u32("num_words")?;
        if kmer_size < crate::kmer::MIN_KMER_SIZE
            || kmer_size > crate::kmer::MAX_KMER_SIZE
            || num_words as usize != BinaryKmer::num_words(kmer_size)
        {
            return Err(GraphError::InvalidField {
                path: cur.path.to_path_buf(),
                field: "kmer_size",
                message: format!("kmer_size {} with {} words", kmer_size, num_words),
            });
        }
        let num_cols = cur.read_u32("num_cols")?;
        if num_cols == 0 {
            return Err(GraphError::InvalidField {
                path: cur.path.to_path_buf(),
                field: "num_cols",
                message: "zero colors".into(),
            });
        }

        let mut infos = Vec::with_capacity(num_cols as usize);
        for _ in 0..num_cols {
            let mean_read_len = cur.read_u32("mean_read_len")?;
            let total_seq = cur.read_u64("total_seq")?;
            let sample_name = cur.read_cstr("sample_name")?;
            let error_rate = cur.read_f64("error_rate")?;
            let cleaning = ErrorCleaning {
                cleaned_tips: cur.read_u8("cleaned_tips")? != 0,
                cleaned_snodes: cur.read_u8("cleaned_snodes")? != 0,
                snodes_threshold: cur.read_u32("snodes_threshold")?,
                nodes_threshold: cur.read_u32("nodes_threshold")?,
                is_cleaned_against: cur.read_u8("is_cleaned_against")? != 0,
                cleaned_against_name: cur.read_cstr("cleaned_against_name")?,
            };
            infos.push(GraphInfo {
                sample_name,
                mean_read_len,
                total_seq,
                error_rate,
                cleaning,
            });
        }

        Ok(GraphFileHeader {
            version,
            kmer_size,
            num_words,
            infos,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(GRAPH_MAGIC)?;
        w.write_all(&self.version.to_le_bytes())?;
        w.write_all(&self.kmer_size.to_le_bytes())?;
        w.write_all(&self.num_words.to_le_bytes())?;
        w.write_all(&(self.infos.len() as u32).to_le_bytes())?;
        for info in &self.infos {
            w.write_all(&info.mean_read_len.to_le_bytes())?;
            w.write_all(&info.total_seq.to_le_bytes())?;
            w.write_all(info.sample_name.as_bytes())?;
            w.write_all(&[0])?;
            w.write_all(&info.error_rate.to_le_bytes())?;
            let c = &info.cleaning;
            w.write_all(&[c.cleaned_tips as u8, c.cleaned_snodes as u8])?;
            w.write_all(&c.snodes_threshold.to_le_bytes())?;
            w.write_all(&c.nodes_threshold.to_le_bytes())?;
            w.write_all(&[c.is_cleaned_against as u8])?;
            w.write_all(c.cleaned_against_name.as_bytes())?;
            w.write_all(&[0])?;
        }
        Ok(())
    }
}

pub struct GraphFileReader {
    pub path: PathBuf,
    pub header: GraphFileHeader,
    mmap: Mmap,
    records_off: usize,
    record_size: usize,
    num_kmers: u64,
}

impl GraphFileReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let mut cur = ByteCursor {
            buf: &mmap,
            pos: 0,
            path: &path,
        };
        let header = GraphFileHeader::read(&mut cur)?;
        let records_off = cur.pos;

        let ncols = header.num_cols();
        let record_size = header.num_words as usize * 8 + ncols * 4 + ncols;
        let body = mmap.len() - records_off;
        if body % record_size != 0 {
            return Err(GraphError::Truncated {
                path,
                field: "kmer record",
            });
        }
        let num_kmers = (body / record_size) as u64;

        Ok(GraphFileReader {
            path,
            header,
            mmap,
            records_off,
            record_size,
            num_kmers,
        })
    }

    #[inline]
    pub fn num_kmers(&self) -> u64 {
        self.num_kmers
    }

    #[inline]
    pub fn num_cols(&self) -> usize {
        self.header.num_cols()
    }

    #[inline]
    pub fn kmer_size(&self) -> u32 {
        self.header.kmer_size
    }

    #[inline]
    fn record_bytes(&self, i: u64) -> &[u8] {
        let off = self.records_off + i as usize * self.record_size;
        &self.mmap[off..off + self.record_size]
    }

    /// The i-th record's k-mer.
    pub fn kmer(&self, i: u64) -> BinaryKmer {
        let rec = self.record_bytes(i);
        let nwords = self.header.num_words as usize;
        let mut words = vec![0u64; nwords];
        for (w, chunk) in words.iter_mut().zip(rec.chunks_exact(8).take(nwords)) {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(chunk);
            *w = u64::from_le_bytes(arr);
        }
        BinaryKmer::from_words(&words, self.header.kmer_size)
    }

    /// The i-th record's coverage in a color.
    pub fn covg(&self, i: u64, col: usize) -> u32 {
        let rec = self.record_bytes(i);
        let off = self.header.num_words as usize * 8 + col * 4;
        u32::from_le_bytes([rec[off], rec[off + 1], rec[off + 2], rec[off + 3]])
    }

    /// The i-th record's edge byte in a color.
    pub fn edges(&self, i: u64, col: usize) -> u8 {
        let rec = self.record_bytes(i);
        rec[self.header.num_words as usize * 8 + self.num_cols() * 4 + col]
    }

    /// Load every record into `graph`, mapping this file's colors onto
    /// `col_offset..`. Returns the number of k-mers loaded.
    pub fn load_into(&self, graph: &Graph, col_offset: usize) -> Result<u64> {
        if graph.kmer_size() != self.header.kmer_size {
            return Err(GraphError::KmerSizeMismatch(
                graph.kmer_size(),
                self.header.kmer_size,
            ));
        }
        debug_assert!(col_offset + self.num_cols() <= graph.num_cols());

        for i in 0..self.num_kmers {
            let (hkey, _, _) = graph.ht.find_or_insert(self.kmer(i))?;
            for col in 0..self.num_cols() {
                graph.add_col_covg(hkey, col_offset + col, self.covg(i, col));
                graph.set_col_edges(hkey, col_offset + col, self.edges(i, col));
            }
        }
        Ok(self.num_kmers)
    }
}

/// Write a graph to `path` atomically. Returns the number of records.
pub fn write_graph<P: AsRef<Path>>(path: P, graph: &Graph) -> Result<u64> {
    let path = path.as_ref();
    let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
    let tmp = match dir {
        Some(d) => NamedTempFile::new_in(d)?,
        None => NamedTempFile::new_in(".")?,
    };
    let mut w = BufWriter::new(tmp);

    let header = GraphFileHeader {
        version: GRAPH_VERSION,
        kmer_size: graph.kmer_size(),
        num_words: BinaryKmer::num_words(graph.kmer_size()) as u32,
        infos: graph.info.clone(),
    };
    header.write(&mut w)?;

    let mut count = 0u64;
    for hkey in graph.ht.iter() {
        for word in graph.ht.kmer_at(hkey).to_words(graph.kmer_size()) {
            w.write_all(&word.to_le_bytes())?;
        }
        for col in 0..graph.num_cols() {
            w.write_all(&graph.covg(hkey, col).to_le_bytes())?;
        }
        for col in 0..graph.num_cols() {
            w.write_all(&[graph.col_edges(hkey, col)])?;
        }
        count += 1;
    }

    let tmp = w
        .into_inner()
        .map_err(|e| GraphError::Io(e.into_error()))?;
    tmp.persist(path).map_err(|e| GraphError::Io(e.error))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::graph_from_reads;
    use crate::kmer::Orientation;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read_round_trip() {
        let mut g = graph_from_reads(3, &["AAACT", "AAACT", "GGACC"]);
        g.info[0].sample_name = "sample0".into();
        g.info[0].mean_read_len = 5;
        g.info[0].total_seq = 15;

        let dir = tempdir().unwrap();
        let path = dir.path().join("out.ctx");
        let written = write_graph(&path, &g).unwrap();
        assert_eq!(written, g.ht.num_kmers());

        let rd = GraphFileReader::open(&path).unwrap();
        assert_eq!(rd.kmer_size(), 3);
        assert_eq!(rd.num_cols(), 1);
        assert_eq!(rd.num_kmers(), g.ht.num_kmers());
        assert_eq!(rd.header.infos[0].sample_name, "sample0");
        assert_eq!(rd.header.infos[0].mean_read_len, 5);

        // Every record matches the in-memory node it came from.
        for i in 0..rd.num_kmers() {
            let bk = rd.kmer(i);
            assert_eq!(bk.canonical(3).0, bk, "stored kmer not canonical");
            let (hkey, orient) = g.ht.find(bk).unwrap();
            assert_eq!(orient, Orientation::Forward);
            assert_eq!(rd.covg(i, 0), g.covg(hkey, 0));
            assert_eq!(rd.edges(i, 0), g.col_edges(hkey, 0));
        }
    }

    #[test]
    fn test_load_into_rebuilds_graph() {
        let g = graph_from_reads(3, &["AAACT", "TTGCA"]);
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.ctx");
        write_graph(&path, &g).unwrap();

        let rd = GraphFileReader::open(&path).unwrap();
        let g2 = Graph::new(3, 1, rd.num_kmers() * 2);
        rd.load_into(&g2, 0).unwrap();
        assert_eq!(g2.ht.num_kmers(), g.ht.num_kmers());
        for hkey in g.ht.iter() {
            let bk = g.ht.kmer_at(hkey);
            let (h2, _) = g2.ht.find(bk).unwrap();
            assert_eq!(g2.covg(h2, 0), g.covg(hkey, 0));
            assert_eq!(g2.col_edges(h2, 0), g.col_edges(hkey, 0));
        }
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.ctx");
        std::fs::write(&path, b"NOTCORTEXATALL").unwrap();
        assert!(matches!(
            GraphFileReader::open(&path),
            Err(GraphError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_truncated_record() {
        let g = graph_from_reads(3, &["AAACT"]);
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.ctx");
        write_graph(&path, &g).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 3);
        let cut = dir.path().join("cut.ctx");
        std::fs::write(&cut, &bytes).unwrap();
        assert!(matches!(
            GraphFileReader::open(&cut),
            Err(GraphError::Truncated { .. })
        ));
    }

    #[test]
    fn test_failed_write_leaves_no_output() {
        let g = graph_from_reads(3, &["AAACT"]);
        let dir = tempdir().unwrap();
        let missing = dir.path().join("no-such-dir").join("out.ctx");
        assert!(write_graph(&missing, &g).is_err());
        assert!(!missing.exists());
    }
}
