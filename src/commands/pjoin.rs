//! Pjoin command: merge path files, mapping each input's colors onto a
//! fresh range, rebuilding every entry for the widened color bitmaps.

use crate::error::{GraphError, Result};
use crate::format::path_file::{entry_parts, PATHS_MAGIC};
use crate::format::read_raw;
use crate::paths::PATH_NULL;
use crate::status;
use crate::util::commify;
use rustc_hash::FxHashMap;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Shift a color bitmap up by `offset` bits into a wider bitmap.
fn shift_colset(src: &[u8], offset: usize, out_bytes: usize) -> Vec<u8> {
    let mut out = vec![0u8; out_bytes];
    for bit in 0..src.len() * 8 {
        if src[bit / 8] & (1 << (bit % 8)) != 0 {
            let shifted = bit + offset;
            out[shifted / 8] |= 1 << (shifted % 8);
        }
    }
    out
}

pub struct PjoinCommand {
    pub inputs: Vec<PathBuf>,
    pub out: PathBuf,
}

impl PjoinCommand {
    pub fn run(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(GraphError::arg("give at least one input path file"));
        }

        let mut files = Vec::with_capacity(self.inputs.len());
        let mut total_cols = 0usize;
        for path in &self.inputs {
            let raw = read_raw(path)?;
            if let Some(first) = files.first() {
                let first: &crate::format::RawPathFile = first;
                if !first.kmers.is_empty()
                    && !raw.kmers.is_empty()
                    && first.words_per_kmer != raw.words_per_kmer
                {
                    return Err(GraphError::InvalidField {
                        path: raw.path.clone(),
                        field: "kmer words",
                        message: "path files use different kmer widths".into(),
                    });
                }
            }
            total_cols += raw.header.num_cols as usize;
            files.push(raw);
        }

        let out_colset_bytes = (total_cols + 7) / 8;
        let mut arena: Vec<u8> = Vec::new();
        let mut heads: FxHashMap<Vec<u64>, u64> = FxHashMap::default();
        let mut num_paths = 0u64;

        let mut col_offset = 0usize;
        for raw in &files {
            let in_colset_bytes = (raw.header.num_cols as usize + 7) / 8;
            for (words, head) in &raw.kmers {
                let out_head = heads.entry(words.clone()).or_insert(PATH_NULL);
                let mut index = *head;
                while index != PATH_NULL {
                    let (prev, colset, lenorient, bases) =
                        entry_parts(&raw.arena, index as usize, in_colset_bytes);

                    let off = arena.len() as u64;
                    arena.extend_from_slice(&out_head.to_le_bytes());
                    arena.extend_from_slice(&shift_colset(colset, col_offset, out_colset_bytes));
                    arena.extend_from_slice(&lenorient.to_le_bytes());
                    arena.extend_from_slice(bases);
                    *out_head = off;
                    num_paths += 1;

                    index = prev;
                }
            }
            col_offset += raw.header.num_cols as usize;
        }

        let dir = self.out.parent().filter(|d| !d.as_os_str().is_empty());
        let tmp = match dir {
            Some(d) => NamedTempFile::new_in(d)?,
            None => NamedTempFile::new_in(".")?,
        };
        let mut w = BufWriter::new(tmp);
        w.write_all(PATHS_MAGIC)?;
        w.write_all(&num_paths.to_le_bytes())?;
        w.write_all(&(arena.len() as u64).to_le_bytes())?;
        w.write_all(&(heads.len() as u64).to_le_bytes())?;
        w.write_all(&(total_cols as u32).to_le_bytes())?;
        w.write_all(&arena)?;
        let mut kmers: Vec<(&Vec<u64>, u64)> = heads.iter().map(|(k, &v)| (k, v)).collect();
        kmers.sort_unstable();
        for (words, head) in kmers {
            for word in words {
                w.write_all(&word.to_le_bytes())?;
            }
            w.write_all(&head.to_le_bytes())?;
        }
        let tmp = w
            .into_inner()
            .map_err(|e| GraphError::Io(e.into_error()))?;
        tmp.persist(&self.out).map_err(|e| GraphError::Io(e.error))?;

        status!(
            "[pjoin] merged {} files: {} paths x {} colors into {}",
            self.inputs.len(),
            commify(num_paths),
            total_cols,
            self.out.display()
        );
        Ok(())
    }
}
