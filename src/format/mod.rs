//! On-disk formats: graph files (.ctx) and path files (.ctp).
//!
//! Readers memory-map their input; writers stream through a temp file in
//! the destination directory and rename it into place on success, so a
//! failed run never leaves a half-written output behind.

pub mod graph_file;
pub mod path_file;

pub use graph_file::{write_graph, GraphFileHeader, GraphFileReader, GRAPH_VERSION};
pub use path_file::{load_paths, read_raw, write_paths, PathFileHeader, RawPathFile};

use crate::error::{GraphError, Result};
use memchr::memchr;
use std::path::Path;

/// Sequential reader over a mapped byte buffer, reporting truncation with
/// the name of the field being read.
pub(crate) struct ByteCursor<'a> {
    pub(crate) buf: &'a [u8],
    pub(crate) pos: usize,
    pub(crate) path: &'a Path,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(GraphError::Truncated {
                path: self.path.to_path_buf(),
                field,
            });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub(crate) fn read_u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    pub(crate) fn read_u32(&mut self, field: &'static str) -> Result<u32> {
        let b = self.take(4, field)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_u64(&mut self, field: &'static str) -> Result<u64> {
        let b = self.take(8, field)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub(crate) fn read_f64(&mut self, field: &'static str) -> Result<f64> {
        let b = self.take(8, field)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(f64::from_le_bytes(arr))
    }

    pub(crate) fn read_cstr(&mut self, field: &'static str) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let nul = memchr(0, rest).ok_or_else(|| GraphError::Truncated {
            path: self.path.to_path_buf(),
            field,
        })?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }
}
