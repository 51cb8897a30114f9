//! Minimal sequence input: FASTA, FASTQ, or one read per line.
//!
//! This is deliberately a small reader for well-formed files; full-featured
//! parsing (BAM, gzip, paired-end merging) is outside the toolkit.

use crate::error::{GraphError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

pub struct SeqReader<R: Read> {
    reader: BufReader<R>,
    line: String,
    /// Lookahead line, set when FASTA parsing reads one record too far.
    pending: Option<String>,
    line_number: usize,
}

impl SeqReader<File> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(file))
    }
}

impl<R: Read> SeqReader<R> {
    pub fn new(reader: R) -> Self {
        SeqReader {
            reader: BufReader::new(reader),
            line: String::with_capacity(256),
            pending: None,
            line_number: 0,
        }
    }

    /// Next raw line with trailing whitespace trimmed, or None at EOF.
    fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            let trimmed = self.line.trim_end();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    fn bad(&self, message: &str) -> GraphError {
        GraphError::arg(format!("sequence input line {}: {}", self.line_number, message))
    }

    /// Read the next sequence. The record format is detected per record
    /// from its first character: '>' FASTA, '@' FASTQ, anything else a
    /// plain read.
    pub fn read_seq(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(line) = self.next_line()? else {
            return Ok(None);
        };

        match line.as_bytes()[0] {
            b'>' => {
                // FASTA: concatenate lines until the next header.
                let mut seq = Vec::new();
                while let Some(next) = self.next_line()? {
                    if next.starts_with('>') {
                        self.pending = Some(next);
                        break;
                    }
                    seq.extend_from_slice(next.as_bytes());
                }
                if seq.is_empty() {
                    return Err(self.bad("FASTA record with no sequence"));
                }
                Ok(Some(seq))
            }
            b'@' => {
                // FASTQ: sequence, separator, quality.
                let seq = self
                    .next_line()?
                    .ok_or_else(|| self.bad("FASTQ record truncated before sequence"))?;
                let sep = self
                    .next_line()?
                    .ok_or_else(|| self.bad("FASTQ record truncated before '+'"))?;
                if !sep.starts_with('+') {
                    return Err(self.bad("FASTQ separator line must start with '+'"));
                }
                self.next_line()?
                    .ok_or_else(|| self.bad("FASTQ record truncated before quality"))?;
                Ok(Some(seq.into_bytes()))
            }
            _ => Ok(Some(line.into_bytes())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn all(input: &str) -> Vec<String> {
        let mut rd = SeqReader::new(Cursor::new(input.to_string()));
        let mut out = Vec::new();
        while let Some(seq) = rd.read_seq().unwrap() {
            out.push(String::from_utf8(seq).unwrap());
        }
        out
    }

    #[test]
    fn test_plain_reads() {
        assert_eq!(all("ACGT\nGGTT\n\nTTAA\n"), vec!["ACGT", "GGTT", "TTAA"]);
    }

    #[test]
    fn test_fasta_multiline() {
        let input = ">r1 sample\nACGT\nGGTT\n>r2\nTTAA\n";
        assert_eq!(all(input), vec!["ACGTGGTT", "TTAA"]);
    }

    #[test]
    fn test_fastq() {
        let input = "@r1\nACGT\n+\nIIII\n@r2\nGGTT\n+r2\nIIII\n";
        assert_eq!(all(input), vec!["ACGT", "GGTT"]);
    }

    #[test]
    fn test_truncated_fastq_is_an_error() {
        let mut rd = SeqReader::new(Cursor::new("@r1\nACGT\n".to_string()));
        assert!(rd.read_seq().is_err());
    }
}
