//! Packed k-mer representation and canonical orientation.
//!
//! A k-mer of K nucleotides (K in [3, 63]) is packed two bits per base into
//! a 128-bit word, first base in the most significant position. With A < C <
//! G < T mapped to 0 < 1 < 2 < 3, integer order on the packed value equals
//! lexicographic order on the sequence, which is what canonicalization needs.

use crate::error::{GraphError, Result};
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::Hasher;

/// Two-bit nucleotide code: A=0, C=1, G=2, T=3.
pub type Nucleotide = u8;

pub const MIN_KMER_SIZE: u32 = 3;
pub const MAX_KMER_SIZE: u32 = 63;

/// Complement base: A<->T, C<->G.
#[inline]
pub fn nuc_complement(nuc: Nucleotide) -> Nucleotide {
    nuc ^ 3
}

/// Decode an ASCII base. Case-insensitive; anything else is None.
#[inline]
pub fn nuc_from_char(c: u8) -> Option<Nucleotide> {
    match c {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// Encode a two-bit base as an ASCII character.
#[inline]
pub fn nuc_to_char(nuc: Nucleotide) -> u8 {
    debug_assert!(nuc < 4);
    b"ACGT"[nuc as usize]
}

/// Strand relative to the stored canonical k-mer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Orientation {
    #[default]
    Forward,
    Reverse,
}

impl Orientation {
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Orientation::Forward => Orientation::Reverse,
            Orientation::Reverse => Orientation::Forward,
        }
    }

    /// Single-bit encoding used by the path store.
    #[inline]
    pub fn as_bit(self) -> u32 {
        match self {
            Orientation::Forward => 0,
            Orientation::Reverse => 1,
        }
    }

    #[inline]
    pub fn from_bit(bit: u32) -> Self {
        if bit == 0 {
            Orientation::Forward
        } else {
            Orientation::Reverse
        }
    }
}

/// A packed k-mer. Only the low `2k` bits are meaningful; the rest are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BinaryKmer(u128);

/// Reverse the order of 2-bit groups within one 64-bit word.
#[inline]
fn reverse_nuc_pairs(mut w: u64) -> u64 {
    w = ((w & 0x3333_3333_3333_3333) << 2) | ((w >> 2) & 0x3333_3333_3333_3333);
    w = ((w & 0x0f0f_0f0f_0f0f_0f0f) << 4) | ((w >> 4) & 0x0f0f_0f0f_0f0f_0f0f);
    w.swap_bytes()
}

impl BinaryKmer {
    /// The all-zero k-mer (poly-A).
    #[inline]
    pub fn zero() -> Self {
        BinaryKmer(0)
    }

    #[inline]
    fn mask(k: u32) -> u128 {
        (1u128 << (2 * k)) - 1
    }

    /// Number of 64-bit words a k-mer of size `k` occupies on disk.
    #[inline]
    pub fn num_words(k: u32) -> usize {
        ((2 * k as usize) + 63) / 64
    }

    /// Construct from raw on-disk words, most significant word first.
    pub fn from_words(words: &[u64], k: u32) -> Self {
        let mut v: u128 = 0;
        for &w in words {
            v = (v << 64) | w as u128;
        }
        BinaryKmer(v & Self::mask(k))
    }

    /// Decompose into on-disk words, most significant word first.
    pub fn to_words(self, k: u32) -> Vec<u64> {
        let n = Self::num_words(k);
        let mut words = vec![0u64; n];
        let mut v = self.0;
        for w in words.iter_mut().rev() {
            *w = v as u64;
            v >>= 64;
        }
        words
    }

    /// Shift left one base and append `nuc` (forward extension).
    #[inline]
    pub fn left_shift_add(self, k: u32, nuc: Nucleotide) -> Self {
        BinaryKmer(((self.0 << 2) | nuc as u128) & Self::mask(k))
    }

    /// The most recently appended base.
    #[inline]
    pub fn last_nuc(self) -> Nucleotide {
        (self.0 & 3) as Nucleotide
    }

    /// The oldest (leftmost) base.
    #[inline]
    pub fn first_nuc(self, k: u32) -> Nucleotide {
        ((self.0 >> (2 * (k - 1))) & 3) as Nucleotide
    }

    /// Base at position `i`, counting from the leftmost base.
    #[inline]
    pub fn nuc_at(self, k: u32, i: u32) -> Nucleotide {
        debug_assert!(i < k);
        ((self.0 >> (2 * (k - 1 - i))) & 3) as Nucleotide
    }

    /// Reverse complement.
    pub fn reverse_complement(self, k: u32) -> Self {
        let v = self.0 ^ Self::mask(k); // complement every base
        let lo = v as u64;
        let hi = (v >> 64) as u64;
        let rev = ((reverse_nuc_pairs(lo) as u128) << 64) | reverse_nuc_pairs(hi) as u128;
        BinaryKmer(rev >> (128 - 2 * k))
    }

    /// Canonical form: the lexicographically smaller of self and its reverse
    /// complement. The returned orientation records which form `self` was.
    #[inline]
    pub fn canonical(self, k: u32) -> (BinaryKmer, Orientation) {
        let rc = self.reverse_complement(k);
        if rc.0 < self.0 {
            (rc, Orientation::Reverse)
        } else {
            (self, Orientation::Forward)
        }
    }

    /// Re-orient a stored canonical key for traversal in `orient`.
    #[inline]
    pub fn oriented(self, k: u32, orient: Orientation) -> Self {
        match orient {
            Orientation::Forward => self,
            Orientation::Reverse => self.reverse_complement(k),
        }
    }

    /// Slot hash with a rehash seed.
    #[inline]
    pub fn hash64(self, rehash: u32) -> u64 {
        let mut h = FxHasher::default();
        h.write_u128(self.0);
        h.write_u32(rehash);
        h.finish()
    }

    /// Parse from an ASCII sequence of exactly `k` bases.
    pub fn from_seq(seq: &[u8], k: u32) -> Result<Self> {
        if seq.len() != k as usize {
            return Err(GraphError::arg(format!(
                "kmer length {} does not match k={}",
                seq.len(),
                k
            )));
        }
        let mut bk = BinaryKmer::zero();
        for &c in seq {
            let nuc = nuc_from_char(c).ok_or_else(|| {
                GraphError::arg(format!("invalid base '{}' in kmer", c as char))
            })?;
            bk = bk.left_shift_add(k, nuc);
        }
        Ok(bk)
    }

    /// Render as an ASCII string of `k` bases.
    pub fn to_seq(self, k: u32) -> String {
        let mut s = String::with_capacity(k as usize);
        for i in 0..k {
            s.push(nuc_to_char(self.nuc_at(k, i)) as char);
        }
        s
    }
}

/// Check a requested k-mer size against supported bounds.
pub fn validate_kmer_size(k: u32) -> Result<u32> {
    if !(MIN_KMER_SIZE..=MAX_KMER_SIZE).contains(&k) {
        return Err(GraphError::arg(format!(
            "kmer size must be in [{}, {}], got {}",
            MIN_KMER_SIZE, MAX_KMER_SIZE, k
        )));
    }
    Ok(k)
}

/// Debug rendering for diagnostic dumps; needs k, so not `Display`.
pub struct KmerStr(pub BinaryKmer, pub u32);

impl fmt::Display for KmerStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_seq(self.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn bk(s: &str) -> BinaryKmer {
        BinaryKmer::from_seq(s.as_bytes(), s.len() as u32).unwrap()
    }

    #[test]
    fn test_seq_round_trip() {
        for s in ["AAA", "ACT", "GATTACA", "TTTTTTT", "CAGACAG"] {
            assert_eq!(bk(s).to_seq(s.len() as u32), s);
        }
    }

    #[test]
    fn test_reverse_complement() {
        assert_eq!(bk("AAA").reverse_complement(3).to_seq(3), "TTT");
        assert_eq!(bk("ACT").reverse_complement(3).to_seq(3), "AGT");
        assert_eq!(bk("GATTACA").reverse_complement(7).to_seq(7), "TGTAATC");
    }

    #[test]
    fn test_revcomp_involution() {
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..200 {
            let k = rng.gen_range(MIN_KMER_SIZE..=MAX_KMER_SIZE);
            let mut x = BinaryKmer::zero();
            for _ in 0..k {
                x = x.left_shift_add(k, rng.gen_range(0..4));
            }
            assert_eq!(x.reverse_complement(k).reverse_complement(k), x);
        }
    }

    #[test]
    fn test_canonical_is_min_and_idempotent() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..200 {
            let k = rng.gen_range(MIN_KMER_SIZE..=MAX_KMER_SIZE);
            let mut x = BinaryKmer::zero();
            for _ in 0..k {
                x = x.left_shift_add(k, rng.gen_range(0..4));
            }
            let (key, orient) = x.canonical(k);
            let rc = x.reverse_complement(k);
            assert_eq!(key, if rc < x { rc } else { x });
            // Canonicalizing the canonical form is the identity.
            let (key2, orient2) = key.canonical(k);
            assert_eq!(key2, key);
            assert_eq!(orient2, Orientation::Forward);
            // The recorded orientation recovers the original kmer.
            assert_eq!(key.oriented(k, orient), x);
        }
    }

    #[test]
    fn test_left_shift_add() {
        let x = bk("ACT").left_shift_add(3, 2); // ACT + G
        assert_eq!(x.to_seq(3), "CTG");
        assert_eq!(x.last_nuc(), 2);
        assert_eq!(x.first_nuc(3), 1);
    }

    #[test]
    fn test_words_round_trip_k63() {
        let mut rng = SmallRng::seed_from_u64(99);
        let k = 63;
        let mut x = BinaryKmer::zero();
        for _ in 0..k {
            x = x.left_shift_add(k, rng.gen_range(0..4));
        }
        assert_eq!(BinaryKmer::num_words(k), 2);
        let words = x.to_words(k);
        assert_eq!(BinaryKmer::from_words(&words, k), x);
    }

    #[test]
    fn test_validate_kmer_size() {
        assert!(validate_kmer_size(3).is_ok());
        assert!(validate_kmer_size(4).is_ok());
        assert!(validate_kmer_size(31).is_ok());
        assert!(validate_kmer_size(63).is_ok());
        assert!(validate_kmer_size(1).is_err());
        assert!(validate_kmer_size(65).is_err());
    }
}
