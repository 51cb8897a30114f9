//! Bit-exact packing of nucleotide paths.
//!
//! Base `i` of a path occupies bits `(2i, 2i+1)` of byte `i/4`; unused
//! trailing bits of the final byte are zero. Zeroed tails matter: the path
//! store deduplicates entries by comparing packed bytes directly.

use crate::kmer::{Nucleotide, Orientation};

/// Path length in bases. The top bit of the on-disk word is the orientation,
/// so lengths are limited to 31 bits.
pub type PathLen = u32;

pub const MAX_PATH_LEN: PathLen = (1 << 31) - 1;

/// Bytes needed to pack `len` bases.
#[inline]
pub fn packed_len_bytes(len: usize) -> usize {
    (len + 3) / 4
}

/// Pack `src` into `dst`, two bits per base. Writes exactly
/// `packed_len_bytes(src.len())` bytes; trailing bits are zero.
pub fn pack_bases(dst: &mut [u8], src: &[Nucleotide]) {
    let nbytes = packed_len_bytes(src.len());
    for b in &mut dst[..nbytes] {
        *b = 0;
    }
    for (i, &nuc) in src.iter().enumerate() {
        dst[i / 4] |= (nuc & 3) << (2 * (i % 4));
    }
}

/// Unpack `len` bases from `src` into `dst`.
pub fn unpack_bases(src: &[u8], dst: &mut [Nucleotide], len: usize) {
    for (i, d) in dst[..len].iter_mut().enumerate() {
        *d = (src[i / 4] >> (2 * (i % 4))) & 3;
    }
}

/// Copy `len - shift` bases starting at base offset `shift` of `src` into
/// `dst` starting at base offset 0, re-aligned. Writes
/// `packed_len_bytes(len - shift)` bytes; trailing bits of the last written
/// byte are zeroed.
pub fn packed_cpy(dst: &mut [u8], src: &[u8], shift: usize, len: usize) {
    debug_assert!(shift <= len);
    let out_len = len - shift;
    if out_len == 0 {
        return;
    }
    let out_bytes = packed_len_bytes(out_len);
    let byte_shift = shift / 4;
    let bit_shift = 2 * (shift % 4);

    if bit_shift == 0 {
        dst[..out_bytes].copy_from_slice(&src[byte_shift..byte_shift + out_bytes]);
    } else {
        for i in 0..out_bytes {
            let lo = src[byte_shift + i] >> bit_shift;
            let hi = src
                .get(byte_shift + i + 1)
                .map_or(0, |&b| b << (8 - bit_shift));
            dst[i] = lo | hi;
        }
    }

    let tail = out_len % 4;
    if tail != 0 {
        dst[out_bytes - 1] &= (1u8 << (2 * tail)) - 1;
    }
}

/// Fuse a path length and anchor orientation into one 32-bit word:
/// low 31 bits length, top bit orientation.
#[inline]
pub fn combine_lenorient(len: PathLen, orient: Orientation) -> u32 {
    debug_assert!(len <= MAX_PATH_LEN);
    len | (orient.as_bit() << 31)
}

/// Inverse of [`combine_lenorient`].
#[inline]
pub fn split_lenorient(word: u32) -> (PathLen, Orientation) {
    (word & MAX_PATH_LEN, Orientation::from_bit(word >> 31))
}
