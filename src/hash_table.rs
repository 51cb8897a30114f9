//! Open-addressed hash table of canonical k-mers.
//!
//! The table is the identity map of the graph: a k-mer's slot index is its
//! node id (`HKey`) for the lifetime of the graph. Capacity is fixed up
//! front from the memory budget; the table never grows.
//!
//! Layout: `capacity` slots split into buckets of [`BUCKET_SIZE`], plus a
//! sentinel slot 0 that is never occupied, so valid `HKey`s are
//! `1..=capacity`. A probe hashes the canonical key to a bucket and scans it
//! linearly, rehashing to another bucket up to [`REHASH_LIMIT`] times.
//!
//! Two access modes, enforced by the borrow checker:
//! - concurrent insert: `find_or_insert(&self, ..)` from many threads.
//!   Slots are claimed with a two-phase publish (CAS EMPTY->BUSY, write the
//!   key words, store FULL with release ordering). A thread that loses the
//!   CAS re-examines the same slot, so duplicate inserts of one k-mer always
//!   converge on a single slot.
//! - exclusive mutate: `remove(&mut self, ..)` during cleaning. Emptied
//!   slots stay inside the bucket's fill watermark, so later probes skip
//!   them instead of stopping early.

use crate::error::{GraphError, Result};
use crate::kmer::{BinaryKmer, Orientation};
use crate::util::round_up_pow2;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Node id: slot index into the hash table. Zero is a sentinel.
pub type HKey = u64;

pub const HKEY_NULL: HKey = 0;

/// Slots per bucket. A probe scans a whole bucket before rehashing.
const BUCKET_SIZE: usize = 32;

/// Bounded number of bucket rehashes before reporting the table full.
const REHASH_LIMIT: u32 = 16;

const SLOT_EMPTY: u8 = 0;
const SLOT_BUSY: u8 = 1;
const SLOT_FULL: u8 = 2;

pub struct KmerHashTable {
    kmer_size: u32,
    capacity: u64,
    num_buckets: u64,
    /// Slot occupancy states, index 0 is the sentinel (never used).
    states: Box<[AtomicU8]>,
    /// Low/high halves of each slot's packed canonical k-mer.
    words_lo: Box<[AtomicU64]>,
    words_hi: Box<[AtomicU64]>,
    /// Per-bucket watermark: number of slots ever occupied, scan horizon.
    bucket_fill: Box<[AtomicU8]>,
    num_kmers: AtomicU64,
}

fn atomic_u8_array(len: usize) -> Box<[AtomicU8]> {
    (0..len).map(|_| AtomicU8::new(0)).collect()
}

fn atomic_u64_array(len: usize) -> Box<[AtomicU64]> {
    (0..len).map(|_| AtomicU64::new(0)).collect()
}

impl KmerHashTable {
    /// Allocate a table able to hold `nkmers` k-mers below 75% load.
    pub fn new(kmer_size: u32, nkmers: u64) -> Self {
        let wanted_slots = ((nkmers * 4 + 2) / 3).max(BUCKET_SIZE as u64);
        let num_buckets = round_up_pow2((wanted_slots + BUCKET_SIZE as u64 - 1) / BUCKET_SIZE as u64);
        let capacity = num_buckets * BUCKET_SIZE as u64;
        let nslots = capacity as usize + 1;
        KmerHashTable {
            kmer_size,
            capacity,
            num_buckets,
            states: atomic_u8_array(nslots),
            words_lo: atomic_u64_array(nslots),
            words_hi: atomic_u64_array(nslots),
            bucket_fill: atomic_u8_array(num_buckets as usize),
            num_kmers: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn kmer_size(&self) -> u32 {
        self.kmer_size
    }

    /// Total slots; valid `HKey`s are `1..=capacity()`.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn num_kmers(&self) -> u64 {
        self.num_kmers.load(Ordering::Acquire)
    }

    /// Approximate heap footprint, for memory-budget reporting.
    pub fn mem_bytes(&self) -> u64 {
        (self.capacity + 1) * (1 + 8 + 8) + self.num_buckets
    }

    #[inline]
    pub fn is_live(&self, hkey: HKey) -> bool {
        hkey != HKEY_NULL && self.states[hkey as usize].load(Ordering::Acquire) == SLOT_FULL
    }

    /// The canonical k-mer stored at a live slot.
    #[inline]
    pub fn kmer_at(&self, hkey: HKey) -> BinaryKmer {
        debug_assert!(self.is_live(hkey));
        let lo = self.words_lo[hkey as usize].load(Ordering::Relaxed);
        let hi = self.words_hi[hkey as usize].load(Ordering::Relaxed);
        BinaryKmer::from_words(&[hi, lo], self.kmer_size)
    }

    #[inline]
    fn bucket_of(&self, key: BinaryKmer, rehash: u32) -> usize {
        (key.hash64(rehash) & (self.num_buckets - 1)) as usize
    }

    /// Wait out a concurrent two-phase publish on `slot`, then report
    /// whether the slot holds `key`.
    #[inline]
    fn slot_matches(&self, slot: usize, key: BinaryKmer) -> bool {
        while self.states[slot].load(Ordering::Acquire) == SLOT_BUSY {
            std::hint::spin_loop();
        }
        self.states[slot].load(Ordering::Acquire) == SLOT_FULL
            && self.kmer_at(slot as HKey) == key
    }

    /// Look up a k-mer. Canonicalizes the query; the returned orientation
    /// records which form matched.
    pub fn find(&self, bk: BinaryKmer) -> Option<(HKey, Orientation)> {
        let (key, orient) = bk.canonical(self.kmer_size);
        for rehash in 0..REHASH_LIMIT {
            let b = self.bucket_of(key, rehash);
            let fill = self.bucket_fill[b].load(Ordering::Acquire) as usize;
            let base = 1 + b * BUCKET_SIZE;
            for slot in base..base + fill {
                if self.slot_matches(slot, key) {
                    return Some((slot as HKey, orient));
                }
            }
            if fill < BUCKET_SIZE {
                return None;
            }
        }
        None
    }

    /// Find a k-mer's slot, inserting it if absent. Safe to call from many
    /// threads at once; repeated inserts of one k-mer return one slot.
    pub fn find_or_insert(&self, bk: BinaryKmer) -> Result<(HKey, Orientation, bool)> {
        let (key, orient) = bk.canonical(self.kmer_size);
        for rehash in 0..REHASH_LIMIT {
            let b = self.bucket_of(key, rehash);
            let base = 1 + b * BUCKET_SIZE;
            for i in 0..BUCKET_SIZE {
                let slot = base + i;
                loop {
                    match self.states[slot].load(Ordering::Acquire) {
                        SLOT_FULL => {
                            if self.kmer_at(slot as HKey) == key {
                                return Ok((slot as HKey, orient, false));
                            }
                            break;
                        }
                        SLOT_BUSY => {
                            std::hint::spin_loop();
                        }
                        _ => {
                            if self.num_kmers() * 4 >= self.capacity * 3 {
                                return Err(GraphError::CapacityExhausted);
                            }
                            if self.states[slot]
                                .compare_exchange(
                                    SLOT_EMPTY,
                                    SLOT_BUSY,
                                    Ordering::AcqRel,
                                    Ordering::Acquire,
                                )
                                .is_ok()
                            {
                                let words = key.to_words(self.kmer_size);
                                let (hi, lo) = match words.len() {
                                    1 => (0, words[0]),
                                    _ => (words[0], words[1]),
                                };
                                self.words_lo[slot].store(lo, Ordering::Relaxed);
                                self.words_hi[slot].store(hi, Ordering::Relaxed);
                                self.states[slot].store(SLOT_FULL, Ordering::Release);
                                self.bucket_fill[b].fetch_max(i as u8 + 1, Ordering::AcqRel);
                                self.num_kmers.fetch_add(1, Ordering::AcqRel);
                                return Ok((slot as HKey, orient, true));
                            }
                            // Lost the claim: re-examine this slot, the
                            // winner may have inserted our k-mer.
                        }
                    }
                }
            }
        }
        Err(GraphError::CapacityExhausted)
    }

    /// Remove a node. Exclusive access only; the bucket watermark is left
    /// in place so probe chains stay intact.
    pub fn remove(&mut self, hkey: HKey) {
        debug_assert!(self.is_live(hkey));
        self.states[hkey as usize].store(SLOT_EMPTY, Ordering::Release);
        self.words_lo[hkey as usize].store(0, Ordering::Relaxed);
        self.words_hi[hkey as usize].store(0, Ordering::Relaxed);
        self.num_kmers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Iterate live node ids.
    pub fn iter(&self) -> impl Iterator<Item = HKey> + '_ {
        (1..=self.capacity).filter(move |&h| self.is_live(h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    const K: u32 = 11;

    fn random_kmer(rng: &mut SmallRng) -> BinaryKmer {
        let mut bk = BinaryKmer::zero();
        for _ in 0..K {
            bk = bk.left_shift_add(K, rng.gen_range(0..4));
        }
        bk
    }

    #[test]
    fn test_insert_then_find() {
        let ht = KmerHashTable::new(K, 1000);
        let bk = BinaryKmer::from_seq(b"ACGTACGTACG", K).unwrap();
        let (h, orient, inserted) = ht.find_or_insert(bk).unwrap();
        assert!(inserted);
        assert_ne!(h, HKEY_NULL);
        assert_eq!(ht.find(bk), Some((h, orient)));
        // The reverse complement resolves to the same slot, opposite strand.
        let rc = bk.reverse_complement(K);
        let (h2, orient2) = ht.find(rc).unwrap();
        assert_eq!(h2, h);
        assert_eq!(orient2, orient.opposite());
    }

    #[test]
    fn test_insert_idempotent() {
        let ht = KmerHashTable::new(K, 1000);
        let bk = BinaryKmer::from_seq(b"GATTACAGATT", K).unwrap();
        let (h0, _, ins0) = ht.find_or_insert(bk).unwrap();
        assert!(ins0);
        for _ in 0..10 {
            let (h, _, inserted) = ht.find_or_insert(bk).unwrap();
            assert_eq!(h, h0);
            assert!(!inserted);
        }
        assert_eq!(ht.num_kmers(), 1);
    }

    #[test]
    fn test_only_canonical_stored() {
        let ht = KmerHashTable::new(K, 100);
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..50 {
            let bk = random_kmer(&mut rng);
            let (h, _, _) = ht.find_or_insert(bk).unwrap();
            let stored = ht.kmer_at(h);
            assert_eq!(stored.canonical(K).0, stored);
        }
    }

    #[test]
    fn test_remove_keeps_probe_chains() {
        let mut ht = KmerHashTable::new(K, 2000);
        let mut rng = SmallRng::seed_from_u64(11);
        let kmers: Vec<BinaryKmer> = (0..500).map(|_| random_kmer(&mut rng)).collect();
        let handles: Vec<HKey> = kmers
            .iter()
            .map(|&bk| ht.find_or_insert(bk).unwrap().0)
            .collect();
        let before = ht.num_kmers();

        // Remove every third entry, then everything else must remain findable.
        let mut removed = 0;
        for (i, &h) in handles.iter().enumerate() {
            if i % 3 == 0 && ht.is_live(h) {
                ht.remove(h);
                removed += 1;
            }
        }
        assert_eq!(ht.num_kmers(), before - removed);
        for (i, &bk) in kmers.iter().enumerate() {
            if i % 3 != 0 && ht.is_live(handles[i]) {
                assert!(ht.find(bk).is_some(), "kmer {} lost after removals", i);
            }
        }
    }

    #[test]
    fn test_capacity_exhausted() {
        let ht = KmerHashTable::new(K, 16);
        let mut rng = SmallRng::seed_from_u64(5);
        let mut err = None;
        for _ in 0..10_000 {
            if let Err(e) = ht.find_or_insert(random_kmer(&mut rng)) {
                err = Some(e);
                break;
            }
        }
        assert!(matches!(err, Some(GraphError::CapacityExhausted)));
    }

    #[test]
    fn test_concurrent_insert_matches_sequential() {
        let mut rng = SmallRng::seed_from_u64(1234);
        let kmers: Vec<BinaryKmer> = (0..100_000).map(|_| random_kmer(&mut rng)).collect();

        let seq = KmerHashTable::new(K, 200_000);
        for &bk in &kmers {
            seq.find_or_insert(bk).unwrap();
        }

        let par = KmerHashTable::new(K, 200_000);
        let par_ref = &par;
        std::thread::scope(|scope| {
            for chunk in kmers.chunks(kmers.len() / 8 + 1) {
                scope.spawn(move || {
                    for &bk in chunk {
                        par_ref.find_or_insert(bk).unwrap();
                    }
                });
            }
        });

        assert_eq!(par.num_kmers(), seq.num_kmers());
        for &bk in kmers.iter().step_by(97) {
            assert!(par.find(bk).is_some());
        }
    }
}
