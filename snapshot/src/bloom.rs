//! Bloom filter tracking the keys touched by a diff layer stack.
//!
//! Every diff layer carries a filter covering its own keys and those of all
//! diff ancestors down to the disk layer. A negative probe proves the whole
//! in-memory stack cannot contain a key, letting reads jump straight to
//! disk without walking the chain.

use alloy_primitives::B256;
use once_cell::sync::Lazy;
use rand::Rng;

/// Maximum size of the bottom-most diff layer that aggregates the writes
/// from above until it's flushed into the disk layer.
///
/// Note, bumping this up might drastically increase the size of the bloom
/// filters that's stored in every diff layer. Don't do that without fully
/// understanding all the implications.
pub const AGGREGATOR_MEMORY_LIMIT: u64 = 4 * 1024 * 1024;

/// Approximate number of items that will end up in the aggregator layer
/// before it's flushed out to disk. The average entry weighs in around
/// 47B with its hash; use a smaller number to be on the safe side.
pub const AGGREGATOR_ITEM_LIMIT: u64 = AGGREGATOR_MEMORY_LIMIT / 42;

/// Target false positive rate when the aggregator layer is at its fullest.
/// The observed value will move around this number, it's a ballpark figure.
///
/// Note, dropping this down might drastically increase the size of the
/// bloom filters that's stored in every diff layer.
pub const BLOOM_TARGET_ERROR: f64 = 0.02;

/// Ideal bloom filter size given the maximum number of items it's expected
/// to hold and the target false positive error rate.
pub static BLOOM_SIZE: Lazy<u64> = Lazy::new(|| {
    (AGGREGATOR_ITEM_LIMIT as f64 * BLOOM_TARGET_ERROR.ln()
        / (1.0 / 2f64.powf(2f64.ln())).ln())
    .ceil() as u64
});

/// Ideal number of bits a single entry should set in the bloom filter to
/// keep its size to a minimum.
pub static BLOOM_FUNCS: Lazy<u64> =
    Lazy::new(|| ((*BLOOM_SIZE as f64 / AGGREGATOR_ITEM_LIMIT as f64) * 2f64.ln()).round() as u64);

// The bloom offsets are runtime constants determining which part of an
// account/slot hash the mixers look at. Randomised once per process so the
// global population of nodes does not display identical bloom behaviour.
static BLOOM_ACCOUNT_HASHER_OFFSET: Lazy<usize> =
    Lazy::new(|| rand::thread_rng().gen_range(0..25));
static BLOOM_STORAGE_HASHER_OFFSET: Lazy<usize> =
    Lazy::new(|| rand::thread_rng().gen_range(0..25));

fn be_u64_at(hash: &B256, offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&hash[offset..offset + 8]);
    u64::from_be_bytes(buf)
}

/// Converts an account hash into the 64 bit mini hash the filter consumes.
pub fn account_bloom_hash(hash: &B256) -> u64 {
    be_u64_at(hash, *BLOOM_ACCOUNT_HASHER_OFFSET)
}

/// Converts an account hash and a storage slot hash into a 64 bit mini hash.
pub fn storage_bloom_hash(account_hash: &B256, slot_hash: &B256) -> u64 {
    be_u64_at(account_hash, *BLOOM_ACCOUNT_HASHER_OFFSET)
        ^ be_u64_at(slot_hash, *BLOOM_STORAGE_HASHER_OFFSET)
}

/// Fixed-size bloom filter with `m` bits and `k` probes per key.
///
/// The filter consumes pre-mixed 64 bit keys, never raw hashes; see
/// [`account_bloom_hash`] and [`storage_bloom_hash`].
#[derive(Clone, Debug)]
pub struct BloomFilter {
    bits: Vec<u64>,
    m: u64,
    k: u64,
    n: u64,
}

impl BloomFilter {
    /// Allocates an empty filter with the derived ideal size and probe count.
    pub fn new() -> Self {
        Self::with_params(*BLOOM_SIZE, *BLOOM_FUNCS)
    }

    /// Allocates an empty filter with `m` bits and `k` probes.
    pub fn with_params(m: u64, k: u64) -> Self {
        let words = m.div_ceil(64).max(1) as usize;
        Self { bits: vec![0; words], m, k: k.max(1), n: 0 }
    }

    fn second_probe(key: u64) -> u64 {
        key.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1
    }

    /// Adds a pre-mixed key to the filter.
    pub fn add(&mut self, key: u64) {
        let h2 = Self::second_probe(key);
        for i in 0..self.k {
            let bit = key.wrapping_add(i.wrapping_mul(h2)) % self.m;
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
        self.n += 1;
    }

    /// Probes the filter for a pre-mixed key. False positives are possible,
    /// false negatives are not.
    pub fn contains(&self, key: u64) -> bool {
        let h2 = Self::second_probe(key);
        for i in 0..self.k {
            let bit = key.wrapping_add(i.wrapping_mul(h2)) % self.m;
            if self.bits[(bit / 64) as usize] & (1 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }

    /// Returns the filter size in bits.
    pub fn m(&self) -> u64 {
        self.m
    }

    /// Returns the number of probes per key.
    pub fn k(&self) -> u64 {
        self.k
    }

    /// Returns the number of keys added so far.
    pub fn n(&self) -> u64 {
        self.n
    }

    /// Predicted false positive rate for the current population.
    pub fn false_positive_rate(&self) -> f64 {
        let k = self.k as f64;
        let n = self.n as f64;
        let m = self.m as f64;
        (1.0 - (-k * (n + 0.5) / (m - 1.0)).exp()).powf(k)
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new()
    }
}
