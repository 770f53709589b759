//! Bloom Filter implementation.
//!
//! A space-efficient probabilistic data structure used to test whether an element
//! is a member of a set. False positive matches are possible, but false negatives are not.

use crate::codec::{read_bytes, read_u32, read_u64};
use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

/// Upper bound on the number of hash functions.
const MAX_HASHES: u32 = 30;

/// Fixed part of the encoded form: num_hashes (4) + num_bits (8).
const HEADER_LEN: usize = 12;

/// BloomFilter provides probabilistic set membership testing over byte keys.
///
/// # Example
/// ```
/// use roughdb::filter::BloomFilter;
///
/// let mut filter = BloomFilter::new(1000, 0.01, 64); // 1000 keys, 1% false positive rate
/// filter.add(b"key1");
/// filter.add(b"key2");
///
/// assert!(filter.may_contain(b"key1"));
/// assert!(filter.may_contain(b"key2"));
/// // key3 might return true (false positive) or false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    /// Number of hash functions to use
    num_hashes: u32,
    /// Number of bits in the filter
    num_bits: u64,
    /// Bit array for the bloom filter
    bits: Vec<u8>,
}

impl BloomFilter {
    /// Create a BloomFilter sized for `expected_keys` at `false_positive_rate`,
    /// never smaller than `min_bits`.
    pub fn new(expected_keys: usize, false_positive_rate: f64, min_bits: usize) -> Self {
        let min_bits = min_bits.max(8) as u64;
        if expected_keys == 0 {
            return Self::with_bits_and_hashes(min_bits, 1);
        }

        // m = -n * ln(p) / (ln(2)^2)
        let num_bits = Self::optimal_num_bits(expected_keys, false_positive_rate).max(min_bits);

        // k = (m/n) * ln(2)
        let num_hashes = Self::optimal_num_hashes(num_bits, expected_keys);

        Self::with_bits_and_hashes(num_bits, num_hashes)
    }

    fn with_bits_and_hashes(num_bits: u64, num_hashes: u32) -> Self {
        Self {
            num_hashes,
            num_bits,
            bits: vec![0u8; num_bits.div_ceil(8) as usize],
        }
    }

    fn optimal_num_bits(expected_keys: usize, false_positive_rate: f64) -> u64 {
        let n = expected_keys as f64;
        let p = false_positive_rate.clamp(0.0001, 0.9999);
        (-n * p.ln() / (2.0_f64.ln().powi(2))).ceil() as u64
    }

    fn optimal_num_hashes(num_bits: u64, expected_keys: usize) -> u32 {
        let k = ((num_bits as f64 / expected_keys as f64) * 2.0_f64.ln()).round() as u32;
        k.clamp(1, MAX_HASHES)
    }

    /// Bit positions for a key by double hashing: `h_i = h1 + i * h2 (mod m)`.
    fn bit_positions(&self, key: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let hash1 = hash_with_seed(key, 0xbc9f1d34);
        // Odd step so consecutive bit positions never collapse onto one bit.
        let hash2 = hash_with_seed(key, 0xd0e89c7b) | 1;
        let num_bits = self.num_bits;
        (0..self.num_hashes as u64)
            .map(move |i| hash1.wrapping_add(i.wrapping_mul(hash2)) % num_bits)
    }

    /// Add a key to the filter.
    pub fn add(&mut self, key: &[u8]) {
        let positions: Vec<u64> = self.bit_positions(key).collect();
        for pos in positions {
            self.bits[(pos / 8) as usize] |= 1 << (pos % 8);
        }
    }

    /// Returns `false` only if the key was definitely never added.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.bit_positions(key).all(|pos| self.bits[(pos / 8) as usize] & (1 << (pos % 8)) != 0)
    }

    /// Get the size of the bit array in bytes.
    pub fn size(&self) -> usize {
        self.bits.len()
    }

    /// Get the number of hash functions used.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Get the number of bits in the filter.
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Approximate false positive rate after inserting `num_keys` keys:
    /// `(1 - e^(-kn/m))^k`.
    pub fn estimated_false_positive_rate(&self, num_keys: usize) -> f64 {
        if num_keys == 0 {
            return 0.0;
        }

        let k = self.num_hashes as f64;
        let n = num_keys as f64;
        let m = self.num_bits as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    /// Length of the encoded form in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.bits.len()
    }

    /// Encode the filter.
    ///
    /// Format:
    /// [num_hashes: 4 bytes][num_bits: 8 bytes][bits: ceil(num_bits / 8) bytes]
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.num_hashes);
        buf.put_u64_le(self.num_bits);
        buf.put_slice(&self.bits);
    }

    /// Decode a filter, advancing `buf` past it.
    pub fn decode_from(buf: &mut &[u8]) -> Result<Self> {
        let num_hashes = read_u32(buf, "bloom num_hashes")?;
        let num_bits = read_u64(buf, "bloom num_bits")?;
        Self::check_shape(num_hashes, num_bits).map_err(Error::corruption)?;

        let bits = read_bytes(buf, num_bits.div_ceil(8) as usize, "bloom bits")?;
        Ok(Self {
            num_hashes,
            num_bits,
            bits,
        })
    }

    /// Check that a filter deserialized from JSON is internally consistent.
    pub fn validate(&self) -> Result<()> {
        Self::check_shape(self.num_hashes, self.num_bits).map_err(Error::missing_or_corrupt)?;
        if self.bits.len() as u64 != self.num_bits.div_ceil(8) {
            return Err(Error::missing_or_corrupt(format!(
                "Bloom filter size mismatch: {} bits in {} bytes",
                self.num_bits,
                self.bits.len()
            )));
        }
        Ok(())
    }

    fn check_shape(num_hashes: u32, num_bits: u64) -> std::result::Result<(), String> {
        if num_hashes == 0 || num_hashes > MAX_HASHES {
            return Err(format!("Invalid bloom hash count: {}", num_hashes));
        }
        if num_bits == 0 {
            return Err("Bloom filter has no bits".to_string());
        }
        Ok(())
    }
}

fn hash_with_seed(key: &[u8], seed: u32) -> u64 {
    let mut hasher = FnvHasher::new_with_seed(seed);
    hasher.write(key);
    hasher.finish()
}

/// Simple FNV-1a hasher for Bloom Filter
struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    fn new_with_seed(seed: u32) -> Self {
        let mut hasher = Self {
            state: Self::FNV_OFFSET_BASIS,
        };
        hasher.write(&seed.to_le_bytes());
        hasher
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        // Final avalanche (splitmix64) so the low bits used by `% m` are well mixed.
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::FNV_PRIME);
        }
    }
}
