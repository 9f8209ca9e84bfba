//! Bloom filter for memory-bounded URL deduplication
//!
//! A positive membership answer may be a false positive at the configured
//! rate; a negative answer is always exact. Sized from the expected item
//! count so the bit array stays within budget no matter how many URLs the
//! run actually sees.

use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Bloom filter implementation
#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// Bit array
    bits: Vec<u8>,
    /// Number of bits
    num_bits: usize,
    /// Number of hash functions
    num_hashes: usize,
}

impl BloomFilter {
    /// Create a new bloom filter
    ///
    /// # Arguments
    /// * `num_items` - Expected number of items
    /// * `false_positive_rate` - Desired false positive rate (e.g., 0.01 for 1%)
    pub fn new(num_items: usize, false_positive_rate: f64) -> Self {
        // m = -n * ln(p) / (ln(2)^2)
        let n = num_items.max(1) as f64;
        let m = (-n * false_positive_rate.ln() / (2.0_f64.ln().powi(2))).ceil() as usize;
        let num_bits = m.max(8);
        let num_bytes = num_bits.div_ceil(8);

        // k = m/n * ln(2)
        let k = ((num_bits as f64 / n) * 2.0_f64.ln()).round() as usize;
        let num_hashes = k.clamp(1, 16);

        Self {
            bits: vec![0u8; num_bytes],
            num_bits,
            num_hashes,
        }
    }

    /// Create a bloom filter with specific parameters
    pub fn with_params(num_bits: usize, num_hashes: usize) -> Self {
        let num_bytes = num_bits.div_ceil(8);
        Self {
            bits: vec![0u8; num_bytes],
            num_bits,
            num_hashes,
        }
    }

    /// Insert an item into the bloom filter
    pub fn insert(&mut self, item: &[u8]) {
        for i in 0..self.num_hashes {
            let hash = self.hash(item, i);
            let bit_idx = hash % self.num_bits;
            let byte_idx = bit_idx / 8;
            let bit_offset = bit_idx % 8;
            self.bits[byte_idx] |= 1 << bit_offset;
        }
    }

    /// Check if an item might be in the set
    /// Returns false if definitely not in set, true if possibly in set
    pub fn contains(&self, item: &[u8]) -> bool {
        for i in 0..self.num_hashes {
            let hash = self.hash(item, i);
            let bit_idx = hash % self.num_bits;
            let byte_idx = bit_idx / 8;
            let bit_offset = bit_idx % 8;

            if (self.bits[byte_idx] & (1 << bit_offset)) == 0 {
                return false;
            }
        }
        true
    }

    /// Get hash for item with given seed
    fn hash(&self, item: &[u8], seed: usize) -> usize {
        xxh3_64_with_seed(item, seed as u64) as usize
    }

    /// Get the size in bytes
    pub fn size_bytes(&self) -> usize {
        self.bits.len()
    }

    /// Get fill ratio (fraction of bits set)
    pub fn fill_ratio(&self) -> f64 {
        let set_bits: usize = self.bits.iter().map(|b| b.count_ones() as usize).sum();
        set_bits as f64 / self.num_bits as f64
    }
}
