//! Bloom pre-filter over 128-bit RPIs.
//!
//! A fixed-size bit array with `k` salted hashes. The hash folds the RPI's
//! two 64-bit halves with a per-filter random salt:
//!
//! ```text
//! h(rpi, salt) = (lo64(rpi) XOR hi64(rpi) XOR salt) mod n_bits
//! ```
//!
//! The filter guarantees zero false negatives; the false-positive rate is
//! governed by the bit-array size and `k`. Salts are drawn fresh per
//! filter and are process-local; they must never be persisted or exposed.

use rand::Rng;

/// Bloom filter sized at construction, word-packed into `u64`s.
pub struct RpiFilter {
    bits: Vec<u64>,
    n_bits: u64,
    salts: Vec<u64>,
}

fn fold_rpi(rpi: &[u8; 16]) -> u64 {
    let lo = u64::from_le_bytes(rpi[0..8].try_into().unwrap());
    let hi = u64::from_le_bytes(rpi[8..16].try_into().unwrap());
    lo ^ hi
}

impl RpiFilter {
    /// Creates a filter of `buffer_size × 8` bits with `k` random salts.
    ///
    /// `buffer_size` and `k` are clamped to at least 1.
    #[must_use]
    pub fn new(buffer_size: usize, k: usize) -> Self {
        let n_bits = (buffer_size.max(1) as u64) * 8;
        let words = n_bits.div_ceil(64) as usize;
        let mut rng = rand::thread_rng();
        let salts = (0..k.max(1)).map(|_| rng.r#gen::<u64>()).collect();
        Self {
            bits: vec![0u64; words],
            n_bits,
            salts,
        }
    }

    fn positions<'a>(&'a self, rpi: &[u8; 16]) -> impl Iterator<Item = u64> + 'a {
        let folded = fold_rpi(rpi);
        self.salts.iter().map(move |salt| (folded ^ salt) % self.n_bits)
    }

    /// Marks an RPI as present.
    pub fn insert(&mut self, rpi: &[u8; 16]) {
        let positions: Vec<u64> = self.positions(rpi).collect();
        for pos in positions {
            self.bits[(pos / 64) as usize] |= 1u64 << (pos % 64);
        }
    }

    /// Returns false only when the RPI was definitely never inserted.
    #[must_use]
    pub fn maybe_present(&self, rpi: &[u8; 16]) -> bool {
        self.positions(rpi)
            .all(|pos| self.bits[(pos / 64) as usize] & (1u64 << (pos % 64)) != 0)
    }

    /// Size of the bit array.
    #[must_use]
    pub fn bit_count(&self) -> u64 {
        self.n_bits
    }

    /// Number of hash functions.
    #[must_use]
    pub fn hash_count(&self) -> usize {
        self.salts.len()
    }
}
