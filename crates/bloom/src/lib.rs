//! # Counting Bloom Filter
//!
//! A probabilistic set-membership structure whose bits are replaced by small
//! 4-bit counters, so that keys can be removed again.
//!
//! Like any bloom filter it never reports a present key as absent (no false
//! negatives) but may report an absent key as present (false positives),
//! because several keys can share the same counters.
//!
//! ## Counter layout
//!
//! Two counters are packed into each byte: counter `n` lives in byte `n / 2`,
//! in the low nibble when `n` is even and in the high nibble when `n` is odd.
//!
//! Counters saturate: incrementing a counter at 15 leaves it at 15 and
//! decrementing a counter at 0 leaves it at 0.
//!
//! ## Deleting
//!
//! [`CountingBloomFilter::del`] is only correct for keys that were previously
//! added. Deleting a key that was never added decrements counters owned by
//! other keys and can turn them into false negatives. This is not detected.
//!
//! ## Example
//!
//! ```rust
//! use bloom::{CountingBloomFilter, fnv_hash, sdbm_hash, sax_hash};
//!
//! let mut bf = CountingBloomFilter::new(1024, vec![sax_hash, sdbm_hash, fnv_hash]);
//! bf.add(b"spam");
//! assert!(bf.check(b"spam"));
//! bf.del(b"spam");
//! ```

mod hash;

pub use hash::{
    ap_hash, bkdr_hash, elf_hash, fnv_hash, js_hash, rs_hash, sax_hash, sdbm_hash, DEFAULT_HASHES,
};

/// A hash function mapping a key to a 32-bit value.
pub type HashFn = fn(&[u8]) -> u32;

/// Largest value a single counter can hold.
pub const COUNTER_MAX: u8 = 0xF;

/// Number of bits used by each counter.
const COUNTER_BITS: usize = 4;

/// A counting bloom filter with `size` 4-bit counters and a fixed, ordered
/// list of hash functions.
pub struct CountingBloomFilter {
    /// Packed counters, two per byte.
    counters: Vec<u8>,
    /// Number of counters in the filter.
    size: usize,
    /// Hash functions applied to every key, in order.
    funcs: Vec<HashFn>,
}

impl CountingBloomFilter {
    /// Creates a filter with `size` counters using the given hash functions.
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0 or `funcs` is empty.
    pub fn new(size: usize, funcs: Vec<HashFn>) -> Self {
        assert!(size > 0, "size must be > 0");
        assert!(!funcs.is_empty(), "at least one hash function is required");

        let byte_len = (size * COUNTER_BITS).div_ceil(8);

        Self {
            counters: vec![0u8; byte_len],
            size,
            funcs,
        }
    }

    /// Creates a filter using the first `nfuncs` functions of
    /// [`DEFAULT_HASHES`].
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0, `nfuncs` is 0 or `nfuncs` exceeds the number of
    /// default hash functions.
    pub fn with_default_hashes(size: usize, nfuncs: usize) -> Self {
        assert!(
            nfuncs <= DEFAULT_HASHES.len(),
            "at most {} default hash functions are available",
            DEFAULT_HASHES.len()
        );
        Self::new(size, DEFAULT_HASHES[..nfuncs].to_vec())
    }

    /// Adds a key, incrementing one counter per hash function.
    pub fn add(&mut self, key: &[u8]) {
        for i in 0..self.funcs.len() {
            let idx = self.index(i, key);
            self.increment(idx);
        }
    }

    /// Removes a key, decrementing one counter per hash function.
    ///
    /// The key must have been added before; see the crate docs.
    pub fn del(&mut self, key: &[u8]) {
        for i in 0..self.funcs.len() {
            let idx = self.index(i, key);
            self.decrement(idx);
        }
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not** in the set.
    #[must_use]
    pub fn check(&self, key: &[u8]) -> bool {
        (0..self.funcs.len()).all(|i| self.counter(self.index(i, key)) != 0)
    }

    /// Returns the number of counters in the filter.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of hash functions.
    #[must_use]
    pub fn num_funcs(&self) -> usize {
        self.funcs.len()
    }

    /// Returns the value of counter `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= size`.
    #[must_use]
    pub fn counter(&self, idx: usize) -> u8 {
        assert!(idx < self.size, "counter index {} out of range", idx);
        let byte = self.counters[idx / 2];
        (byte >> Self::shift(idx)) & COUNTER_MAX
    }

    // ---- Internal helpers ----

    fn index(&self, func: usize, key: &[u8]) -> usize {
        (self.funcs[func])(key) as usize % self.size
    }

    fn shift(idx: usize) -> usize {
        (idx % 2) * COUNTER_BITS
    }

    fn store(&mut self, idx: usize, value: u8) {
        let shift = Self::shift(idx);
        let byte = &mut self.counters[idx / 2];
        *byte = (*byte & !(COUNTER_MAX << shift)) | ((value & COUNTER_MAX) << shift);
    }

    fn increment(&mut self, idx: usize) {
        let current = self.counter(idx);
        if current < COUNTER_MAX {
            self.store(idx, current + 1);
        }
    }

    fn decrement(&mut self, idx: usize) {
        let current = self.counter(idx);
        if current > 0 {
            self.store(idx, current - 1);
        }
    }
}

impl std::fmt::Debug for CountingBloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountingBloomFilter")
            .field("size", &self.size)
            .field("num_funcs", &self.funcs.len())
            .field("bytes", &self.counters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests;
