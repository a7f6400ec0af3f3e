//! Classic 32-bit string hash functions used to index the filter.
//!
//! All functions consume the key byte by byte with wrapping arithmetic. They
//! are cheap rather than strong; using several of them together is what
//! keeps the false positive rate down.

use crate::HashFn;

/// The standard hash set, in the order [`CountingBloomFilter::with_default_hashes`]
/// picks from.
///
/// [`CountingBloomFilter::with_default_hashes`]: crate::CountingBloomFilter::with_default_hashes
pub const DEFAULT_HASHES: [HashFn; 8] = [
    sax_hash, sdbm_hash, fnv_hash, rs_hash, js_hash, elf_hash, bkdr_hash, ap_hash,
];

/// Shift-add-xor hash.
pub fn sax_hash(key: &[u8]) -> u32 {
    key.iter().fold(0u32, |h, &b| {
        h ^ (h << 5).wrapping_add(h >> 2).wrapping_add(b as u32)
    })
}

/// SDBM hash.
pub fn sdbm_hash(key: &[u8]) -> u32 {
    key.iter().fold(0u32, |h, &b| {
        (b as u32)
            .wrapping_add(h << 6)
            .wrapping_add(h << 16)
            .wrapping_sub(h)
    })
}

/// FNV-style hash with the prime multiplication unrolled into shifts.
pub fn fnv_hash(key: &[u8]) -> u32 {
    key.iter().fold(0u32, |h, &b| {
        let h = h ^ b as u32;
        h.wrapping_add(h << 1)
            .wrapping_add(h << 4)
            .wrapping_add(h << 7)
            .wrapping_add(h << 8)
            .wrapping_add(h << 24)
    })
}

/// Robert Sedgewick's hash.
pub fn rs_hash(key: &[u8]) -> u32 {
    const B: u32 = 378_551;
    let mut a: u32 = 63_689;
    let mut hash: u32 = 0;
    for &byte in key {
        hash = hash.wrapping_mul(a).wrapping_add(byte as u32);
        a = a.wrapping_mul(B);
    }
    hash
}

/// Justin Sobel's hash.
pub fn js_hash(key: &[u8]) -> u32 {
    key.iter().fold(1_315_423_911u32, |h, &b| {
        h ^ (h << 5).wrapping_add(b as u32).wrapping_add(h >> 2)
    })
}

/// ELF object file hash.
pub fn elf_hash(key: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &byte in key {
        hash = (hash << 4).wrapping_add(byte as u32);
        let x = hash & 0xF000_0000;
        if x != 0 {
            hash ^= x >> 24;
        }
        hash &= !x;
    }
    hash
}

/// Kernighan & Ritchie's hash with seed 131.
pub fn bkdr_hash(key: &[u8]) -> u32 {
    const SEED: u32 = 131;
    key.iter()
        .fold(0u32, |h, &b| h.wrapping_mul(SEED).wrapping_add(b as u32))
}

/// Arash Partow's hash.
///
/// Every byte goes through the even-position mixing step; the odd-position
/// step of the textbook variant is never taken, so filters built by older
/// releases keep their bit positions.
pub fn ap_hash(key: &[u8]) -> u32 {
    key.iter().fold(0xAAAA_AAAAu32, |hash, &byte| {
        hash ^ ((hash << 7) ^ (byte as u32).wrapping_mul(hash >> 3))
    })
}
