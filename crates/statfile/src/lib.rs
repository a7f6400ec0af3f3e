//! # Statfile - memory-mapped token statistics
//!
//! A statfile stores per-token weights for a statistical classifier as a
//! flat, hash-indexed array of fixed-size blocks. The whole file stays mapped
//! read/write for its lifetime so lookups and updates touch the mapped pages
//! directly.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ HEADER (288 bytes)                                             │
//! │                                                               │
//! │ magic "rsd" | version "12" | padding                           │
//! │ create_time | revision | rev_time | used_blocks | total_blocks │
//! │ reserved (239) | align (1)                                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ SECTION code (u64) | length in blocks (u64)                    │
//! ├───────────────────────────────────────────────────────────────┤
//! │ BLOCKS  hash1 (u32) | hash2 (u32) | value (f64)                │
//! │ ... `length` blocks ...                                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │ SECTION / BLOCKS ... (appended with `add_section`)             │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All fields are little-endian and encoded through [`format`].
//!
//! ## Lookups
//!
//! A pair `(h1, h2)` lives in the chain starting at block `h1 % length` of the
//! active section. Chains are at most [`CHAIN_LENGTH`] blocks long and never
//! cross the end of the section. When an insert finds the chain full, the
//! block with the smallest value is replaced.
//!
//! ## Version history
//!
//! | Version | Bytes      | Notes                                             |
//! |---------|------------|---------------------------------------------------|
//! | 1.0     | `01 00`    | No revision fields; upgraded in place on open     |
//! | 1.2     | `"12"`     | Current: revision, rev_time, used/total counters  |

mod error;
mod file;
pub mod format;
mod writer;

use std::time::{SystemTime, UNIX_EPOCH};

pub use error::{Result, StatfileError};
pub use file::{MappedFile, SetOutcome, Statfile, StatfileGuard};
pub use format::{
    blocks_for_size, section_code_by_name, section_name, Block, Header, Section, BLOCK_BYTES,
    CHAIN_LENGTH, HEADER_BYTES, MIN_FILE_BYTES, SECTION_BYTES, SECTION_COMMON, SECTION_HEADERS,
    SECTION_REGEXP, SECTION_URLS,
};
pub use writer::StatfileWriter;

/// Current Unix time in seconds (0 if the clock is before the epoch).
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests;
