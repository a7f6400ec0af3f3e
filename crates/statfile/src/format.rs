//! Statfile binary format: constants and explicit encode/decode routines.
//!
//! ## Header (288 bytes)
//!
//! ```text
//! [magic: 3 "rsd"][version: 2 "12"][padding: 3]
//! [create_time: u64][revision: u64][rev_time: u64]
//! [used_blocks: u64][total_blocks: u64]
//! [reserved: 239][align: 1]
//! ```
//!
//! ## Section header (16 bytes)
//!
//! ```text
//! [code: u64][length_in_blocks: u64]
//! ```
//!
//! ## Block (16 bytes)
//!
//! ```text
//! [hash1: u32][hash2: u32][value: f64]
//! ```
//!
//! All integers and floats are little-endian. Nothing is ever read by
//! overlaying a struct on the mapping: every field goes through the
//! bounds-checked helpers below.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::{self, Result as IoResult, Write};

/// Signature at the start of every statfile (ASCII "rsd").
pub const STATFILE_MAGIC: [u8; 3] = *b"rsd";

/// Current format version (ASCII "12").
pub const STATFILE_VERSION: [u8; 2] = *b"12";

/// Version bytes of the legacy 1.0 format, upgraded in place on open.
pub const LEGACY_VERSION: [u8; 2] = [1, 0];

/// Size of the file header in bytes.
pub const HEADER_BYTES: usize = 288;

/// Reserved bytes at the end of the header.
pub const RESERVED_BYTES: usize = 239;

/// Size of a section header in bytes: 8 (`code`) + 8 (`length`).
pub const SECTION_BYTES: usize = 8 + 8;

/// Size of a block in bytes: 4 (`hash1`) + 4 (`hash2`) + 8 (`value`).
pub const BLOCK_BYTES: usize = 4 + 4 + 8;

/// Offset of the first block of the first section.
pub const FIRST_BLOCK_OFFSET: usize = HEADER_BYTES + SECTION_BYTES;

/// Smallest file that can carry any statistics: header, section and one block.
pub const MIN_FILE_BYTES: usize = HEADER_BYTES + SECTION_BYTES + BLOCK_BYTES;

/// Maximum number of consecutive blocks probed for one hash.
pub const CHAIN_LENGTH: usize = 128;

/// Section holding the general token statistics.
pub const SECTION_COMMON: u64 = 1;
/// Section holding statistics for message headers.
pub const SECTION_HEADERS: u64 = 2;
/// Section holding statistics for URLs.
pub const SECTION_URLS: u64 = 3;
/// Section holding statistics for regexp matches.
pub const SECTION_REGEXP: u64 = 4;

/// Maps a section name (`common`, `header`, `url`, `regexp`, any case) to its
/// code.
pub fn section_code_by_name(name: &str) -> Option<u64> {
    match name.to_ascii_lowercase().as_str() {
        "common" => Some(SECTION_COMMON),
        "header" => Some(SECTION_HEADERS),
        "url" => Some(SECTION_URLS),
        "regexp" => Some(SECTION_REGEXP),
        _ => None,
    }
}

/// Name of a well-known section code, if it has one.
pub fn section_name(code: u64) -> Option<&'static str> {
    match code {
        SECTION_COMMON => Some("common"),
        SECTION_HEADERS => Some("header"),
        SECTION_URLS => Some("url"),
        SECTION_REGEXP => Some("regexp"),
        _ => None,
    }
}

/// Number of blocks a file of `size` bytes holds in its single section.
///
/// Returns 0 when `size` cannot even hold the header and section.
pub fn blocks_for_size(size: u64) -> u64 {
    size.saturating_sub(FIRST_BLOCK_OFFSET as u64) / BLOCK_BYTES as u64
}

/// Numeric header fields that are read and updated in place on the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    CreateTime,
    Revision,
    RevTime,
    UsedBlocks,
    TotalBlocks,
}

impl HeaderField {
    /// Byte offset of the field inside the header.
    #[must_use]
    pub fn offset(self) -> usize {
        match self {
            HeaderField::CreateTime => 8,
            HeaderField::Revision => 16,
            HeaderField::RevTime => 24,
            HeaderField::UsedBlocks => 32,
            HeaderField::TotalBlocks => 40,
        }
    }

    /// Reads the field from a buffer starting with a header.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than the field end.
    #[must_use]
    pub fn read(self, buf: &[u8]) -> u64 {
        let off = self.offset();
        LittleEndian::read_u64(&buf[off..off + 8])
    }

    /// Writes the field into a buffer starting with a header.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than the field end.
    pub fn write(self, buf: &mut [u8], value: u64) {
        let off = self.offset();
        LittleEndian::write_u64(&mut buf[off..off + 8], value);
    }
}

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 3;
const OFF_RESERVED: usize = 48;

/// Decoded statfile header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 3],
    pub version: [u8; 2],
    pub create_time: u64,
    pub revision: u64,
    pub rev_time: u64,
    pub used_blocks: u64,
    pub total_blocks: u64,
}

impl Header {
    /// A fresh current-version header for a file of `total_blocks` blocks.
    #[must_use]
    pub fn new(total_blocks: u64, create_time: u64) -> Self {
        Self {
            magic: STATFILE_MAGIC,
            version: STATFILE_VERSION,
            create_time,
            revision: 0,
            rev_time: 0,
            used_blocks: 0,
            total_blocks,
        }
    }

    /// Decodes a header from the first [`HEADER_BYTES`] of `buf`.
    ///
    /// Only the length is checked here; magic and version are checked by the
    /// caller so that it can decide how to treat legacy files.
    pub fn decode(buf: &[u8]) -> IoResult<Self> {
        if buf.len() < HEADER_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("buffer too small for statfile header: {} bytes", buf.len()),
            ));
        }

        let mut magic = [0u8; 3];
        magic.copy_from_slice(&buf[OFF_MAGIC..OFF_MAGIC + 3]);
        let mut version = [0u8; 2];
        version.copy_from_slice(&buf[OFF_VERSION..OFF_VERSION + 2]);

        Ok(Self {
            magic,
            version,
            create_time: HeaderField::CreateTime.read(buf),
            revision: HeaderField::Revision.read(buf),
            rev_time: HeaderField::RevTime.read(buf),
            used_blocks: HeaderField::UsedBlocks.read(buf),
            total_blocks: HeaderField::TotalBlocks.read(buf),
        })
    }

    /// Encodes the header; padding and reserved bytes are zero.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut buf = [0u8; HEADER_BYTES];
        buf[OFF_MAGIC..OFF_MAGIC + 3].copy_from_slice(&self.magic);
        buf[OFF_VERSION..OFF_VERSION + 2].copy_from_slice(&self.version);
        HeaderField::CreateTime.write(&mut buf, self.create_time);
        HeaderField::Revision.write(&mut buf, self.revision);
        HeaderField::RevTime.write(&mut buf, self.rev_time);
        HeaderField::UsedBlocks.write(&mut buf, self.used_blocks);
        HeaderField::TotalBlocks.write(&mut buf, self.total_blocks);
        debug_assert!(buf[OFF_RESERVED..OFF_RESERVED + RESERVED_BYTES]
            .iter()
            .all(|&b| b == 0));
        buf
    }

    /// Overwrites the version bytes of an encoded header in place.
    pub fn write_version(buf: &mut [u8], version: [u8; 2]) {
        buf[OFF_VERSION..OFF_VERSION + 2].copy_from_slice(&version);
    }

    /// Writes the encoded header to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> IoResult<()> {
        w.write_all(&self.encode())
    }
}

/// A section header: numeric code and length in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub code: u64,
    pub length: u64,
}

impl Section {
    /// Decodes a section header at `offset` in `buf`.
    ///
    /// Returns `None` if fewer than [`SECTION_BYTES`] bytes remain.
    #[must_use]
    pub fn decode_at(buf: &[u8], offset: usize) -> Option<Self> {
        let raw = buf.get(offset..offset.checked_add(SECTION_BYTES)?)?;
        Some(Self {
            code: LittleEndian::read_u64(&raw[0..8]),
            length: LittleEndian::read_u64(&raw[8..16]),
        })
    }

    /// Byte size of the block array that follows this header, if it fits in
    /// a `usize`.
    #[must_use]
    pub fn blocks_bytes(&self) -> Option<usize> {
        usize::try_from(self.length)
            .ok()?
            .checked_mul(BLOCK_BYTES)
    }

    /// Writes the section header to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> IoResult<()> {
        w.write_u64::<LittleEndian>(self.code)?;
        w.write_u64::<LittleEndian>(self.length)?;
        Ok(())
    }
}

/// A stored `(hash1, hash2, value)` triple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Block {
    pub hash1: u32,
    pub hash2: u32,
    pub value: f64,
}

impl Block {
    /// An all-zero, unclaimed block.
    pub const EMPTY: Block = Block {
        hash1: 0,
        hash2: 0,
        value: 0.0,
    };

    /// `true` if the slot has never been claimed (`hash1 == 0 && hash2 == 0`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hash1 == 0 && self.hash2 == 0
    }

    /// Decodes the block at `offset` in `buf`.
    ///
    /// # Panics
    ///
    /// Panics if the block does not fit in `buf`.
    #[must_use]
    pub fn decode_at(buf: &[u8], offset: usize) -> Self {
        let raw = &buf[offset..offset + BLOCK_BYTES];
        Self {
            hash1: LittleEndian::read_u32(&raw[0..4]),
            hash2: LittleEndian::read_u32(&raw[4..8]),
            value: LittleEndian::read_f64(&raw[8..16]),
        }
    }

    /// Encodes the block at `offset` in `buf`.
    ///
    /// # Panics
    ///
    /// Panics if the block does not fit in `buf`.
    pub fn encode_at(&self, buf: &mut [u8], offset: usize) {
        let raw = &mut buf[offset..offset + BLOCK_BYTES];
        LittleEndian::write_u32(&mut raw[0..4], self.hash1);
        LittleEndian::write_u32(&mut raw[4..8], self.hash2);
        LittleEndian::write_f64(&mut raw[8..16], self.value);
    }

    /// Overwrites only the value of the block at `offset`.
    pub fn encode_value_at(buf: &mut [u8], offset: usize, value: f64) {
        LittleEndian::write_f64(&mut buf[offset + 8..offset + BLOCK_BYTES], value);
    }

    /// Writes the block to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> IoResult<()> {
        w.write_u32::<LittleEndian>(self.hash1)?;
        w.write_u32::<LittleEndian>(self.hash2)?;
        w.write_f64::<LittleEndian>(self.value)?;
        Ok(())
    }
}
