use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, StatfileError};
use crate::format::{
    blocks_for_size, Header, Section, BLOCK_BYTES, MIN_FILE_BYTES, SECTION_COMMON,
};
use crate::now_secs;

/// Number of zero blocks written per buffered chunk.
const BLOCKS_PER_CHUNK: u64 = 256;

/// Lays out new, zero-filled statfiles on disk.
///
/// Like the reader side, the writer is stateless: all work happens in
/// [`create`](StatfileWriter::create).
pub struct StatfileWriter {}

impl StatfileWriter {
    /// Creates (or truncates) the statfile at `path` sized for `size` bytes
    /// and returns the number of blocks in its single `common` section.
    ///
    /// The file gets a current-version header, one section header and
    /// `(size - header - section) / block` zero blocks, written in chunks of
    /// 256 blocks. The file is fsynced but not mapped. Permissions are `0600`.
    ///
    /// # Errors
    ///
    /// Returns [`StatfileError::TooSmall`] if `size` cannot hold a header, a
    /// section and one block, or an I/O error.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<u64> {
        let path = path.as_ref();
        if size < MIN_FILE_BYTES as u64 {
            return Err(StatfileError::TooSmall {
                path: path.to_path_buf(),
                len: size,
            });
        }

        let nblocks = blocks_for_size(size);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        let mut w = BufWriter::new(file);

        Header::new(nblocks, now_secs()).write_to(&mut w)?;
        Section {
            code: SECTION_COMMON,
            length: nblocks,
        }
        .write_to(&mut w)?;

        let chunk = vec![0u8; BLOCK_BYTES * BLOCKS_PER_CHUNK as usize];
        let mut remaining = nblocks;
        while remaining > 0 {
            let n = remaining.min(BLOCKS_PER_CHUNK);
            w.write_all(&chunk[..n as usize * BLOCK_BYTES])?;
            remaining -= n;
        }

        let file = w.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        debug!(path = %path.display(), blocks = nblocks, "created statfile");
        Ok(nblocks)
    }
}
