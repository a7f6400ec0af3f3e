use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use memmap2::{Advice, MmapMut};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{Result, StatfileError};
use crate::format::{
    Block, Header, HeaderField, Section, BLOCK_BYTES, CHAIN_LENGTH, FIRST_BLOCK_OFFSET,
    HEADER_BYTES, LEGACY_VERSION, MIN_FILE_BYTES, SECTION_BYTES, STATFILE_MAGIC,
    STATFILE_VERSION,
};
use crate::now_secs;

/// Guard giving exclusive access to one mapped statfile.
pub type StatfileGuard<'a> = MutexGuard<'a, MappedFile>;

/// Result of a [`MappedFile::set_block`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetOutcome {
    /// The hash pair was already stored; its value was overwritten.
    Updated,
    /// An empty slot in the chain was claimed.
    Inserted,
    /// The chain was full; the returned block was replaced.
    Evicted(Block),
}

/// A shared, lockable statfile handle.
///
/// The mapping itself lives in a [`MappedFile`] behind a per-file mutex.
/// Every block access goes through [`lock`](Statfile::lock); the guard
/// releases the lock when dropped.
pub struct Statfile {
    path: PathBuf,
    open_time: u64,
    inner: Mutex<MappedFile>,
}

impl Statfile {
    /// Opens, maps and validates the statfile at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(MappedFile::open(path)?))
    }

    /// Wraps an already mapped file.
    pub fn new(mapped: MappedFile) -> Self {
        Self {
            path: mapped.path.clone(),
            open_time: now_secs(),
            inner: Mutex::new(mapped),
        }
    }

    /// Acquires the per-file lock.
    pub fn lock(&self) -> StatfileGuard<'_> {
        self.inner.lock()
    }

    /// Path the statfile was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unix time (seconds) at which the handle was opened.
    #[must_use]
    pub fn open_time(&self) -> u64 {
        self.open_time
    }
}

impl std::fmt::Debug for Statfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statfile")
            .field("path", &self.path)
            .field("open_time", &self.open_time)
            .finish()
    }
}

/// A statfile mapped read/write into memory.
///
/// Holds the descriptor, the mapping (absent once closed), the active section
/// and the cursor to its first block.
pub struct MappedFile {
    path: PathBuf,
    file: File,
    map: Option<MmapMut>,
    /// Mapped length in bytes.
    len: usize,
    /// Offset of the first block of the active section.
    seek_pos: usize,
    cur_section: Section,
    /// Unix time of the last block access.
    access_time: u64,
}

impl MappedFile {
    /// Opens `path` read/write, maps it and validates its layout.
    ///
    /// # Errors
    ///
    /// Fails closed on any I/O error, a file shorter than
    /// [`MIN_FILE_BYTES`], a bad magic, an unknown version or a truncated or
    /// empty first section.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();

        if file_len < MIN_FILE_BYTES as u64 {
            info!(path = %path.display(), len = file_len, "file is too short to be a statfile");
            return Err(StatfileError::TooSmall {
                path,
                len: file_len,
            });
        }

        // SAFETY: the mapping is owned by this handle and only accessed
        // through bounds-checked slices. Concurrent writers in other
        // processes are not coordinated, same as any shared statfile.
        let map = unsafe { MmapMut::map_mut(&file)? };

        let mut mapped = Self {
            path,
            file,
            len: map.len(),
            map: Some(map),
            seek_pos: FIRST_BLOCK_OFFSET,
            cur_section: Section { code: 0, length: 0 },
            access_time: now_secs(),
        };
        mapped.validate()?;
        Ok(mapped)
    }

    /// Checks magic and version, upgrades a legacy 1.0 header, verifies that
    /// the first section fits in the file and moves the cursor to it.
    pub fn validate(&mut self) -> Result<()> {
        let path = self.path.clone();
        let len = self.len;
        let map = self.map_mut()?;

        if len < MIN_FILE_BYTES {
            return Err(StatfileError::TooSmall {
                path,
                len: len as u64,
            });
        }

        let header = Header::decode(map)?;
        if header.magic != STATFILE_MAGIC {
            info!(path = %path.display(), "file is not a statfile");
            return Err(StatfileError::BadMagic { path });
        }

        if header.version == LEGACY_VERSION {
            upgrade_legacy(map, &path);
        } else if header.version != STATFILE_VERSION {
            let [major, minor] = header.version;
            info!(path = %path.display(), major, minor, "statfile has invalid version");
            return Err(StatfileError::UnknownVersion { path, major, minor });
        }

        let section = Section::decode_at(map, HEADER_BYTES).ok_or(StatfileError::TooSmall {
            path: path.clone(),
            len: len as u64,
        })?;
        if section.length == 0 {
            return Err(StatfileError::EmptySection { path });
        }
        let have = (len - FIRST_BLOCK_OFFSET) as u64;
        let need = section.length.saturating_mul(BLOCK_BYTES as u64);
        if need > have {
            info!(path = %path.display(), need, have, "statfile is truncated");
            return Err(StatfileError::Truncated { path, need, have });
        }

        self.cur_section = section;
        self.seek_pos = FIRST_BLOCK_OFFSET;
        Ok(())
    }

    // -------------------- Blocks --------------------

    /// Looks up the value stored for `(h1, h2)` in the active section.
    ///
    /// Probes at most [`CHAIN_LENGTH`] blocks starting at
    /// `h1 % section.length`, stopping at the section end. Returns `0.0` when
    /// the pair is absent or the handle is closed.
    pub fn get_block(&mut self, h1: u32, h2: u32) -> f64 {
        self.access_time = now_secs();
        let Some(map) = self.map.as_ref() else {
            return 0.0;
        };

        let (bucket, chain) = self.chain_bounds(h1);
        for i in 0..chain {
            let block = Block::decode_at(map, self.block_offset(bucket + i));
            if block.hash1 == h1 && block.hash2 == h2 {
                return block.value;
            }
        }
        0.0
    }

    /// Stores `value` for `(h1, h2)` in the active section.
    ///
    /// Probes the same chain as [`get_block`](Self::get_block): an exact match
    /// is overwritten in place, otherwise the first empty slot is claimed
    /// (incrementing the used-block counter). When the chain holds neither,
    /// the block with the smallest value seen is evicted; ties keep the first
    /// one encountered.
    ///
    /// # Errors
    ///
    /// Returns [`StatfileError::Closed`] if the mapping was released.
    pub fn set_block(&mut self, h1: u32, h2: u32, value: f64) -> Result<SetOutcome> {
        self.access_time = now_secs();
        self.store_block(h1, h2, value)
    }

    /// [`set_block`](Self::set_block) without touching the access time.
    pub(crate) fn store_block(&mut self, h1: u32, h2: u32, value: f64) -> Result<SetOutcome> {
        let (bucket, chain) = self.chain_bounds(h1);
        let offsets: Vec<usize> = (0..chain).map(|i| self.block_offset(bucket + i)).collect();
        let first = self.block_offset(bucket);
        let path = self.path.clone();
        let map = self.map_mut()?;

        let new_block = Block {
            hash1: h1,
            hash2: h2,
            value,
        };
        let mut to_expire: Option<(usize, Block)> = None;
        let mut min = f64::MAX;

        for &off in &offsets {
            let block = Block::decode_at(map, off);
            if block.hash1 == h1 && block.hash2 == h2 {
                Block::encode_value_at(map, off, value);
                return Ok(SetOutcome::Updated);
            }
            if block.is_empty() {
                new_block.encode_at(map, off);
                let used = HeaderField::UsedBlocks.read(map);
                HeaderField::UsedBlocks.write(map, used.saturating_add(1));
                return Ok(SetOutcome::Inserted);
            }
            if block.value < min {
                min = block.value;
                to_expire = Some((off, block));
            }
        }

        if offsets.len() < CHAIN_LENGTH {
            info!(path = %path.display(), bucket, "chain is full in statfile, starting expire");
        }

        let (off, victim) = match to_expire {
            Some(found) => found,
            None => (first, Block::decode_at(map, first)),
        };
        debug!(
            path = %path.display(),
            bucket,
            evicted_h1 = victim.hash1,
            evicted_h2 = victim.hash2,
            "expired block"
        );
        new_block.encode_at(map, off);
        Ok(SetOutcome::Evicted(victim))
    }

    /// First bucket for `h1` and how many blocks the chain may span.
    fn chain_bounds(&self, h1: u32) -> (usize, usize) {
        let length = self.cur_section.length;
        let bucket = (u64::from(h1) % length) as usize;
        let left = length as usize - bucket;
        (bucket, left.min(CHAIN_LENGTH))
    }

    fn block_offset(&self, idx: usize) -> usize {
        self.seek_pos + idx * BLOCK_BYTES
    }

    // -------------------- Sections --------------------

    /// Code of the active section.
    #[must_use]
    pub fn get_section(&self) -> u64 {
        self.cur_section.code
    }

    /// The active section header.
    #[must_use]
    pub fn current_section(&self) -> Section {
        self.cur_section
    }

    /// Makes the section with `code` active.
    ///
    /// Scans the section table from the first section when `from_begin`,
    /// otherwise from the active one. Returns `false` if no complete section
    /// with that code exists (the active section is left unchanged).
    pub fn set_section(&mut self, code: u64, from_begin: bool) -> bool {
        let Some(map) = self.map.as_ref() else {
            return false;
        };

        let start = if from_begin {
            HEADER_BYTES
        } else {
            self.seek_pos - SECTION_BYTES
        };

        for (off, sec) in SectionWalk::new(map, start) {
            if sec.code == code {
                if sec.length == 0 {
                    warn!(path = %self.path.display(), code, "refusing empty section");
                    return false;
                }
                self.cur_section = sec;
                self.seek_pos = off + SECTION_BYTES;
                return true;
            }
        }
        false
    }

    /// Lists every complete section of the file in on-disk order.
    #[must_use]
    pub fn sections(&self) -> Vec<Section> {
        match self.map.as_ref() {
            Some(map) => SectionWalk::new(map, HEADER_BYTES)
                .map(|(_, sec)| sec)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Appends a section of `length` zero blocks with the given `code`.
    ///
    /// The section header is written at the end of the file, the file is
    /// grown, synced and remapped. The caller holds the file lock for the
    /// whole operation, so the section only becomes visible once the new
    /// mapping is in place. The active section is unchanged.
    pub fn add_section(&mut self, code: u64, length: u64) -> Result<()> {
        if length == 0 {
            return Err(StatfileError::InvalidSection { code });
        }
        self.map()?;

        let blocks_bytes = Section { code, length }
            .blocks_bytes()
            .ok_or(StatfileError::InvalidSection { code })?;
        let old_len = self.len as u64;
        let new_len = old_len + SECTION_BYTES as u64 + blocks_bytes as u64;

        let mut raw = Vec::with_capacity(SECTION_BYTES);
        Section { code, length }.write_to(&mut raw)?;
        self.file.write_all_at(&raw, old_len)?;
        self.file.set_len(new_len)?;

        // Drop the old mapping before remapping the grown file.
        self.map = None;
        self.file.sync_all()?;
        // SAFETY: see `open`; the file was just grown by this handle.
        let map = unsafe { MmapMut::map_mut(&self.file)? };
        self.len = map.len();
        self.map = Some(map);

        debug!(path = %self.path.display(), code, length, "added section");
        Ok(())
    }

    // -------------------- Header bookkeeping --------------------

    /// Returns `(revision, revision_time)`.
    pub fn revision(&self) -> Result<(u64, u64)> {
        let map = self.map()?;
        Ok((
            HeaderField::Revision.read(map),
            HeaderField::RevTime.read(map),
        ))
    }

    /// Overwrites the revision and its timestamp.
    pub fn set_revision(&mut self, revision: u64, time: u64) -> Result<()> {
        let map = self.map_mut()?;
        HeaderField::Revision.write(map, revision);
        HeaderField::RevTime.write(map, time);
        Ok(())
    }

    /// Increments the revision and returns the new value.
    pub fn inc_revision(&mut self) -> Result<u64> {
        let map = self.map_mut()?;
        let revision = HeaderField::Revision.read(map).wrapping_add(1);
        HeaderField::Revision.write(map, revision);
        Ok(revision)
    }

    /// Number of claimed blocks recorded in the header.
    pub fn used_blocks(&self) -> Result<u64> {
        Ok(HeaderField::UsedBlocks.read(self.map()?))
    }

    /// Total number of blocks recorded in the header.
    ///
    /// Old headers carry zero here; it is repaired to the active section
    /// length on first read.
    pub fn total_blocks(&mut self) -> Result<u64> {
        let length = self.cur_section.length;
        let map = self.map_mut()?;
        let total = HeaderField::TotalBlocks.read(map);
        if total == 0 {
            HeaderField::TotalBlocks.write(map, length);
            return Ok(length);
        }
        Ok(total)
    }

    /// Unix time at which the file was created.
    pub fn create_time(&self) -> Result<u64> {
        Ok(HeaderField::CreateTime.read(self.map()?))
    }

    // -------------------- Mapping management --------------------

    /// Hints the kernel that the mapping will be read sequentially.
    pub fn advise_sequential(&self) -> Result<()> {
        self.map()?.advise(Advice::Sequential)?;
        Ok(())
    }

    /// Pins the mapped pages in RAM (`mlock`).
    pub fn lock_pages(&self) -> Result<()> {
        self.map()?.lock()?;
        Ok(())
    }

    /// Touches every page of the mapping once to pull it into the page cache.
    pub fn preload(&self) {
        let Some(map) = self.map.as_ref() else {
            return;
        };
        let page = page_size();
        let mut acc = 0u8;
        for off in (0..map.len()).step_by(page) {
            acc = acc.wrapping_add(std::hint::black_box(map[off]));
        }
        std::hint::black_box(acc);
    }

    /// Schedules write-back of dirty pages without waiting (`MS_ASYNC`).
    pub fn flush_async(&self) -> Result<()> {
        self.map()?.flush_async()?;
        Ok(())
    }

    /// Flushes asynchronously and releases the mapping.
    ///
    /// Later block reads return `0.0` and other operations fail with
    /// [`StatfileError::Closed`]. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(map) = self.map.take() {
            info!(path = %self.path.display(), "syncing statfile");
            if let Err(e) = map.flush_async() {
                warn!(path = %self.path.display(), error = %e, "cannot sync statfile");
            }
        }
    }

    /// `true` while the mapping is held.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.map.is_some()
    }

    /// Mapped length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unix time of the last block access.
    #[must_use]
    pub fn access_time(&self) -> u64 {
        self.access_time
    }

    fn map(&self) -> Result<&MmapMut> {
        self.map.as_ref().ok_or_else(|| StatfileError::Closed {
            path: self.path.clone(),
        })
    }

    fn map_mut(&mut self) -> Result<&mut MmapMut> {
        match self.map.as_mut() {
            Some(map) => Ok(map),
            None => Err(StatfileError::Closed {
                path: self.path.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("mapped", &self.map.is_some())
            .field("section", &self.cur_section)
            .field("seek_pos", &self.seek_pos)
            .field("access_time", &self.access_time)
            .finish()
    }
}

/// Iterates `(offset, section)` pairs from `start`, stopping at the first
/// section whose blocks do not fit in the buffer.
///
/// `start` is the offset of a section header, normally [`HEADER_BYTES`].
pub(crate) struct SectionWalk<'a> {
    buf: &'a [u8],
    off: Option<usize>,
}

impl<'a> SectionWalk<'a> {
    pub(crate) fn new(buf: &'a [u8], start: usize) -> Self {
        Self {
            buf,
            off: Some(start),
        }
    }
}

impl Iterator for SectionWalk<'_> {
    type Item = (usize, Section);

    fn next(&mut self) -> Option<Self::Item> {
        let off = self.off.take()?;
        let sec = Section::decode_at(self.buf, off)?;
        let end = sec
            .blocks_bytes()
            .and_then(|bytes| (off + SECTION_BYTES).checked_add(bytes))?;
        if end > self.buf.len() {
            return None;
        }
        self.off = Some(end);
        Some((off, sec))
    }
}

/// Rewrites a legacy 1.0 header as a current one.
///
/// The revision fields did not exist in 1.0: they are zeroed, the used-block
/// counter is recounted from the first section and the total is set to that
/// section's length.
fn upgrade_legacy(map: &mut [u8], path: &Path) {
    info!(path = %path.display(), "converting statfile from version 1.0");

    let view: &[u8] = map;
    let (length, used) = match Section::decode_at(view, HEADER_BYTES) {
        Some(sec) => {
            let avail = (view.len() - FIRST_BLOCK_OFFSET) / BLOCK_BYTES;
            let count = avail.min(usize::try_from(sec.length).unwrap_or(usize::MAX));
            let used = (0..count)
                .filter(|&i| !Block::decode_at(view, FIRST_BLOCK_OFFSET + i * BLOCK_BYTES).is_empty())
                .count() as u64;
            (sec.length, used)
        }
        None => (0, 0),
    };

    Header::write_version(map, STATFILE_VERSION);
    HeaderField::Revision.write(map, 0);
    HeaderField::RevTime.write(map, 0);
    HeaderField::UsedBlocks.write(map, used);
    HeaderField::TotalBlocks.write(map, length);
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}
