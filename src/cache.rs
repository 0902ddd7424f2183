//! # Memory-Mapped Cache Store Module
//!
//! A bounded, file-backed store for opaque IR payloads keyed by a
//! content-hash string. The backing file is fixed at 100 MiB and laid out
//! as a 32-byte header, a table of 1024 fixed-size slots, and a
//! bump-allocated data region:
//!
//! ```text
//! ┌────────┬──────────────────────────────┬──────────────────────────┐
//! │ header │ slot table (1024 × 532 B)    │ data region (bump alloc) │
//! │  32 B  │                              │       next_offset ──▶    │
//! └────────┴──────────────────────────────┴──────────────────────────┘
//! ```
//!
//! Every payload carries a djb2-style checksum that is recomputed on read,
//! so a flipped byte in the data region surfaces as a miss rather than as
//! corrupt IR handed to a compiler. Removal only frees the slot; the bytes
//! stay behind as a hole until compaction slides live payloads down.
//!
//! The store persists across server restarts: on open, a header with the
//! expected magic and version is trusted as-is, anything else is
//! reinitialized. One process-local mutex serializes all public operations;
//! cross-process safety rests on the server being the only writer.

use std::fs::OpenOptions;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::ptr;

use memmap2::MmapMut;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::CacheError;

/// Fixed size of the backing file (100 MiB)
pub const CACHE_FILE_SIZE: u32 = 100 * 1024 * 1024;

/// Number of slots in the entry table
pub const CACHE_MAX_ENTRIES: usize = 1024;

/// Header magic; anything else means "reinitialize"
pub const CACHE_MAGIC: u32 = 0xC4C4_E001;

/// On-disk format version
pub const CACHE_VERSION: u32 = 1;

/// Size of the fixed key and name fields in a slot
const KEY_SIZE: usize = 256;

/// First byte of the bump-allocated data region
pub const DATA_REGION_START: u32 =
    (size_of::<CacheHeader>() + CACHE_MAX_ENTRIES * size_of::<CacheEntry>()) as u32;

/// File header at offset 0.
#[repr(C)]
struct CacheHeader {
    magic_number: u32,
    version: u32,
    entry_count: u32,
    next_offset: u32,
    _padding: [u8; 16],
}

/// One slot-table entry. `offset` is absolute within the file.
#[repr(C)]
struct CacheEntry {
    /// Reserved for a display name; the store never populates it
    #[allow(dead_code)]
    function_name: [u8; KEY_SIZE],
    /// NUL-terminated content-hash key
    key: [u8; KEY_SIZE],
    length: u32,
    offset: u32,
    is_used: u8,
    _reserved: [u8; 7],
    checksum: u32,
}

// The on-disk layout is load-bearing: 32-byte header, 532-byte entries.
const _: () = assert!(size_of::<CacheHeader>() == 32);
const _: () = assert!(size_of::<CacheEntry>() == 532);

/// djb2-style fold over the payload, with 32-bit wrap.
fn checksum(data: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &b in data {
        h = h.wrapping_shl(5).wrapping_add(h).wrapping_add(u32::from(b));
    }
    h
}

/// Does the NUL-terminated `stored` field hold `key`?
///
/// Keys longer than the field are truncated on write, so the comparison
/// truncates the same way.
fn key_matches(stored: &[u8; KEY_SIZE], key: &str) -> bool {
    let bytes = key.as_bytes();
    let n = bytes.len().min(KEY_SIZE - 1);
    stored[..n] == bytes[..n] && stored[n] == 0
}

struct CacheInner {
    mmap: MmapMut,
    path: PathBuf,
}

impl CacheInner {
    fn header(&self) -> &CacheHeader {
        unsafe { &*(self.mmap.as_ptr() as *const CacheHeader) }
    }

    fn header_mut(&mut self) -> &mut CacheHeader {
        unsafe { &mut *(self.mmap.as_mut_ptr() as *mut CacheHeader) }
    }

    fn entry(&self, index: usize) -> &CacheEntry {
        debug_assert!(index < CACHE_MAX_ENTRIES);
        let off = size_of::<CacheHeader>() + index * size_of::<CacheEntry>();
        unsafe { &*(self.mmap.as_ptr().add(off) as *const CacheEntry) }
    }

    fn entry_mut(&mut self, index: usize) -> &mut CacheEntry {
        debug_assert!(index < CACHE_MAX_ENTRIES);
        let off = size_of::<CacheHeader>() + index * size_of::<CacheEntry>();
        unsafe { &mut *(self.mmap.as_mut_ptr().add(off) as *mut CacheEntry) }
    }

    fn find_entry(&self, key: &str) -> Option<usize> {
        (0..CACHE_MAX_ENTRIES)
            .find(|&i| self.entry(i).is_used != 0 && key_matches(&self.entry(i).key, key))
    }

    fn find_free_entry(&self) -> Option<usize> {
        (0..CACHE_MAX_ENTRIES).find(|&i| self.entry(i).is_used == 0)
    }

    /// Reset the header and zero the slot table; the bump pointer returns to
    /// the start of the data region. Stale data bytes are left in place.
    fn initialize(&mut self) {
        let header = self.header_mut();
        header.magic_number = CACHE_MAGIC;
        header.version = CACHE_VERSION;
        header.entry_count = 0;
        header.next_offset = DATA_REGION_START;
        header._padding = [0; 16];

        let table = &mut self.mmap
            [size_of::<CacheHeader>()..size_of::<CacheHeader>() + CACHE_MAX_ENTRIES * size_of::<CacheEntry>()];
        table.fill(0);
        self.flush();
    }

    /// Slide used payloads down to consecutive offsets starting at the data
    /// region base, reclaiming holes left by removals and overwrites.
    ///
    /// Payloads are relocated in ascending old-offset order so a downward
    /// move can never land on bytes that have not been moved yet. Slot-table
    /// order is untouched; only each entry's `offset` is rewritten.
    fn compact(&mut self) {
        let mut live: Vec<(usize, u32, u32)> = (0..CACHE_MAX_ENTRIES)
            .filter_map(|i| {
                let e = self.entry(i);
                (e.is_used != 0 && e.length > 0).then(|| (i, e.offset, e.length))
            })
            .collect();
        live.sort_unstable_by_key(|&(_, offset, _)| offset);

        let mut write_offset = DATA_REGION_START;
        for (index, offset, length) in live {
            if write_offset != offset {
                self.mmap.copy_within(
                    offset as usize..(offset + length) as usize,
                    write_offset as usize,
                );
                self.entry_mut(index).offset = write_offset;
            }
            write_offset += length;
        }
        self.header_mut().next_offset = write_offset;
        debug!("cache compacted, high-water mark now {}", write_offset);
    }

    fn flush(&self) {
        // Persistence is best-effort per operation; the map itself stays
        // coherent even if the msync fails.
        if let Err(e) = self.mmap.flush() {
            warn!("cache flush failed for {}: {}", self.path.display(), e);
        }
    }
}

/// The server-owned cache store. All public operations hold one internal
/// mutex for their full duration, including the flush on mutating paths.
pub struct CacheStore {
    inner: Mutex<CacheInner>,
}

impl CacheStore {
    /// Open (or create) the backing file at `path`, size it to
    /// [`CACHE_FILE_SIZE`], map it read/write, and validate the header.
    /// A missing or mismatched magic/version reinitializes the store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        file.set_len(u64::from(CACHE_FILE_SIZE))?;

        // Safety: the file was just opened read/write and sized; the server
        // is the only process that maps it mutably.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let mut inner = CacheInner { mmap, path };

        let header = inner.header();
        let header_ok = header.magic_number == CACHE_MAGIC
            && header.version == CACHE_VERSION
            && header.next_offset >= DATA_REGION_START
            && header.next_offset <= CACHE_FILE_SIZE
            && header.entry_count as usize <= CACHE_MAX_ENTRIES;
        if !header_ok {
            debug!(
                "cache header invalid (magic {:#x}, version {}), reinitializing",
                header.magic_number, header.version
            );
            inner.initialize();
        } else {
            debug!(
                "cache opened with {} entries, {} bytes used",
                header.entry_count, header.next_offset
            );
        }

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Store `data` under `key`, overwriting any previous value.
    ///
    /// A same-key put reuses the slot but writes fresh bytes at the bump
    /// pointer; the old bytes become a hole until the next compaction.
    /// Compaction runs automatically when the write would overflow.
    pub fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        if key.is_empty() || data.is_empty() {
            return Err(CacheError::EmptyInput);
        }
        let length = data.len() as u32;
        let mut inner = self.inner.lock();

        let mut available = CACHE_FILE_SIZE - inner.header().next_offset;
        if length > available {
            inner.compact();
            available = CACHE_FILE_SIZE - inner.header().next_offset;
            if length > available {
                warn!(
                    "cache full: {} bytes requested, {} free after compaction",
                    length, available
                );
                return Err(CacheError::Full {
                    needed: length,
                    available,
                });
            }
        }

        let index = match inner.find_entry(key) {
            Some(i) => i,
            None => {
                let i = inner.find_free_entry().ok_or(CacheError::NoFreeSlot)?;
                inner.header_mut().entry_count += 1;
                i
            }
        };

        let offset = inner.header().next_offset;
        {
            let entry = inner.entry_mut(index);
            crate::protocol::write_fixed_str(&mut entry.key, key);
            entry.length = length;
            entry.offset = offset;
            entry.is_used = 1;
            entry.checksum = checksum(data);
        }
        inner.mmap[offset as usize..(offset + length) as usize].copy_from_slice(data);
        inner.header_mut().next_offset = offset + length;

        inner.flush();
        Ok(())
    }

    /// Look up `key` and return a copy of its payload.
    ///
    /// The checksum is recomputed on every hit; a mismatch is logged and
    /// surfaced as a miss, and the entry is left in place.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock();
        let index = inner.find_entry(key)?;
        let entry = inner.entry(index);
        if entry.offset < DATA_REGION_START
            || entry.offset.checked_add(entry.length)? > CACHE_FILE_SIZE
        {
            warn!("entry metadata out of range for key: {}", key);
            return None;
        }
        let data = &inner.mmap[entry.offset as usize..(entry.offset + entry.length) as usize];

        if checksum(data) != entry.checksum {
            warn!("data corruption detected for key: {}", key);
            return None;
        }
        Some(data.to_vec())
    }

    /// Free the slot holding `key`. The payload bytes stay behind until the
    /// next compaction. Returns false if the key is absent.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let index = match inner.find_entry(key) {
            Some(i) => i,
            None => return false,
        };
        unsafe {
            ptr::write_bytes(inner.entry_mut(index) as *mut CacheEntry, 0, 1);
        }
        inner.header_mut().entry_count -= 1;
        inner.flush();
        true
    }

    /// Drop every entry and reset the bump pointer.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.initialize();
    }

    /// Reclaim holes in the data region. Also invoked automatically by
    /// [`CacheStore::put`] when a write would overflow.
    pub fn compact(&self) {
        let mut inner = self.inner.lock();
        inner.compact();
        inner.flush();
    }

    /// Number of used slots.
    pub fn entry_count(&self) -> u32 {
        self.inner.lock().header().entry_count
    }

    /// Current high-water mark of the file, header and slot table included.
    pub fn used_space(&self) -> u32 {
        self.inner.lock().header().next_offset
    }

    /// Bytes still available in the data region.
    pub fn free_space(&self) -> u32 {
        CACHE_FILE_SIZE - self.used_space()
    }

    /// Does the mapped header carry the expected magic and version?
    pub fn is_valid(&self) -> bool {
        let inner = self.inner.lock();
        let header = inner.header();
        header.magic_number == CACHE_MAGIC && header.version == CACHE_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_djb2_fold() {
        assert_eq!(checksum(&[]), 0);
        // h = ((0 << 5) + 0) + 1 = 1; then ((1 << 5) + 1) + 2 = 35
        assert_eq!(checksum(&[1]), 1);
        assert_eq!(checksum(&[1, 2]), 35);
    }

    #[test]
    fn checksum_wraps_instead_of_overflowing() {
        let big = vec![0xFFu8; 4096];
        // Must not panic in debug builds
        let _ = checksum(&big);
    }

    #[test]
    fn key_match_requires_terminator() {
        let mut stored = [0u8; KEY_SIZE];
        stored[..4].copy_from_slice(b"abcd");
        assert!(key_matches(&stored, "abcd"));
        assert!(!key_matches(&stored, "abc"));
        assert!(!key_matches(&stored, "abcde"));
    }

    #[test]
    fn layout_constants_line_up() {
        assert_eq!(DATA_REGION_START, 32 + 1024 * 532);
        assert!(DATA_REGION_START < CACHE_FILE_SIZE);
    }
}
