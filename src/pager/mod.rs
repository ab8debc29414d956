//! Page File & Metadata Module
//!
//! This module owns the **memory-mapped page file** backing one B+Tree: a
//! flat array of fixed 16 KiB pages with a metadata block in page 0, plus a
//! count-bounded LRU cache fronting the mapping.
//!
//! ## Design Overview
//!
//! The file is mapped read-write ([`memmap2::MmapMut`]); page reads are
//! zero-copy slices into the mapping and page writes go straight to the
//! mapped bytes. Durability is a two-step fence: first every dirty page is
//! flushed through the mmap writeback path, then the metadata block is
//! rewritten and flushed **last**. A crash between the two leaves the file
//! at the previous consistent state — at worst an allocated page is
//! unreferenced, which the next allocation simply reuses or ignores.
//!
//! # On-disk layout
//!
//! ```text
//! page 0      [MAGIC_LE][VERSION_LE][ROOT_LE][NEXT_PAGE_LE][ENTRY_COUNT_LE][CRC32_LE]
//! page 1..N   tree nodes (see the btree module for node layout)
//! ```
//!
//! Header fields are little-endian; key payloads inside node pages are
//! big-endian so byte compare equals semantic compare.
//!
//! # Recovery
//!
//! On open, a zeroed metadata block means a fresh (or never-committed) file
//! and triggers initialization. A present magic with a valid CRC is trusted.
//! Anything else — wrong magic, wrong version, checksum mismatch, or a file
//! shorter than the metadata claims — is [`PagerError::Corruption`].
//!
//! # Guarantees
//!
//! - **Fence ordering:** `commit()` never flushes metadata before data pages.
//! - **Bounded cache:** at most `cache_pages` pages are tracked hot; dirty
//!   victims are written back before eviction; pinned pages are never
//!   evicted.
//! - **Allocation safety:** growing the file remaps, so stale borrows are
//!   impossible (`allocate` takes `&mut self`).

mod cache;

#[cfg(test)]
mod tests;

pub use cache::{Evicted, PageCache};

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use memmap2::MmapMut;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, trace};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Fixed page size for every tree file.
pub const PAGE_SIZE: usize = 16 * 1024;

/// Identifier of a page within one file. Page 0 is the metadata block.
pub type PageId = u32;

/// 64-bit magic constant identifying the page-file format.
pub const META_MAGIC: u64 = 0x4145_5655_4D54_4442; // "AEVUMTDB"

const META_VERSION: u32 = 1;
const META_LEN: usize = 32;

/// Pages added per file extension, amortizing `set_len` calls.
const EXTEND_PAGES: u64 = 64;

/// Default page-cache capacity when the caller does not configure one.
pub const DEFAULT_CACHE_PAGES: usize = 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by pager operations.
#[derive(Debug, Error)]
pub enum PagerError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file could not be extended.
    #[error("storage full: {0}")]
    StorageFull(String),

    /// Structural damage: bad magic, bad checksum, impossible sizes.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A page id outside the allocated range was requested.
    #[error("invalid page id {0}")]
    InvalidPage(PageId),
}

// ------------------------------------------------------------------------------------------------
// Metadata block
// ------------------------------------------------------------------------------------------------

/// The per-tree metadata persisted in page 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Page id of the tree root.
    pub root: PageId,
    /// Next page id to hand out.
    pub next_page: PageId,
    /// Number of live entries in the tree.
    pub entry_count: u64,
}

impl Metadata {
    fn encode(&self) -> [u8; META_LEN] {
        let mut out = [0u8; META_LEN];
        out[0..8].copy_from_slice(&META_MAGIC.to_le_bytes());
        out[8..12].copy_from_slice(&META_VERSION.to_le_bytes());
        out[12..16].copy_from_slice(&self.root.to_le_bytes());
        out[16..20].copy_from_slice(&self.next_page.to_le_bytes());
        out[20..28].copy_from_slice(&self.entry_count.to_le_bytes());
        let mut hasher = Crc32::new();
        hasher.update(&out[0..28]);
        out[28..32].copy_from_slice(&hasher.finalize().to_le_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, PagerError> {
        let le_u32 = |off: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[off..off + 4]);
            u32::from_le_bytes(buf)
        };
        let le_u64 = |off: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[off..off + 8]);
            u64::from_le_bytes(buf)
        };

        if le_u64(0) != META_MAGIC {
            return Err(PagerError::Corruption("metadata magic mismatch".into()));
        }
        if le_u32(8) != META_VERSION {
            return Err(PagerError::Corruption("metadata version mismatch".into()));
        }
        let mut hasher = Crc32::new();
        hasher.update(&bytes[0..28]);
        if hasher.finalize() != le_u32(28) {
            return Err(PagerError::Corruption("metadata checksum mismatch".into()));
        }

        Ok(Self {
            root: le_u32(12),
            next_page: le_u32(16),
            entry_count: le_u64(20),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Pager
// ------------------------------------------------------------------------------------------------

/// Memory-mapped page file with LRU writeback tracking.
#[derive(Debug)]
pub struct Pager {
    file: File,
    mmap: MmapMut,
    path: PathBuf,
    cache: Mutex<PageCache>,
    meta: Metadata,
}

impl Pager {
    /// Opens (or creates) the page file at `path`.
    ///
    /// Returns the pager and whether the file was freshly initialized (a
    /// zeroed or zero-length file counts as fresh — a crash before the first
    /// metadata fence leaves exactly that state).
    pub fn open(path: impl AsRef<Path>, cache_pages: usize) -> Result<(Self, bool), PagerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        let created = file_len < PAGE_SIZE as u64;
        if created {
            file.set_len(PAGE_SIZE as u64 * (1 + EXTEND_PAGES))
                .map_err(|e| PagerError::StorageFull(e.to_string()))?;
        }

        // SAFETY: the mapping is private to this store and all slicing below
        // is bounds-checked against the mapped length.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let meta_bytes = &mmap[0..META_LEN];
        let blank = meta_bytes.iter().all(|&b| b == 0);
        let (meta, fresh) = if created || blank {
            (
                Metadata {
                    root: 0,
                    next_page: 1,
                    entry_count: 0,
                },
                true,
            )
        } else {
            let meta = Metadata::decode(meta_bytes)?;
            let needed = u64::from(meta.next_page) * PAGE_SIZE as u64;
            if mmap.len() < needed as usize {
                return Err(PagerError::Corruption(format!(
                    "file holds {} bytes but metadata requires {needed}",
                    mmap.len()
                )));
            }
            (meta, false)
        };

        info!(path = %path.display(), fresh, root = meta.root, next_page = meta.next_page, "page file opened");
        Ok((
            Self {
                file,
                mmap,
                path,
                cache: Mutex::new(PageCache::new(cache_pages)),
                meta,
            },
            fresh,
        ))
    }

    /// Current metadata (the in-memory working copy).
    pub fn meta(&self) -> Metadata {
        self.meta
    }

    /// Points the tree root at `page`.
    pub fn set_root(&mut self, page: PageId) {
        self.meta.root = page;
    }

    /// Replaces the live-entry counter.
    pub fn set_entry_count(&mut self, count: u64) {
        self.meta.entry_count = count;
    }

    /// Read access to a page. The borrow must not be held across a mutation.
    pub fn page(&self, id: PageId) -> Result<&[u8], PagerError> {
        let range = self.page_range(id)?;
        self.note_access(id);
        Ok(&self.mmap[range])
    }

    /// Write access to a page; marks it dirty.
    pub fn page_mut(&mut self, id: PageId) -> Result<&mut [u8], PagerError> {
        let range = self.page_range(id)?;
        {
            let mut cache = self.cache.lock();
            cache.mark_dirty(id);
        }
        self.note_access(id);
        Ok(&mut self.mmap[range])
    }

    /// Allocates a fresh zeroed page, growing (and remapping) the file when
    /// the current mapping is spent.
    pub fn allocate(&mut self) -> Result<PageId, PagerError> {
        let id = self.meta.next_page;
        let end = (u64::from(id) + 1) * PAGE_SIZE as u64;
        if end > self.mmap.len() as u64 {
            let new_len = end + EXTEND_PAGES * PAGE_SIZE as u64;
            self.file
                .set_len(new_len)
                .map_err(|e| PagerError::StorageFull(e.to_string()))?;
            // SAFETY: same file, same exclusive ownership; the old mapping is
            // dropped by assignment before any further access.
            self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
            debug!(page = id, new_len, "page file extended");
        }
        self.meta.next_page = id
            .checked_add(1)
            .ok_or_else(|| PagerError::StorageFull("page id space exhausted".into()))?;

        let range = self.page_range(id)?;
        self.mmap[range].fill(0);
        self.cache.lock().mark_dirty(id);
        trace!(page = id, "page allocated");
        Ok(id)
    }

    /// Flushes every dirty page, then rewrites and flushes the metadata
    /// block. The metadata fence always happens last.
    pub fn commit(&mut self) -> Result<(), PagerError> {
        let dirty = {
            let cache = self.cache.lock();
            cache.dirty_pages()
        };
        for id in &dirty {
            let range = self.page_range(*id)?;
            self.mmap.flush_range(range.start, PAGE_SIZE)?;
        }
        {
            let mut cache = self.cache.lock();
            for id in &dirty {
                cache.clear_dirty(*id);
            }
        }

        let encoded = self.meta.encode();
        self.mmap[0..META_LEN].copy_from_slice(&encoded);
        self.mmap.flush_range(0, PAGE_SIZE)?;
        trace!(pages = dirty.len(), root = self.meta.root, "commit fenced");
        Ok(())
    }

    /// Number of allocated pages (metadata page included).
    pub fn allocated_pages(&self) -> u64 {
        u64::from(self.meta.next_page)
    }

    /// On-disk footprint in bytes.
    pub fn file_len(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn page_range(&self, id: PageId) -> Result<std::ops::Range<usize>, PagerError> {
        if id == 0 || id >= self.meta.next_page {
            return Err(PagerError::InvalidPage(id));
        }
        let start = id as usize * PAGE_SIZE;
        let end = start + PAGE_SIZE;
        if end > self.mmap.len() {
            return Err(PagerError::Corruption(format!(
                "page {id} lies past the mapped file"
            )));
        }
        Ok(start..end)
    }

    /// LRU accounting for an access to `id`; a dirty eviction victim is
    /// written back through the mapping before it is forgotten.
    fn note_access(&self, id: PageId) {
        let evicted = {
            let mut cache = self.cache.lock();
            cache.touch(id)
        };
        if let Some(victim) = evicted {
            if victim.dirty {
                let start = victim.id as usize * PAGE_SIZE;
                if start + PAGE_SIZE <= self.mmap.len() {
                    if let Err(e) = self.mmap.flush_range(start, PAGE_SIZE) {
                        // The bytes are still in the mapping; the next commit
                        // fence retries the flush.
                        tracing::warn!(page = victim.id, %e, "writeback on eviction failed");
                        self.cache.lock().mark_dirty(victim.id);
                    }
                }
            }
            trace!(page = victim.id, dirty = victim.dirty, "page evicted");
        }
    }
}
