//! Atom Store Module
//!
//! This module implements the **persistent**, **append-only** string interner
//! that maps RDF term bytes to dense 32-bit atom identifiers and back.
//! Every key the B+Trees store is built from atoms, so the interner is the
//! root of the whole storage stack.
//!
//! ## Design Overview
//!
//! Term bytes live in append-only **64 KiB chunks**. Each interned term is a
//! length-prefixed record inside a chunk; a side table of
//! `(chunk, offset, len, hash)` entries gives constant-time access by atom
//! id. A non-cryptographic **FNV-1a 32** hash keyed in-memory map resolves
//! `bytes → atom` lookups, walking equal-hash entries and comparing bytes on
//! collision. The hash function is hand-written so the persisted values can
//! never change under a dependency upgrade.
//!
//! # On-disk layout
//!
//! ```text
//! atoms/chunk-000000          [REC_LEN_LE][REC_BYTES] ...
//! atoms/chunk-000001          ...
//! atoms/index                 [HEADER_BYTES][HEADER_CRC32_LE]
//!                             [ENTRY_BYTES]...[ENTRIES_CRC32_LE]
//! ```
//!
//! - **Chunk** — raw term records, appended in intern order. A record that
//!   would not fit the active chunk's remainder rolls over to a fresh chunk.
//! - **Index** — a header (magic, version, atom count, chunk count) guarded
//!   by CRC32, followed by one fixed-width entry per atom and a trailing
//!   CRC32 over all entry bytes.
//!
//! # Recovery
//!
//! On open the index file is validated (magic, version, both checksums, and
//! entry bounds against the loaded chunks). Any mismatch discards the index
//! and **rebuilds** the table by scanning the chunks front to back; a
//! truncated tail record ends the scan at the last durable atom, mirroring
//! WAL replay-until-corruption.
//!
//! # Guarantees
//!
//! - **Stability:** equal byte sequences map to the same atom across process
//!   restarts; atoms are never reassigned.
//! - **Sentinels:** atom `0` is the reserved minimum and [`ATOM_MAX`] the
//!   reserved maximum; neither is ever assigned.
//! - **Integrity:** the index is only trusted when every checksum and size
//!   marker agrees with the chunk files.

#[cfg(test)]
mod tests;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::keys::{AtomId, ATOM_MAX, ATOM_MIN};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Capacity of one term-content chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

const REC_LEN_SIZE: usize = 4;
const INDEX_MAGIC: [u8; 4] = *b"AVAT";
const INDEX_VERSION: u32 = 1;
const INDEX_HEADER_SIZE: usize = 16;
const INDEX_ENTRY_SIZE: usize = 16;
const CRC_SIZE: usize = 4;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by atom store operations.
#[derive(Debug, Error)]
pub enum AtomStoreError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An atom id that was never assigned (or a reserved sentinel) was
    /// looked up.
    #[error("invalid atom id {0}")]
    InvalidAtom(AtomId),

    /// The 32-bit id space is spent or a chunk append failed.
    #[error("atom store exhausted")]
    Exhausted,

    /// A term longer than a whole chunk cannot be interned.
    #[error("term of {0} bytes exceeds chunk capacity")]
    TermTooLarge(usize),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// FNV-1a — the persistent hash
// ------------------------------------------------------------------------------------------------

/// Deterministic FNV-1a 32-bit hash over term bytes.
///
/// Persisted in the index file, so it must stay byte-stable forever.
pub(crate) fn fnv1a32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811C_9DC5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

// ------------------------------------------------------------------------------------------------
// Side-table entry
// ------------------------------------------------------------------------------------------------

/// Locator for one interned term: which chunk, where in it, how long, and
/// the persisted hash of its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AtomEntry {
    /// Index of the chunk holding the term bytes.
    chunk: u32,
    /// Byte offset of the term content inside the chunk (past the length
    /// prefix).
    offset: u32,
    /// Content length in bytes.
    len: u32,
    /// FNV-1a 32 hash of the content.
    hash: u32,
}

impl AtomEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.chunk.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.len.to_le_bytes());
        buf.extend_from_slice(&self.hash.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < INDEX_ENTRY_SIZE {
            return None;
        }
        let le_u32 = |off: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[off..off + 4]);
            u32::from_le_bytes(buf)
        };
        Some(Self {
            chunk: le_u32(0),
            offset: le_u32(4),
            len: le_u32(8),
            hash: le_u32(12),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// AtomStore
// ------------------------------------------------------------------------------------------------

/// The persistent string ↔ atom interner backing one store.
///
/// Owned by the store; dropped (and thereby released) when the store closes.
/// No process-wide state.
#[derive(Debug)]
pub struct AtomStore {
    /// Directory holding chunk files and the index file.
    dir: PathBuf,

    /// Chunk payloads, in file order; the last chunk is the active one.
    chunks: Vec<Vec<u8>>,

    /// Side table indexed by `atom - 1`.
    entries: Vec<AtomEntry>,

    /// In-memory hash → candidate atoms map.
    table: FxHashMap<u32, Vec<AtomId>>,

    /// Lowest chunk index whose file content is stale, if any.
    dirty_from_chunk: Option<usize>,

    /// Whether the index file is stale.
    index_dirty: bool,
}

impl AtomStore {
    /// Opens (or creates) the atom store rooted at `dir`.
    ///
    /// Loads every chunk into memory, then either adopts the index file
    /// (when all checksums and size markers agree) or rebuilds the table by
    /// scanning the chunks.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, AtomStoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut chunks = Vec::new();
        loop {
            let path = chunk_path(&dir, chunks.len());
            if !path.is_file() {
                break;
            }
            let mut data = Vec::new();
            File::open(&path)?.read_to_end(&mut data)?;
            chunks.push(data);
        }

        let mut store = Self {
            dir,
            chunks,
            entries: Vec::new(),
            table: FxHashMap::default(),
            dirty_from_chunk: None,
            index_dirty: false,
        };

        match store.load_index() {
            Ok(count) => {
                debug!(atoms = count, chunks = store.chunks.len(), "atom index adopted");
            }
            Err(reason) => {
                if !store.chunks.is_empty() {
                    warn!(%reason, "atom index invalid; rebuilding from chunks");
                }
                store.rebuild_from_chunks();
                store.index_dirty = true;
            }
        }

        info!(
            atoms = store.entries.len(),
            chunks = store.chunks.len(),
            "atom store opened"
        );
        Ok(store)
    }

    /// Number of assigned atoms.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no atom has been assigned yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total content bytes across all chunks.
    pub fn bytes_used(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    /// Interns `bytes`, returning the existing atom when the content was
    /// seen before and assigning the next id otherwise.
    pub fn intern(&mut self, bytes: &[u8]) -> Result<AtomId, AtomStoreError> {
        let hash = fnv1a32(bytes);
        if let Some(candidates) = self.table.get(&hash) {
            for &id in candidates {
                if self.content(self.entries[(id - 1) as usize]) == bytes {
                    return Ok(id);
                }
            }
        }

        if bytes.len() > CHUNK_SIZE - REC_LEN_SIZE {
            return Err(AtomStoreError::TermTooLarge(bytes.len()));
        }
        // ATOM_MAX is a reserved sentinel and must never be assigned.
        let next = self.entries.len() as u64 + 1;
        if next >= u64::from(ATOM_MAX) {
            return Err(AtomStoreError::Exhausted);
        }

        let record_len = REC_LEN_SIZE + bytes.len();
        let needs_new_chunk = match self.chunks.last() {
            Some(active) => CHUNK_SIZE - active.len() < record_len,
            None => true,
        };
        if needs_new_chunk {
            self.chunks.push(Vec::with_capacity(CHUNK_SIZE));
        }

        let chunk_idx = self.chunks.len() - 1;
        let active = &mut self.chunks[chunk_idx];
        let offset = active.len() + REC_LEN_SIZE;
        active.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        active.extend_from_slice(bytes);

        let id = next as AtomId;
        self.entries.push(AtomEntry {
            chunk: chunk_idx as u32,
            offset: offset as u32,
            len: bytes.len() as u32,
            hash,
        });
        self.table.entry(hash).or_default().push(id);

        self.dirty_from_chunk = Some(match self.dirty_from_chunk {
            Some(first) => first.min(chunk_idx),
            None => chunk_idx,
        });
        self.index_dirty = true;

        Ok(id)
    }

    /// Returns the term bytes for `atom` as a borrowed view into the chunk.
    pub fn lookup(&self, atom: AtomId) -> Result<&[u8], AtomStoreError> {
        if atom == ATOM_MIN || atom == ATOM_MAX {
            return Err(AtomStoreError::InvalidAtom(atom));
        }
        let entry = self
            .entries
            .get((atom - 1) as usize)
            .ok_or(AtomStoreError::InvalidAtom(atom))?;
        Ok(self.content(*entry))
    }

    /// Read-only `bytes → atom` resolution; `None` when never interned.
    pub fn id_of(&self, bytes: &[u8]) -> Option<AtomId> {
        let hash = fnv1a32(bytes);
        let candidates = self.table.get(&hash)?;
        candidates
            .iter()
            .copied()
            .find(|&id| self.content(self.entries[(id - 1) as usize]) == bytes)
    }

    /// Durably writes dirty chunks and the index file.
    ///
    /// Chunk files are rewritten in place and fsynced; the index goes
    /// through a temp-path + rename so a crash never leaves a torn index
    /// (a missing or stale index is recovered by the rebuild path).
    pub fn flush(&mut self) -> Result<(), AtomStoreError> {
        if let Some(first) = self.dirty_from_chunk {
            for idx in first..self.chunks.len() {
                let path = chunk_path(&self.dir, idx);
                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&path)?;
                file.write_all(&self.chunks[idx])?;
                file.sync_all()?;
            }
            self.dirty_from_chunk = None;
        }

        if self.index_dirty {
            let bytes = self.encode_index();
            let tmp = self.dir.join("index.tmp");
            let final_path = self.dir.join("index");
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &final_path)?;
            self.index_dirty = false;
        }

        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn content(&self, entry: AtomEntry) -> &[u8] {
        let chunk = &self.chunks[entry.chunk as usize];
        &chunk[entry.offset as usize..(entry.offset + entry.len) as usize]
    }

    fn encode_index(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            INDEX_HEADER_SIZE + CRC_SIZE + self.entries.len() * INDEX_ENTRY_SIZE + CRC_SIZE,
        );
        out.extend_from_slice(&INDEX_MAGIC);
        out.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.chunks.len() as u32).to_le_bytes());

        let mut hasher = Crc32::new();
        hasher.update(&out[..INDEX_HEADER_SIZE]);
        out.extend_from_slice(&hasher.finalize().to_le_bytes());

        let mut body = Vec::with_capacity(self.entries.len() * INDEX_ENTRY_SIZE);
        for entry in &self.entries {
            entry.encode_to(&mut body);
        }
        let mut hasher = Crc32::new();
        hasher.update(&body);
        let body_crc = hasher.finalize();
        out.extend_from_slice(&body);
        out.extend_from_slice(&body_crc.to_le_bytes());
        out
    }

    /// Attempts to adopt the index file; the error string names the first
    /// validation that failed.
    fn load_index(&mut self) -> Result<usize, String> {
        let path = self.dir.join("index");
        let mut bytes = Vec::new();
        File::open(&path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| format!("index unreadable: {e}"))?;

        if bytes.len() < INDEX_HEADER_SIZE + CRC_SIZE + CRC_SIZE {
            return Err("index file too small".into());
        }
        if bytes[0..4] != INDEX_MAGIC {
            return Err("index magic mismatch".into());
        }
        let le_u32 = |off: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[off..off + 4]);
            u32::from_le_bytes(buf)
        };
        if le_u32(4) != INDEX_VERSION {
            return Err("index version mismatch".into());
        }
        let atom_count = le_u32(8) as usize;
        let chunk_count = le_u32(12) as usize;

        let mut hasher = Crc32::new();
        hasher.update(&bytes[..INDEX_HEADER_SIZE]);
        if hasher.finalize() != le_u32(INDEX_HEADER_SIZE) {
            return Err("index header checksum mismatch".into());
        }

        if chunk_count != self.chunks.len() {
            return Err(format!(
                "index expects {chunk_count} chunks, found {}",
                self.chunks.len()
            ));
        }

        let body_start = INDEX_HEADER_SIZE + CRC_SIZE;
        let body_len = atom_count * INDEX_ENTRY_SIZE;
        if bytes.len() != body_start + body_len + CRC_SIZE {
            return Err("index size marker mismatch".into());
        }
        let body = &bytes[body_start..body_start + body_len];
        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != le_u32(body_start + body_len) {
            return Err("index body checksum mismatch".into());
        }

        let mut entries = Vec::with_capacity(atom_count);
        let mut table: FxHashMap<u32, Vec<AtomId>> = FxHashMap::default();
        for i in 0..atom_count {
            let entry = AtomEntry::decode(&body[i * INDEX_ENTRY_SIZE..])
                .ok_or_else(|| "short index entry".to_string())?;
            let chunk = self
                .chunks
                .get(entry.chunk as usize)
                .ok_or_else(|| format!("entry {i} points past chunk list"))?;
            let end = entry.offset as usize + entry.len as usize;
            if end > chunk.len() {
                return Err(format!("entry {i} points past chunk end"));
            }
            entries.push(entry);
            table.entry(entry.hash).or_default().push((i + 1) as AtomId);
        }

        self.entries = entries;
        self.table = table;
        Ok(atom_count)
    }

    /// Rebuilds the side table by scanning chunk records front to back.
    ///
    /// Stops at the first malformed record: everything before it is durable,
    /// everything after was lost to a torn write.
    fn rebuild_from_chunks(&mut self) {
        self.entries.clear();
        self.table.clear();

        'chunks: for (chunk_idx, chunk) in self.chunks.iter().enumerate() {
            let mut cursor = 0usize;
            while cursor < chunk.len() {
                if chunk.len() - cursor < REC_LEN_SIZE {
                    warn!(chunk = chunk_idx, cursor, "truncated record length; scan stopped");
                    break 'chunks;
                }
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&chunk[cursor..cursor + REC_LEN_SIZE]);
                let len = u32::from_le_bytes(buf) as usize;
                let start = cursor + REC_LEN_SIZE;
                if len > CHUNK_SIZE || start + len > chunk.len() {
                    warn!(chunk = chunk_idx, cursor, len, "truncated record; scan stopped");
                    break 'chunks;
                }
                let content = &chunk[start..start + len];
                let hash = fnv1a32(content);
                let id = (self.entries.len() + 1) as AtomId;
                self.entries.push(AtomEntry {
                    chunk: chunk_idx as u32,
                    offset: start as u32,
                    len: len as u32,
                    hash,
                });
                self.table.entry(hash).or_default().push(id);
                cursor = start + len;
            }
        }

        info!(atoms = self.entries.len(), "atom table rebuilt from chunks");
    }
}

fn chunk_path(dir: &Path, idx: usize) -> PathBuf {
    dir.join(format!("chunk-{idx:06}"))
}
