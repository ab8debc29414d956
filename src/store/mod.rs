//! Store Facade Module
//!
//! This module is the consumer-facing surface of the engine: open a
//! directory, insert triples/quads (current or historical), run streaming
//! queries through a reader snapshot, apply N3 patches, read statistics,
//! and close.
//!
//! ## Design Overview
//!
//! All state lives in one [`MultiIndex`] behind a `parking_lot::RwLock`:
//!
//! - The **write guard is the single-writer lock**. Every mutation acquires
//!   it with a timeout (timeout → [`StoreError::Busy`]), applies its
//!   change, and runs the commit fence before releasing.
//! - Readers take **read guards** wrapped in a [`Snapshot`]: a query holds
//!   its snapshot for the whole iteration, so it observes one consistent
//!   root and can never see a page mid-split.
//!
//! The store owns its atom store and page files outright; dropping the
//! store (or calling [`Store::close`]) releases everything. There are no
//! process-wide singletons.
//!
//! # Concurrency model
//!
//! Readers are wait-free with respect to each other. Writers serialize.
//! Queries are cancelled cooperatively through a [`CancelFlag`] checked on
//! every `advance()`; timeouts are the caller's affair via cancellation.
//!
//! # Error codes
//!
//! Every error maps to a stable numeric code via [`StoreError::code`] so
//! surrounding systems (HTTP, CLI, RPC) can format them uniformly:
//! NotFound=1, InvalidInput=2, StorageFull=3, Corruption=4, PatchFailed=5,
//! Cancelled=6, Busy=7.

#[cfg(test)]
mod tests;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crc32fast::Hasher as Crc32;
use parking_lot::{RwLock, RwLockReadGuard};
use thiserror::Error;
use tracing::{debug, info};

use crate::atoms::AtomStoreError;
use crate::btree::TreeError;
use crate::index::{IndexConfig, IndexError, MultiIndex, PartitionStats};
use crate::keys::{AtomId, TemporalPredicate, Term, Timestamp, TriplePattern, VarId, ATOM_MAX};
use crate::pager::{PagerError, DEFAULT_CACHE_PAGES};
use crate::patch::{self, N3Patch, PatchCounts, PatchError};
use crate::query::path::{eval_path, PathExpr, PathMatch};
use crate::query::{BgpIter, CancelFlag, PatternScan, QueryCtx, QueryError, Solution};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const MANIFEST_FILE: &str = "store.meta";
const MANIFEST_MAGIC: [u8; 4] = *b"AVST";
const MANIFEST_VERSION: u32 = 1;

const FLAG_TEMPORAL: u8 = 0x01;
const FLAG_NAMED_GRAPHS: u8 = 0x02;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Stable error classification exposed to surrounding systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Atom/key/page missing on lookup.
    NotFound,
    /// Malformed triple, bad pattern, unbound variable in a ground op.
    InvalidInput,
    /// File extension or atom chunk append failed.
    StorageFull,
    /// Magic mismatch, impossible entry count, checksum failure.
    Corruption,
    /// Patch batch rolled back.
    PatchFailed,
    /// Cooperative cancellation.
    Cancelled,
    /// Writer-lock contention timeout.
    Busy,
}

impl ErrorKind {
    /// The stable numeric code for this kind.
    pub fn code(self) -> u32 {
        match self {
            ErrorKind::NotFound => 1,
            ErrorKind::InvalidInput => 2,
            ErrorKind::StorageFull => 3,
            ErrorKind::Corruption => 4,
            ErrorKind::PatchFailed => 5,
            ErrorKind::Cancelled => 6,
            ErrorKind::Busy => 7,
        }
    }
}

/// Errors surfaced by the store facade.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Error from the multi-index layer.
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Error from query evaluation.
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Error from patch execution.
    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The single-writer lock could not be acquired in time.
    #[error("store busy: writer lock timed out")]
    Busy,

    /// Malformed request at the facade boundary.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The store directory is damaged or was created with different
    /// options.
    #[error("corruption: {0}")]
    Corruption(String),
}

impl StoreError {
    /// Classifies this error into its stable [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Busy => ErrorKind::Busy,
            StoreError::InvalidInput(_) => ErrorKind::InvalidInput,
            StoreError::Corruption(_) => ErrorKind::Corruption,
            StoreError::Io(_) => ErrorKind::StorageFull,
            StoreError::Index(e) => index_kind(e),
            StoreError::Query(e) => query_kind(e),
            StoreError::Patch(e) => match e {
                PatchError::MalformedPatch(_) => ErrorKind::InvalidInput,
                PatchError::PatchFailed(_) => ErrorKind::PatchFailed,
                PatchError::Query(q) => query_kind(q),
                PatchError::Index(i) => index_kind(i),
            },
        }
    }

    /// The stable numeric code (see [`ErrorKind::code`]).
    pub fn code(&self) -> u32 {
        self.kind().code()
    }
}

fn index_kind(e: &IndexError) -> ErrorKind {
    match e {
        IndexError::InvalidInput(_) => ErrorKind::InvalidInput,
        IndexError::Key(_) => ErrorKind::InvalidInput,
        IndexError::Atom(AtomStoreError::Exhausted) => ErrorKind::StorageFull,
        IndexError::Atom(AtomStoreError::InvalidAtom(_)) => ErrorKind::NotFound,
        IndexError::Atom(AtomStoreError::TermTooLarge(_)) => ErrorKind::InvalidInput,
        IndexError::Atom(_) => ErrorKind::StorageFull,
        IndexError::Tree(TreeError::Pager(PagerError::StorageFull(_))) => ErrorKind::StorageFull,
        IndexError::Tree(TreeError::Pager(PagerError::InvalidPage(_))) => ErrorKind::NotFound,
        IndexError::Tree(_) => ErrorKind::Corruption,
        IndexError::Io(_) => ErrorKind::StorageFull,
        IndexError::Internal(_) => ErrorKind::Corruption,
    }
}

fn query_kind(e: &QueryError) -> ErrorKind {
    match e {
        QueryError::Cancelled => ErrorKind::Cancelled,
        QueryError::InvalidInput(_) => ErrorKind::InvalidInput,
        QueryError::Index(i) => index_kind(i),
        QueryError::Internal(_) => ErrorKind::Corruption,
    }
}

// ------------------------------------------------------------------------------------------------
// Options & statistics
// ------------------------------------------------------------------------------------------------

/// Configuration for [`Store::open`].
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Maintain bitemporal indexes (valid-time + transaction-time).
    pub temporal: bool,

    /// Allow named graphs beyond the default graph.
    pub named_graphs: bool,

    /// Page-cache capacity (pages per tree file).
    pub cache_pages: usize,

    /// How long a mutation waits on the single-writer lock before
    /// surfacing [`StoreError::Busy`].
    pub lock_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            temporal: true,
            named_graphs: true,
            cache_pages: DEFAULT_CACHE_PAGES,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Snapshot of store-level statistics.
#[derive(Debug, Clone)]
pub struct StoreStatistics {
    /// Stored entries in the primary index (every temporal version counts).
    pub triples: u64,
    /// Interned atoms.
    pub atoms: u64,
    /// Total on-disk footprint in bytes.
    pub bytes: u64,
    /// Per-graph partition breakdown.
    pub partitions: Vec<PartitionStats>,
}

// ------------------------------------------------------------------------------------------------
// Variable table
// ------------------------------------------------------------------------------------------------

/// Assigns dense [`VarId`]s to variable names during pattern compilation.
///
/// The `?name` string test happens exactly once, here; operators only ever
/// see the tagged [`Term`] form.
#[derive(Debug, Clone, Default)]
pub struct VarTable {
    names: Vec<String>,
}

impl VarTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `name`, assigning the next one on first sight.
    pub fn var(&mut self, name: &str) -> VarId {
        if let Some(pos) = self.names.iter().position(|n| n == name) {
            return pos as VarId;
        }
        self.names.push(name.to_string());
        (self.names.len() - 1) as VarId
    }

    /// Name of an assigned id.
    pub fn name(&self, id: VarId) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    /// Number of assigned variables.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no variable was assigned.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// Store
// ------------------------------------------------------------------------------------------------

/// The embedded bitemporal quad store.
///
/// Thread-safe: clone the handle to share it; all clones refer to the same
/// underlying state.
#[derive(Debug)]
pub struct Store {
    inner: Arc<RwLock<MultiIndex>>,
    options: StoreOptions,
    dir: PathBuf,
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            options: self.options,
            dir: self.dir.clone(),
        }
    }
}

impl Store {
    /// Opens (or creates) a store rooted at `path`.
    ///
    /// A fresh directory records the options in a CRC-guarded manifest; an
    /// existing store must have been created with the same `temporal` /
    /// `named_graphs` flags.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StoreError> {
        let dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        // 1. Manifest: adopt or create, and reject flag mismatches — a
        //    temporal tree file is meaningless to a non-temporal store.
        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.is_file() {
            let (temporal, named_graphs) = read_manifest(&manifest_path)?;
            if temporal != options.temporal || named_graphs != options.named_graphs {
                return Err(StoreError::InvalidInput(format!(
                    "store at {} was created with temporal={temporal}, named_graphs={named_graphs}",
                    dir.display()
                )));
            }
        } else {
            write_manifest(&manifest_path, options.temporal, options.named_graphs)?;
        }

        // 2. Open the multi-index (atom store, partitions, counters).
        let index = MultiIndex::open(
            &dir,
            IndexConfig {
                temporal: options.temporal,
                named_graphs: options.named_graphs,
                cache_pages: options.cache_pages,
            },
        )?;

        info!(path = %dir.display(), temporal = options.temporal, "store opened");
        Ok(Self {
            inner: Arc::new(RwLock::new(index)),
            options,
            dir,
        })
    }

    /// Directory this store lives in.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// The options the store was opened with.
    pub fn options(&self) -> StoreOptions {
        self.options
    }

    // --------------------------------------------------------------------------------------------
    // Mutation
    // --------------------------------------------------------------------------------------------

    /// Inserts a triple into the default graph.
    ///
    /// On a temporal store this is a *current* assertion: valid `[now, ∞)`.
    /// Returns `false` when the triple was already present.
    pub fn insert_triple(&self, s: &str, p: &str, o: &str) -> Result<bool, StoreError> {
        self.insert_inner(s, p, o, None, None)
    }

    /// Inserts a quad into a named graph.
    pub fn insert_quad(&self, s: &str, p: &str, o: &str, graph: &str) -> Result<bool, StoreError> {
        self.insert_inner(s, p, o, Some(graph), None)
    }

    /// Inserts a historical assertion with an explicit validity interval.
    ///
    /// `valid_to` may be [`crate::keys::TIME_MAX`] for an open interval. A
    /// zero-width or inverted interval is invalid input.
    pub fn insert_temporal(
        &self,
        s: &str,
        p: &str,
        o: &str,
        valid_from: Timestamp,
        valid_to: Timestamp,
        graph: Option<&str>,
    ) -> Result<bool, StoreError> {
        if !self.options.temporal {
            return Err(StoreError::InvalidInput(
                "temporal insert on a non-temporal store".into(),
            ));
        }
        self.insert_inner(s, p, o, graph, Some((valid_from, valid_to)))
    }

    fn insert_inner(
        &self,
        s: &str,
        p: &str,
        o: &str,
        graph: Option<&str>,
        validity: Option<(Timestamp, Timestamp)>,
    ) -> Result<bool, StoreError> {
        let now = now_millis();
        let mut guard = self.write_guard()?;
        let inserted = guard.insert(
            s.as_bytes(),
            p.as_bytes(),
            o.as_bytes(),
            graph.map(str::as_bytes),
            validity,
            now,
        )?;
        if inserted {
            guard.commit()?;
        }
        Ok(inserted)
    }

    /// Interns a term ahead of use and returns its atom.
    ///
    /// Pattern compilers call this for INSERT terms the store has never
    /// seen (a read snapshot can only resolve existing terms).
    pub fn intern_term(&self, term: &str) -> Result<AtomId, StoreError> {
        let mut guard = self.write_guard()?;
        let atom = guard.intern_term(term.as_bytes())?;
        guard.commit()?;
        Ok(atom)
    }

    /// Deletes a ground triple (tombstoning every live version on temporal
    /// stores). Returns the number of logical triples affected.
    pub fn delete_triple(
        &self,
        s: &str,
        p: &str,
        o: &str,
        graph: Option<&str>,
    ) -> Result<usize, StoreError> {
        let now = now_millis();
        let mut guard = self.write_guard()?;
        let deleted = guard.delete(
            s.as_bytes(),
            p.as_bytes(),
            o.as_bytes(),
            graph.map(str::as_bytes),
            now,
        )?;
        if deleted > 0 {
            guard.commit()?;
        }
        Ok(deleted)
    }

    /// Applies an N3 patch atomically against `graph` (default graph when
    /// `None`).
    ///
    /// Readers see the pre-patch state until the commit fence; on failure
    /// the batch is rolled back and [`ErrorKind::PatchFailed`] surfaces.
    pub fn patch(&self, patch: &N3Patch, graph: Option<&str>) -> Result<PatchCounts, StoreError> {
        let now = now_millis();
        let mut guard = self.write_guard()?;
        let graph_atom = guard.graph_atom(graph.map(str::as_bytes))?;
        let counts = patch::apply(&mut guard, patch, graph_atom, now)?;
        guard.commit()?;
        debug!(deleted = counts.deleted, inserted = counts.inserted, "patch committed");
        Ok(counts)
    }

    // --------------------------------------------------------------------------------------------
    // Reading
    // --------------------------------------------------------------------------------------------

    /// Takes a reader snapshot; queries run through it and observe a
    /// consistent state for as long as it lives.
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            guard: self.inner.read(),
            now: now_millis(),
        }
    }

    /// Store-level statistics.
    pub fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        let guard = self.inner.read();
        Ok(StoreStatistics {
            triples: guard.triple_count(),
            atoms: guard.atoms().len() as u64,
            bytes: guard.bytes_used(),
            partitions: guard.partition_stats()?,
        })
    }

    /// Flushes everything durably (atoms first, then every tree's fence).
    pub fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.write_guard()?;
        guard.commit()?;
        info!(path = %self.dir.display(), "store closed");
        Ok(())
    }

    fn write_guard(&self) -> Result<parking_lot::RwLockWriteGuard<'_, MultiIndex>, StoreError> {
        self.inner
            .try_write_for(self.options.lock_timeout)
            .ok_or(StoreError::Busy)
    }
}

// ------------------------------------------------------------------------------------------------
// Snapshot — the query entry point
// ------------------------------------------------------------------------------------------------

/// A consistent read view of the store.
///
/// Holds a read guard for its lifetime: writers wait, readers share.
pub struct Snapshot<'a> {
    guard: RwLockReadGuard<'a, MultiIndex>,
    now: Timestamp,
}

impl Snapshot<'_> {
    /// The index snapshot (term resolution, raw scans).
    pub fn index(&self) -> &MultiIndex {
        &self.guard
    }

    /// Query-start instant used to resolve `Current`.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// A query context over this snapshot.
    pub fn ctx(
        &self,
        predicate: Option<TemporalPredicate>,
        cancel: CancelFlag,
    ) -> Result<QueryCtx<'_>, StoreError> {
        if predicate.is_some() && !self.guard.is_temporal() {
            return Err(StoreError::InvalidInput(
                "temporal predicate on a non-temporal store".into(),
            ));
        }
        Ok(QueryCtx::new(&self.guard, predicate, self.now, cancel))
    }

    /// Streams the solutions of a basic graph pattern.
    pub fn query(
        &self,
        patterns: &[TriplePattern],
        predicate: Option<TemporalPredicate>,
    ) -> Result<BgpIter<'_>, StoreError> {
        self.query_cancellable(patterns, predicate, CancelFlag::new())
    }

    /// Same as [`Snapshot::query`] with a caller-held cancellation flag.
    pub fn query_cancellable(
        &self,
        patterns: &[TriplePattern],
        predicate: Option<TemporalPredicate>,
        cancel: CancelFlag,
    ) -> Result<BgpIter<'_>, StoreError> {
        let ctx = self.ctx(predicate, cancel)?;
        Ok(BgpIter::new(&ctx, patterns)?)
    }

    /// Streams the matches of a single pattern.
    pub fn pattern_scan(
        &self,
        pattern: &TriplePattern,
        predicate: Option<TemporalPredicate>,
    ) -> Result<PatternScan<'_>, StoreError> {
        let ctx = self.ctx(predicate, CancelFlag::new())?;
        Ok(PatternScan::new(&ctx, pattern, &Solution::new())?)
    }

    /// Evaluates a property path between two terms.
    pub fn path(
        &self,
        expr: &PathExpr,
        start: Term,
        end: Term,
        graph: Option<AtomId>,
        predicate: Option<TemporalPredicate>,
    ) -> Result<Vec<PathMatch>, StoreError> {
        let ctx = self.ctx(predicate, CancelFlag::new())?;
        Ok(eval_path(&ctx, expr, start.atom(), end.atom(), graph)?)
    }

    /// Whether a ground triple is present (under `predicate` on temporal
    /// stores).
    pub fn contains(
        &self,
        s: &str,
        p: &str,
        o: &str,
        graph: Option<&str>,
        predicate: Option<TemporalPredicate>,
    ) -> Result<bool, StoreError> {
        let pattern = self.compile_pattern(&mut VarTable::new(), s, p, o, graph);
        let mut scan = self.pattern_scan(&pattern, predicate)?;
        Ok(crate::query::SolutionIter::advance(&mut scan)?)
    }

    /// Compiles one term string: `?name` becomes a variable, anything else
    /// resolves to its atom (or the unmatchable maximum sentinel when the
    /// store has never seen the term).
    pub fn compile_term(&self, vars: &mut VarTable, text: &str) -> Term {
        match text.strip_prefix('?') {
            Some(name) => Term::Var(vars.var(name)),
            None => Term::Atom(
                self.guard
                    .atoms()
                    .id_of(text.as_bytes())
                    .unwrap_or(ATOM_MAX),
            ),
        }
    }

    /// Compiles a full pattern; an unknown graph term yields a pattern that
    /// matches nothing.
    pub fn compile_pattern(
        &self,
        vars: &mut VarTable,
        s: &str,
        p: &str,
        o: &str,
        graph: Option<&str>,
    ) -> TriplePattern {
        let mut pattern = TriplePattern::new(
            self.compile_term(vars, s),
            self.compile_term(vars, p),
            self.compile_term(vars, o),
        );
        if let Some(g) = graph {
            pattern.graph = Some(
                self.guard
                    .resolve_graph(Some(g.as_bytes()))
                    .unwrap_or(ATOM_MAX),
            );
        }
        pattern
    }
}

// ------------------------------------------------------------------------------------------------
// Manifest I/O
// ------------------------------------------------------------------------------------------------

fn write_manifest(path: &Path, temporal: bool, named_graphs: bool) -> Result<(), StoreError> {
    let mut flags = 0u8;
    if temporal {
        flags |= FLAG_TEMPORAL;
    }
    if named_graphs {
        flags |= FLAG_NAMED_GRAPHS;
    }

    let mut bytes = Vec::with_capacity(13);
    bytes.extend_from_slice(&MANIFEST_MAGIC);
    bytes.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
    bytes.push(flags);
    let mut hasher = Crc32::new();
    hasher.update(&bytes);
    let crc = hasher.finalize();
    bytes.extend_from_slice(&crc.to_le_bytes());

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(())
}

fn read_manifest(path: &Path) -> Result<(bool, bool), StoreError> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    if bytes.len() != 13 {
        return Err(StoreError::Corruption("store manifest truncated".into()));
    }
    if bytes[0..4] != MANIFEST_MAGIC {
        return Err(StoreError::Corruption("store manifest magic mismatch".into()));
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[4..8]);
    if u32::from_le_bytes(buf) != MANIFEST_VERSION {
        return Err(StoreError::Corruption("store manifest version mismatch".into()));
    }
    let flags = bytes[8];
    let mut hasher = Crc32::new();
    hasher.update(&bytes[0..9]);
    buf.copy_from_slice(&bytes[9..13]);
    if hasher.finalize() != u32::from_le_bytes(buf) {
        return Err(StoreError::Corruption("store manifest checksum mismatch".into()));
    }
    Ok((flags & FLAG_TEMPORAL != 0, flags & FLAG_NAMED_GRAPHS != 0))
}

/// Wall clock in millisecond epoch; clamps to zero before the epoch.
fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}
