//! Multi-Index Store Module
//!
//! This module coordinates the **per-rotation B+Trees** that together hold
//! one logical triple set, layered with the **named-graph dimension**: each
//! graph atom owns a full partition (one tree per maintained rotation), and
//! the default graph's partition always exists.
//!
//! ## Design Overview
//!
//! Every mutation interns its terms through the [`AtomStore`], builds the
//! composite key for **each** maintained rotation, and applies the change to
//! every tree — index maintenance is insert-time, never lazy, so all
//! rotations agree on the logical set at all times.
//!
//! Queries route through a deterministic **index-selection table** driven
//! only by which pattern positions are bound (no statistics): the bound
//! positions form a prefix of the chosen rotation's field order, yielding a
//! single contiguous key range. Bound positions fill both bracket keys with
//! the atom; unbound positions take the sentinel minimum / maximum. Scan
//! output is remapped back to canonical `(s, p, o)` regardless of the
//! rotation that served it.
//!
//! Temporal semantics live here too: `[now, ∞)` current inserts, explicit
//! historical intervals, interval truncation of the overlapping prior
//! version (non-destructive — the prior version is re-keyed, its metadata
//! stamped), tombstone deletes, and predicate filtering at enumeration time.
//!
//! # File layout
//!
//! ```text
//! <dir>/atoms/...            atom store (chunks + index)
//! <dir>/g<atom>-<rot>.tdb    one page file per rotation per graph
//! ```
//!
//! # Guarantees
//!
//! - **Index agreement:** every maintained rotation returns an inserted
//!   triple for any pattern whose bound positions match it.
//! - **Idempotence:** re-inserting an identical triple (same validity for
//!   temporal stores) leaves every tree unchanged.
//! - **Selectivity counters:** per-predicate and per-object frequencies are
//!   bumped O(1) per insert and rebuilt by one primary-rotation scan on
//!   open.

#[cfg(test)]
mod tests;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::atoms::{AtomStore, AtomStoreError};
use crate::btree::{BTree, Layout, TreeError};
use crate::keys::{
    AtomId, EntryMeta, KeyError, Rotation, TemporalKey, TemporalPredicate, Timestamp, TripleKey,
    ATOM_MAX, ATOM_MIN, TIME_MAX, TIME_MIN,
};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Reserved term interned eagerly at open; its atom denotes the default
/// graph.
pub const DEFAULT_GRAPH_TERM: &[u8] = b"<urn:x-aevum:default-graph>";

/// Selectivity guess for a bound subject when no counter applies.
const SUBJECT_BOUND_ESTIMATE: u64 = 16;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by multi-index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Error from the atom store.
    #[error("Atom store error: {0}")]
    Atom(#[from] AtomStoreError),

    /// Error from a B+Tree.
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    /// Error from key encoding.
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Malformed input: bad validity interval, named graph on a
    /// default-only store, temporal predicate on a non-temporal store.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Static configuration of one multi-index store.
#[derive(Debug, Clone, Copy)]
pub struct IndexConfig {
    /// Maintain the temporal rotation family (bitemporal keys + metadata)
    /// instead of the plain one.
    pub temporal: bool,

    /// Allow graphs other than the default; disabled stores reject named
    /// inserts outright.
    pub named_graphs: bool,

    /// Page-cache capacity handed to each tree's pager.
    pub cache_pages: usize,
}

// ------------------------------------------------------------------------------------------------
// Match output
// ------------------------------------------------------------------------------------------------

/// Version fields of a temporal match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    /// Start of the validity interval (inclusive).
    pub valid_from: Timestamp,
    /// End of the validity interval (exclusive).
    pub valid_to: Timestamp,
    /// Transaction time of the recording insert.
    pub tx: Timestamp,
    /// Per-entry metadata block.
    pub meta: EntryMeta,
}

/// One canonicalized match produced by an index scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadMatch {
    /// Subject atom.
    pub s: AtomId,
    /// Predicate atom.
    pub p: AtomId,
    /// Object atom.
    pub o: AtomId,
    /// Graph atom the match came from.
    pub graph: AtomId,
    /// Temporal version fields; `None` on non-temporal stores.
    pub version: Option<VersionInfo>,
}

/// One prior version clipped by an overlapping temporal insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncatedVersion {
    /// The version as it was before the clip.
    pub original: TemporalKey,
    /// The re-keyed version with its interval clipped; `None` when the
    /// original started exactly at the cut and was dropped outright.
    pub replacement: Option<TemporalKey>,
    /// Metadata the original carried — the exact undo image.
    pub original_meta: EntryMeta,
}

/// Everything a temporal insert actually did.
///
/// The patch executor journals this as its undo image: a rollback removes
/// what was written and re-seats what was clipped.
#[derive(Debug, Clone, Default)]
pub struct TemporalInsertOutcome {
    /// Key of the newly written version, when one was written.
    pub inserted: Option<TemporalKey>,
    /// Identical tombstoned version revived instead of re-written.
    pub revived: Option<TemporalKey>,
    /// Prior overlapping versions whose intervals were clipped.
    pub truncated: Vec<TruncatedVersion>,
}

impl TemporalInsertOutcome {
    /// Whether the store changed at all (an idempotent re-assertion did
    /// not).
    pub fn changed(&self) -> bool {
        self.inserted.is_some() || self.revived.is_some() || !self.truncated.is_empty()
    }
}

/// A scan pattern over atoms: `None` positions are wildcards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanPattern {
    /// Subject filter.
    pub s: Option<AtomId>,
    /// Predicate filter.
    pub p: Option<AtomId>,
    /// Object filter.
    pub o: Option<AtomId>,
    /// Graph filter; `None` unions all partitions.
    pub graph: Option<AtomId>,
}

impl ScanPattern {
    /// Whether all three triple positions are wildcards.
    pub fn is_unconstrained(&self) -> bool {
        self.s.is_none() && self.p.is_none() && self.o.is_none()
    }
}

// ------------------------------------------------------------------------------------------------
// Partition — one graph's tree set
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct Partition {
    graph: AtomId,
    trees: Vec<(Rotation, BTree)>,
}

impl Partition {
    fn tree(&self, rotation: Rotation) -> Result<&BTree, IndexError> {
        self.trees
            .iter()
            .find(|(r, _)| *r == rotation)
            .map(|(_, t)| t)
            .ok_or_else(|| IndexError::Internal(format!("rotation {rotation:?} not maintained")))
    }

    fn tree_mut(&mut self, rotation: Rotation) -> Result<&mut BTree, IndexError> {
        self.trees
            .iter_mut()
            .find(|(r, _)| *r == rotation)
            .map(|(_, t)| t)
            .ok_or_else(|| IndexError::Internal(format!("rotation {rotation:?} not maintained")))
    }
}

/// Per-partition statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStats {
    /// Graph atom of the partition.
    pub graph: AtomId,
    /// Entries in the primary rotation (tombstones included).
    pub entries: u64,
    /// Pages allocated across all rotations.
    pub pages: u64,
    /// Depth of the primary rotation's tree.
    pub depth: u32,
}

// ------------------------------------------------------------------------------------------------
// MultiIndex
// ------------------------------------------------------------------------------------------------

/// The coordinated set of per-rotation trees plus the atom store.
#[derive(Debug)]
pub struct MultiIndex {
    dir: PathBuf,
    config: IndexConfig,
    atoms: AtomStore,
    default_graph: AtomId,
    partitions: Vec<Partition>,
    pred_freq: FxHashMap<AtomId, u64>,
    obj_freq: FxHashMap<AtomId, u64>,
}

impl MultiIndex {
    /// Opens (or creates) the multi-index rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>, config: IndexConfig) -> Result<Self, IndexError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        // 1. Atom store first: every key depends on it.
        let mut atoms = AtomStore::open(dir.join("atoms"))?;
        let default_graph = atoms.intern(DEFAULT_GRAPH_TERM)?;

        let mut index = Self {
            dir,
            config,
            atoms,
            default_graph,
            partitions: Vec::new(),
            pred_freq: FxHashMap::default(),
            obj_freq: FxHashMap::default(),
        };

        // 2. Discover existing partitions from the tree files on disk.
        let mut discovered: Vec<AtomId> = Vec::new();
        for entry in fs::read_dir(&index.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(graph) = parse_tree_file(name) {
                if !discovered.contains(&graph) {
                    discovered.push(graph);
                }
            }
        }
        discovered.sort_unstable();
        for graph in discovered {
            index.open_partition(graph)?;
        }

        // 3. The default partition always exists.
        if index.partition_pos(index.default_graph).is_none() {
            index.open_partition(index.default_graph)?;
        }

        // 4. Frequency counters: one primary-rotation scan per partition.
        index.rebuild_counters()?;

        info!(
            partitions = index.partitions.len(),
            temporal = config.temporal,
            triples = index.triple_count(),
            "multi-index opened"
        );
        Ok(index)
    }

    /// The interned default-graph atom.
    pub fn default_graph(&self) -> AtomId {
        self.default_graph
    }

    /// Whether this store maintains the temporal rotation family.
    pub fn is_temporal(&self) -> bool {
        self.config.temporal
    }

    /// Read access to the interner (term resolution for queries).
    pub fn atoms(&self) -> &AtomStore {
        &self.atoms
    }

    /// Entries in the primary rotation across all partitions (temporal
    /// stores count every version, tombstones included).
    pub fn triple_count(&self) -> u64 {
        let primary = self.primary_rotation();
        self.partitions
            .iter()
            .filter_map(|p| p.tree(primary).ok())
            .map(|t| t.entry_count())
            .sum()
    }

    /// Total on-disk footprint: atom chunks plus every tree file.
    pub fn bytes_used(&self) -> u64 {
        let trees: u64 = self
            .partitions
            .iter()
            .flat_map(|p| p.trees.iter())
            .map(|(_, t)| t.file_len())
            .sum();
        trees + self.atoms.bytes_used()
    }

    /// Per-partition statistics, in graph-atom order.
    pub fn partition_stats(&self) -> Result<Vec<PartitionStats>, IndexError> {
        let primary = self.primary_rotation();
        let mut out = Vec::with_capacity(self.partitions.len());
        for part in &self.partitions {
            let tree = part.tree(primary)?;
            out.push(PartitionStats {
                graph: part.graph,
                entries: tree.entry_count(),
                pages: part.trees.iter().map(|(_, t)| t.allocated_pages()).sum(),
                depth: tree.depth()?,
            });
        }
        Ok(out)
    }

    /// Durably flushes the atom store, then fences every tree.
    ///
    /// Atoms flush first: a tree entry must never become durable before the
    /// terms its key refers to.
    pub fn commit(&mut self) -> Result<(), IndexError> {
        self.atoms.flush()?;
        for part in &mut self.partitions {
            for (_, tree) in &mut part.trees {
                tree.commit()?;
            }
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Term plumbing
    // --------------------------------------------------------------------------------------------

    /// Interns a graph term (or resolves the default), enforcing the
    /// named-graphs configuration.
    pub fn graph_atom(&mut self, graph: Option<&[u8]>) -> Result<AtomId, IndexError> {
        match graph {
            None => Ok(self.default_graph),
            Some(term) if term == DEFAULT_GRAPH_TERM => Ok(self.default_graph),
            Some(term) => {
                if !self.config.named_graphs {
                    return Err(IndexError::InvalidInput(
                        "store is configured without named graphs".into(),
                    ));
                }
                Ok(self.atoms.intern(term)?)
            }
        }
    }

    /// Interns an arbitrary term, returning its atom.
    ///
    /// Pattern compilers use this for INSERT terms that the store has never
    /// seen.
    pub fn intern_term(&mut self, bytes: &[u8]) -> Result<AtomId, IndexError> {
        Ok(self.atoms.intern(bytes)?)
    }

    /// Read-only graph resolution; `None` when the term was never interned.
    pub fn resolve_graph(&self, graph: Option<&[u8]>) -> Option<AtomId> {
        match graph {
            None => Some(self.default_graph),
            Some(term) => self.atoms.id_of(term),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Mutation — high level
    // --------------------------------------------------------------------------------------------

    /// Inserts a triple (or quad), interning terms as needed.
    ///
    /// On temporal stores, `validity` defaults to `[now, ∞)` (a *current*
    /// insert); the transaction time is always `now`. On non-temporal
    /// stores, a validity interval is invalid input.
    ///
    /// Returns `false` when the identical triple (same validity, for
    /// temporal stores) was already present.
    pub fn insert(
        &mut self,
        s: &[u8],
        p: &[u8],
        o: &[u8],
        graph: Option<&[u8]>,
        validity: Option<(Timestamp, Timestamp)>,
        now: Timestamp,
    ) -> Result<bool, IndexError> {
        let graph = self.graph_atom(graph)?;
        let s = self.atoms.intern(s)?;
        let p = self.atoms.intern(p)?;
        let o = self.atoms.intern(o)?;

        if self.config.temporal {
            let (valid_from, valid_to) = validity.unwrap_or((now, TIME_MAX));
            let outcome =
                self.insert_temporal(TripleKey::new(s, p, o), valid_from, valid_to, now, graph)?;
            Ok(outcome.changed())
        } else {
            if validity.is_some() {
                return Err(IndexError::InvalidInput(
                    "validity interval on a non-temporal store".into(),
                ));
            }
            self.insert_plain(TripleKey::new(s, p, o), graph)
        }
    }

    /// Deletes a ground triple from every rotation.
    ///
    /// Non-temporal stores remove the entry; temporal stores tombstone every
    /// live version of the triple. Returns the number of logical triples
    /// affected (0 or 1) — version counts are visible through the returned
    /// keys of [`MultiIndex::tombstone_versions`].
    pub fn delete(
        &mut self,
        s: &[u8],
        p: &[u8],
        o: &[u8],
        graph: Option<&[u8]>,
        now: Timestamp,
    ) -> Result<usize, IndexError> {
        let Some(graph) = self.resolve_graph(graph) else {
            return Ok(0);
        };
        let (Some(s), Some(p), Some(o)) = (
            self.atoms.id_of(s),
            self.atoms.id_of(p),
            self.atoms.id_of(o),
        ) else {
            return Ok(0);
        };
        let triple = TripleKey::new(s, p, o);

        if self.config.temporal {
            let touched = self.tombstone_versions(triple, graph, now)?;
            Ok(usize::from(!touched.is_empty()))
        } else {
            Ok(usize::from(self.remove_plain(triple, graph)?))
        }
    }

    // --------------------------------------------------------------------------------------------
    // Mutation — atom-level primitives (also the patch executor's undo set)
    // --------------------------------------------------------------------------------------------

    /// Inserts an already-interned triple into every plain rotation.
    pub fn insert_plain(&mut self, triple: TripleKey, graph: AtomId) -> Result<bool, IndexError> {
        if self.config.temporal {
            return Err(IndexError::Internal(
                "plain insert on a temporal store".into(),
            ));
        }
        let part = self.ensure_partition(graph)?;
        let mut inserted = false;
        for rotation in Rotation::NON_TEMPORAL {
            let key = triple.encode(rotation);
            let tree = part.tree_mut(rotation)?;
            inserted = tree.insert(&key, 0, None)?;
        }
        if inserted {
            bump(&mut self.pred_freq, triple.p, 1);
            bump(&mut self.obj_freq, triple.o, 1);
            trace!(s = triple.s, p = triple.p, o = triple.o, graph, "triple inserted");
        }
        Ok(inserted)
    }

    /// Removes an already-interned triple from every plain rotation.
    pub fn remove_plain(&mut self, triple: TripleKey, graph: AtomId) -> Result<bool, IndexError> {
        let Some(pos) = self.partition_pos(graph) else {
            return Ok(false);
        };
        let mut removed = false;
        for rotation in Rotation::NON_TEMPORAL {
            let key = triple.encode(rotation);
            let tree = self.partitions[pos].tree_mut(rotation)?;
            removed = tree.remove(&key)?;
        }
        if removed {
            bump(&mut self.pred_freq, triple.p, -1);
            bump(&mut self.obj_freq, triple.o, -1);
        }
        Ok(removed)
    }

    /// Inserts one temporal version into every temporal rotation.
    pub fn insert_version(
        &mut self,
        key: &TemporalKey,
        meta: &EntryMeta,
        graph: AtomId,
    ) -> Result<bool, IndexError> {
        let part = self.ensure_partition(graph)?;
        let mut inserted = false;
        for rotation in Rotation::TEMPORAL {
            let encoded = key.encode(rotation);
            let tree = part.tree_mut(rotation)?;
            inserted = tree.insert(&encoded, 0, Some(meta))?;
        }
        if inserted {
            bump(&mut self.pred_freq, key.p, 1);
            bump(&mut self.obj_freq, key.o, 1);
        }
        Ok(inserted)
    }

    /// Hard-removes one temporal version from every temporal rotation.
    ///
    /// Used when a version is being *replaced* (interval truncation, patch
    /// rollback), not when a fact ends — ending a fact is a tombstone.
    pub fn remove_version(&mut self, key: &TemporalKey, graph: AtomId) -> Result<bool, IndexError> {
        let Some(pos) = self.partition_pos(graph) else {
            return Ok(false);
        };
        let mut removed = false;
        for rotation in Rotation::TEMPORAL {
            let encoded = key.encode(rotation);
            let tree = self.partitions[pos].tree_mut(rotation)?;
            removed = tree.remove(&encoded)?;
        }
        if removed {
            bump(&mut self.pred_freq, key.p, -1);
            bump(&mut self.obj_freq, key.o, -1);
        }
        Ok(removed)
    }

    /// Tombstones every live version of `triple`, returning the affected
    /// keys (the undo set for a rollback).
    pub fn tombstone_versions(
        &mut self,
        triple: TripleKey,
        graph: AtomId,
        now: Timestamp,
    ) -> Result<Vec<TemporalKey>, IndexError> {
        let live = self.live_versions(triple, graph)?;
        for key in &live {
            self.set_tombstone(key, graph, true, now)?;
        }
        Ok(live)
    }

    /// Clears the tombstone flag on one version (rollback path).
    pub fn clear_tombstone(
        &mut self,
        key: &TemporalKey,
        graph: AtomId,
        now: Timestamp,
    ) -> Result<bool, IndexError> {
        self.set_tombstone(key, graph, false, now)
    }

    // --------------------------------------------------------------------------------------------
    // Query
    // --------------------------------------------------------------------------------------------

    /// Deterministic index selection from bound positions.
    ///
    /// `time_range_only` marks a fully unconstrained pattern queried with a
    /// time window, which routes to the time-leading rotation.
    pub fn select_rotation(&self, pattern: &ScanPattern, time_range_only: bool) -> Rotation {
        let (s, p, o) = (
            pattern.s.is_some(),
            pattern.p.is_some(),
            pattern.o.is_some(),
        );
        if self.config.temporal {
            if time_range_only && !s && !p && !o {
                return Rotation::Tspo;
            }
            match (s, p, o) {
                (true, false, true) => Rotation::Ospt,
                (true, _, _) => Rotation::Spot,
                (false, true, _) => Rotation::Post,
                (false, false, true) => Rotation::Ospt,
                (false, false, false) => Rotation::Spot,
            }
        } else {
            match (s, p, o) {
                (true, false, true) => Rotation::Osp,
                (true, _, _) => Rotation::Spo,
                (false, true, _) => Rotation::Pos,
                (false, false, true) => Rotation::Osp,
                (false, false, false) => Rotation::Spo,
            }
        }
    }

    /// Streaming scan of every match of `pattern`, canonicalized and
    /// temporal-filtered.
    ///
    /// The temporal predicate must be pre-resolved (no `Current`); it is
    /// invalid input on a non-temporal store.
    pub fn scan(
        &self,
        pattern: ScanPattern,
        predicate: Option<TemporalPredicate>,
    ) -> Result<IndexScan<'_>, IndexError> {
        if predicate.is_some() && !self.config.temporal {
            return Err(IndexError::InvalidInput(
                "temporal predicate on a non-temporal store".into(),
            ));
        }

        let time_range_only = pattern.is_unconstrained()
            && matches!(
                predicate,
                Some(TemporalPredicate::Range { .. }) | Some(TemporalPredicate::AsOf(_))
            );
        let rotation = self.select_rotation(&pattern, time_range_only);
        let (min_key, max_key) = self.bracket(&pattern, rotation, predicate);

        let mut scans = Vec::new();
        for part in &self.partitions {
            if let Some(g) = pattern.graph {
                if part.graph != g {
                    continue;
                }
            }
            let tree = part.tree(rotation)?;
            scans.push((part.graph, tree.range_scan(&min_key, &max_key)?));
        }

        debug!(?rotation, parts = scans.len(), "index scan planned");
        Ok(IndexScan {
            scans,
            current: 0,
            rotation,
            pattern,
            predicate,
        })
    }

    /// Cardinality estimate for a pattern, from the O(1) frequency counters.
    pub fn estimate(&self, s: Option<AtomId>, p: Option<AtomId>, o: Option<AtomId>) -> u64 {
        if s.is_some() && p.is_some() && o.is_some() {
            return 1;
        }
        let mut est = self.triple_count().max(1);
        if let Some(p) = p {
            est = est.min(self.pred_freq.get(&p).copied().unwrap_or(0));
        }
        if let Some(o) = o {
            est = est.min(self.obj_freq.get(&o).copied().unwrap_or(0));
        }
        if s.is_some() {
            est = est.min(SUBJECT_BOUND_ESTIMATE);
        }
        est
    }

    /// All live (non-tombstoned) versions of a triple, in chronological
    /// order.
    pub fn live_versions(
        &self,
        triple: TripleKey,
        graph: AtomId,
    ) -> Result<Vec<TemporalKey>, IndexError> {
        let Some(pos) = self.partition_pos(graph) else {
            return Ok(Vec::new());
        };
        let tree = self.partitions[pos].tree(Rotation::Spot)?;
        let min = TemporalKey::new(triple.s, triple.p, triple.o, TIME_MIN, TIME_MIN, TIME_MIN)
            .encode(Rotation::Spot);
        let max = TemporalKey::new(triple.s, triple.p, triple.o, TIME_MAX, TIME_MAX, TIME_MAX)
            .encode(Rotation::Spot);

        let mut out = Vec::new();
        for entry in tree.range_scan(&min, &max)? {
            let entry = entry?;
            let live = entry.meta.map(|m| !m.is_tombstone()).unwrap_or(true);
            if live {
                out.push(TemporalKey::decode(&entry.key, Rotation::Spot)?);
            }
        }
        Ok(out)
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn primary_rotation(&self) -> Rotation {
        if self.config.temporal {
            Rotation::Spot
        } else {
            Rotation::Spo
        }
    }

    fn maintained(&self) -> &'static [Rotation] {
        if self.config.temporal {
            &Rotation::TEMPORAL
        } else {
            &Rotation::NON_TEMPORAL
        }
    }

    fn partition_pos(&self, graph: AtomId) -> Option<usize> {
        self.partitions.binary_search_by_key(&graph, |p| p.graph).ok()
    }

    fn open_partition(&mut self, graph: AtomId) -> Result<usize, IndexError> {
        let mut trees = Vec::with_capacity(self.maintained().len());
        let layout = if self.config.temporal {
            Layout::TEMPORAL
        } else {
            Layout::TRIPLE
        };
        for &rotation in self.maintained() {
            let path = self.tree_path(graph, rotation);
            trees.push((rotation, BTree::open(path, layout, self.config.cache_pages)?));
        }
        let pos = self
            .partitions
            .binary_search_by_key(&graph, |p| p.graph)
            .unwrap_or_else(|e| e);
        self.partitions.insert(pos, Partition { graph, trees });
        debug!(graph, "partition opened");
        Ok(pos)
    }

    fn ensure_partition(&mut self, graph: AtomId) -> Result<&mut Partition, IndexError> {
        let pos = match self.partition_pos(graph) {
            Some(pos) => pos,
            None => self.open_partition(graph)?,
        };
        Ok(&mut self.partitions[pos])
    }

    fn tree_path(&self, graph: AtomId, rotation: Rotation) -> PathBuf {
        self.dir
            .join(format!("g{graph}-{}.tdb", rotation.file_stem()))
    }

    /// Temporal insert with interval truncation of the overlapping prior
    /// version.
    ///
    /// This is the only write path for temporal assertions — the store
    /// facade and the patch executor both route through it, so interval
    /// validation and the single-valued-current invariant hold everywhere.
    /// The returned outcome is the exact undo image of what happened.
    pub fn insert_temporal(
        &mut self,
        triple: TripleKey,
        valid_from: Timestamp,
        valid_to: Timestamp,
        now: Timestamp,
        graph: AtomId,
    ) -> Result<TemporalInsertOutcome, IndexError> {
        TemporalKey::validate_interval(valid_from, valid_to)?;

        let mut outcome = TemporalInsertOutcome::default();

        // Idempotence is judged on (s, p, o, validity): a re-assertion of
        // the same fact over the same interval is a no-op even though its
        // transaction time would differ.
        let versions = self.live_versions(triple, graph)?;
        if versions
            .iter()
            .any(|v| v.valid_from == valid_from && v.valid_to == valid_to)
        {
            return Ok(outcome);
        }

        // Truncate the prior versions whose intervals still cover the new
        // valid_from, keeping the current view single-valued while
        // preserving history.
        let overlapping: Vec<TemporalKey> = versions
            .into_iter()
            .filter(|v| v.valid_from <= valid_from && valid_from < v.valid_to)
            .collect();
        for prior in overlapping {
            let truncated = self.truncate_version(&prior, valid_from, now, graph)?;
            outcome.truncated.push(truncated);
        }

        let key = TemporalKey::new(triple.s, triple.p, triple.o, valid_from, valid_to, now);

        // A tombstoned version under the identical key (same-millisecond
        // delete then re-assert) is revived rather than shadowed by the
        // idempotent insert below.
        if let Some(pos) = self.partition_pos(graph) {
            let encoded = key.encode(Rotation::Spot);
            let existing = self.partitions[pos]
                .tree(Rotation::Spot)?
                .point_lookup(&encoded)?;
            if let Some(entry) = existing {
                if entry.meta.map(|m| m.is_tombstone()).unwrap_or(false) {
                    self.clear_tombstone(&key, graph, now)?;
                    outcome.revived = Some(key);
                    return Ok(outcome);
                }
            }
        }

        let meta = EntryMeta::new(now);
        if self.insert_version(&key, &meta, graph)? {
            outcome.inserted = Some(key);
        }
        trace!(
            s = triple.s,
            p = triple.p,
            o = triple.o,
            valid_from,
            valid_to,
            graph,
            "temporal version inserted"
        );
        Ok(outcome)
    }

    /// Re-keys `prior` with its interval clipped to end at `cut`.
    ///
    /// `valid_to` is key material, so the old entries are replaced rather
    /// than patched: creation stamp and transaction time carry over, the
    /// version counter bumps, `modified_at` is stamped. A prior version
    /// starting exactly at the cut would be left zero-width, so it is
    /// removed outright — it has been wholly superseded. Returns the undo
    /// image of the clip.
    fn truncate_version(
        &mut self,
        prior: &TemporalKey,
        cut: Timestamp,
        now: Timestamp,
        graph: AtomId,
    ) -> Result<TruncatedVersion, IndexError> {
        let old_meta = self.version_meta(prior, graph)?;
        self.remove_version(prior, graph)?;
        if prior.valid_from == cut {
            debug!(valid_from = prior.valid_from, "zero-width truncation; prior version dropped");
            return Ok(TruncatedVersion {
                original: *prior,
                replacement: None,
                original_meta: old_meta,
            });
        }

        let mut truncated = *prior;
        truncated.valid_to = cut;
        let mut meta = old_meta;
        meta.touch(now);
        self.insert_version(&truncated, &meta, graph)?;
        Ok(TruncatedVersion {
            original: *prior,
            replacement: Some(truncated),
            original_meta: old_meta,
        })
    }

    fn version_meta(&self, key: &TemporalKey, graph: AtomId) -> Result<EntryMeta, IndexError> {
        let Some(pos) = self.partition_pos(graph) else {
            return Err(IndexError::Internal("version in unknown graph".into()));
        };
        let tree = self.partitions[pos].tree(Rotation::Spot)?;
        let encoded = key.encode(Rotation::Spot);
        let entry = tree
            .point_lookup(&encoded)?
            .ok_or_else(|| IndexError::Internal("version vanished mid-operation".into()))?;
        entry
            .meta
            .ok_or_else(|| IndexError::Internal("temporal entry without metadata".into()))
    }

    pub(crate) fn set_tombstone(
        &mut self,
        key: &TemporalKey,
        graph: AtomId,
        value: bool,
        now: Timestamp,
    ) -> Result<bool, IndexError> {
        let Some(pos) = self.partition_pos(graph) else {
            return Ok(false);
        };
        let mut found = false;
        for rotation in Rotation::TEMPORAL {
            let encoded = key.encode(rotation);
            let tree = self.partitions[pos].tree_mut(rotation)?;
            found = tree.update_meta(&encoded, |meta| {
                if value {
                    meta.flags |= crate::keys::META_FLAG_TOMBSTONE;
                } else {
                    meta.flags &= !crate::keys::META_FLAG_TOMBSTONE;
                }
                meta.touch(now);
            })?;
        }
        Ok(found)
    }

    /// Bracket keys spanning every entry the pattern can match under
    /// `rotation`.
    fn bracket(
        &self,
        pattern: &ScanPattern,
        rotation: Rotation,
        predicate: Option<TemporalPredicate>,
    ) -> (Vec<u8>, Vec<u8>) {
        if rotation.is_temporal() {
            // The time-leading rotation can clamp valid_from by the
            // predicate's upper bound; every other temporal rotation spans
            // the full time range after its atom prefix.
            let vf_max = if rotation == Rotation::Tspo {
                match predicate {
                    Some(TemporalPredicate::AsOf(t)) => t,
                    Some(TemporalPredicate::Range { hi, .. }) => hi.saturating_sub(1),
                    _ => TIME_MAX,
                }
            } else {
                TIME_MAX
            };
            let min = TemporalKey::new(
                pattern.s.unwrap_or(ATOM_MIN),
                pattern.p.unwrap_or(ATOM_MIN),
                pattern.o.unwrap_or(ATOM_MIN),
                TIME_MIN,
                TIME_MIN,
                TIME_MIN,
            )
            .encode(rotation);
            let max = TemporalKey::new(
                pattern.s.unwrap_or(ATOM_MAX),
                pattern.p.unwrap_or(ATOM_MAX),
                pattern.o.unwrap_or(ATOM_MAX),
                vf_max,
                TIME_MAX,
                TIME_MAX,
            )
            .encode(rotation);
            (min.to_vec(), max.to_vec())
        } else {
            let min = TripleKey::new(
                pattern.s.unwrap_or(ATOM_MIN),
                pattern.p.unwrap_or(ATOM_MIN),
                pattern.o.unwrap_or(ATOM_MIN),
            )
            .encode(rotation);
            let max = TripleKey::new(
                pattern.s.unwrap_or(ATOM_MAX),
                pattern.p.unwrap_or(ATOM_MAX),
                pattern.o.unwrap_or(ATOM_MAX),
            )
            .encode(rotation);
            (min.to_vec(), max.to_vec())
        }
    }

    fn rebuild_counters(&mut self) -> Result<(), IndexError> {
        let primary = self.primary_rotation();
        let temporal = self.config.temporal;

        let mut pred = FxHashMap::default();
        let mut obj = FxHashMap::default();
        for part in &self.partitions {
            let tree = part.tree(primary)?;
            let (min, max) = full_range(primary);
            for entry in tree.range_scan(&min, &max)? {
                let entry = entry?;
                let (p, o) = if temporal {
                    let key = TemporalKey::decode(&entry.key, primary)?;
                    (key.p, key.o)
                } else {
                    let key = TripleKey::decode(&entry.key, primary)?;
                    (key.p, key.o)
                };
                bump(&mut pred, p, 1);
                bump(&mut obj, o, 1);
            }
        }
        self.pred_freq = pred;
        self.obj_freq = obj;
        Ok(())
    }
}

fn full_range(rotation: Rotation) -> (Vec<u8>, Vec<u8>) {
    if rotation.is_temporal() {
        (
            TemporalKey::new(ATOM_MIN, ATOM_MIN, ATOM_MIN, TIME_MIN, TIME_MIN, TIME_MIN)
                .encode(rotation)
                .to_vec(),
            TemporalKey::new(ATOM_MAX, ATOM_MAX, ATOM_MAX, TIME_MAX, TIME_MAX, TIME_MAX)
                .encode(rotation)
                .to_vec(),
        )
    } else {
        (
            TripleKey::new(ATOM_MIN, ATOM_MIN, ATOM_MIN)
                .encode(rotation)
                .to_vec(),
            TripleKey::new(ATOM_MAX, ATOM_MAX, ATOM_MAX)
                .encode(rotation)
                .to_vec(),
        )
    }
}

fn bump(map: &mut FxHashMap<AtomId, u64>, key: AtomId, delta: i64) {
    let slot = map.entry(key).or_insert(0);
    if delta >= 0 {
        *slot += delta as u64;
    } else {
        *slot = slot.saturating_sub((-delta) as u64);
    }
}

/// Parses `g<atom>-<rot>.tdb` file names back to their graph atom.
fn parse_tree_file(name: &str) -> Option<AtomId> {
    let rest = name.strip_prefix('g')?.strip_suffix(".tdb")?;
    let (graph, stem) = rest.split_once('-')?;
    Rotation::from_file_stem(stem)?;
    graph.parse::<AtomId>().ok()
}

// ------------------------------------------------------------------------------------------------
// IndexScan — streaming canonical matches
// ------------------------------------------------------------------------------------------------

/// Streaming iterator over the matches of one pattern, chaining graph
/// partitions in graph-atom order.
///
/// Every yielded match is post-filtered against all bound positions and the
/// temporal predicate, and remapped to canonical `(s, p, o)` field order.
pub struct IndexScan<'i> {
    scans: Vec<(AtomId, crate::btree::RangeScan<'i>)>,
    current: usize,
    rotation: Rotation,
    pattern: ScanPattern,
    predicate: Option<TemporalPredicate>,
}

impl IndexScan<'_> {
    fn accept(&self, m: &QuadMatch) -> bool {
        if self.pattern.s.map(|s| s != m.s).unwrap_or(false)
            || self.pattern.p.map(|p| p != m.p).unwrap_or(false)
            || self.pattern.o.map(|o| o != m.o).unwrap_or(false)
        {
            return false;
        }
        if let Some(version) = &m.version {
            if version.meta.is_tombstone() {
                return false;
            }
            if let Some(predicate) = &self.predicate {
                if !predicate.accepts(version.valid_from, version.valid_to) {
                    return false;
                }
            }
        }
        true
    }
}

impl Iterator for IndexScan<'_> {
    type Item = Result<QuadMatch, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (graph, scan) = self.scans.get_mut(self.current)?;
            let graph = *graph;
            match scan.next() {
                None => {
                    self.current += 1;
                    continue;
                }
                Some(Err(e)) => return Some(Err(e.into())),
                Some(Ok(entry)) => {
                    let m = if self.rotation.is_temporal() {
                        let key = match TemporalKey::decode(&entry.key, self.rotation) {
                            Ok(key) => key,
                            Err(e) => return Some(Err(e.into())),
                        };
                        let meta = match entry.meta {
                            Some(meta) => meta,
                            None => {
                                return Some(Err(IndexError::Internal(
                                    "temporal entry without metadata".into(),
                                )))
                            }
                        };
                        QuadMatch {
                            s: key.s,
                            p: key.p,
                            o: key.o,
                            graph,
                            version: Some(VersionInfo {
                                valid_from: key.valid_from,
                                valid_to: key.valid_to,
                                tx: key.tx,
                                meta,
                            }),
                        }
                    } else {
                        let key = match TripleKey::decode(&entry.key, self.rotation) {
                            Ok(key) => key,
                            Err(e) => return Some(Err(e.into())),
                        };
                        QuadMatch {
                            s: key.s,
                            p: key.p,
                            o: key.o,
                            graph,
                            version: None,
                        }
                    };
                    if self.accept(&m) {
                        return Some(Ok(m));
                    }
                }
            }
        }
    }
}
