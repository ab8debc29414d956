//! N3 Patch Executor Module
//!
//! This module applies a parsed patch — `{WHERE, DELETES, INSERTS}` — to one
//! target graph as a single batch: WHERE binds variables against the
//! pre-patch state, every binding's DELETES run first, then every binding's
//! INSERTS, and a failure anywhere rolls the whole batch back.
//!
//! ## Design Overview
//!
//! The executor runs under the store's single-writer lock (the caller holds
//! it); readers keep seeing the pre-patch snapshot until the commit fence
//! runs. Temporal inserts go through the same validated write path as
//! direct store inserts, so an INSERT overlapping a live version truncates
//! it there too. Rollback is **compensating**: every applied operation
//! records its exact inverse (re-insert what was removed, remove what was
//! inserted, clear the tombstones that were set, re-seat the intervals
//! truncation clipped), and on failure the inverses run in reverse order —
//! the tombstone/idempotent-insert primitives make each inverse exact.
//!
//! # Validation
//!
//! A patch whose DELETES or INSERTS mention variables while WHERE is absent
//! can never ground them and is rejected as malformed before anything runs.
//! Patterns still containing unbound variables *after* substitution are
//! skipped, per N3 Patch semantics.
//!
//! # Guarantees
//!
//! - **Atomicity:** on failure the post-state triple set equals the
//!   pre-state set and `PatchFailed` is surfaced.
//! - **Counts:** the executor reports how many delete and insert
//!   applications actually changed the store.

#[cfg(test)]
mod tests;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::index::{IndexError, MultiIndex, TemporalInsertOutcome};
use crate::keys::{
    AtomId, TemporalKey, TemporalPredicate, Term, Timestamp, TriplePattern, TripleKey, TIME_MAX,
};
use crate::query::{collect_all, BgpIter, CancelFlag, QueryCtx, QueryError, Solution};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by patch execution.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The patch cannot ground its variables (no WHERE) or is otherwise
    /// structurally invalid.
    #[error("malformed patch: {0}")]
    MalformedPatch(String),

    /// The batch failed and was rolled back.
    #[error("patch failed and was rolled back: {0}")]
    PatchFailed(String),

    /// Error while evaluating WHERE.
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Error from the index layer outside the apply loop.
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

// ------------------------------------------------------------------------------------------------
// Patch shape
// ------------------------------------------------------------------------------------------------

/// A parsed N3 Patch against one target graph.
///
/// Produced by the external patch parser; terms are already compiled to the
/// tagged form.
#[derive(Debug, Clone, Default)]
pub struct N3Patch {
    /// Binding patterns evaluated against the pre-patch graph.
    pub where_patterns: Vec<TriplePattern>,
    /// Patterns deleted once per binding (after substitution).
    pub deletes: Vec<TriplePattern>,
    /// Patterns inserted once per binding (after substitution).
    pub inserts: Vec<TriplePattern>,
}

/// Applied-operation counts reported on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchCounts {
    /// Ground triples whose deletion changed the store.
    pub deleted: usize,
    /// Ground triples whose insertion changed the store.
    pub inserted: usize,
}

// ------------------------------------------------------------------------------------------------
// Applied-op journal — the undo set
// ------------------------------------------------------------------------------------------------

enum AppliedOp {
    /// A plain triple was removed; undo re-inserts it.
    RemovedPlain { triple: TripleKey, graph: AtomId },
    /// Temporal versions were tombstoned; undo clears each flag.
    Tombstoned {
        versions: Vec<TemporalKey>,
        graph: AtomId,
    },
    /// A plain triple was inserted; undo removes it.
    InsertedPlain { triple: TripleKey, graph: AtomId },
    /// A temporal assertion was made; undo removes what it wrote and
    /// re-seats any prior versions its truncation clipped.
    InsertedTemporal {
        outcome: TemporalInsertOutcome,
        graph: AtomId,
    },
}

// ------------------------------------------------------------------------------------------------
// Execution
// ------------------------------------------------------------------------------------------------

/// Applies `patch` against `graph`, returning the applied counts.
///
/// The caller holds the single-writer lock and runs the commit fence after
/// success.
pub fn apply(
    index: &mut MultiIndex,
    patch: &N3Patch,
    graph: AtomId,
    now: Timestamp,
) -> Result<PatchCounts, PatchError> {
    execute(index, patch, graph, now, None)
}

/// Inner executor with an optional fault injection point: fail after `n`
/// applied operations. Tests use it to prove rollback; `apply` passes
/// `None`.
pub(crate) fn execute(
    index: &mut MultiIndex,
    patch: &N3Patch,
    graph: AtomId,
    now: Timestamp,
    fail_after: Option<usize>,
) -> Result<PatchCounts, PatchError> {
    validate(patch)?;

    // 1. Bind WHERE against the pre-patch state. An absent WHERE yields the
    //    single empty binding, so ground DELETES/INSERTS apply once. On a
    //    temporal store WHERE sees the current view.
    let bindings = {
        let predicate = index.is_temporal().then_some(TemporalPredicate::Current);
        let ctx = QueryCtx::new(index, predicate, now, CancelFlag::new());
        let patterns: Vec<TriplePattern> = patch
            .where_patterns
            .iter()
            .map(|p| p.in_graph(graph))
            .collect();
        let mut where_iter = BgpIter::new(&ctx, &patterns)?;
        collect_all(&mut where_iter)?
    };
    debug!(bindings = bindings.len(), "patch WHERE evaluated");

    // 2. Apply, journaling inverses as we go.
    let mut journal: Vec<AppliedOp> = Vec::new();
    let mut counts = PatchCounts::default();
    let mut applied_ops = 0usize;

    let outcome = apply_all(
        index,
        patch,
        graph,
        now,
        &bindings,
        &mut journal,
        &mut counts,
        &mut applied_ops,
        fail_after,
    );

    match outcome {
        Ok(()) => {
            info!(
                deleted = counts.deleted,
                inserted = counts.inserted,
                "patch applied"
            );
            Ok(counts)
        }
        Err(reason) => {
            warn!(%reason, applied = journal.len(), "patch failed; rolling back");
            rollback(index, journal, now);
            Err(PatchError::PatchFailed(reason.to_string()))
        }
    }
}

fn validate(patch: &N3Patch) -> Result<(), PatchError> {
    if patch.where_patterns.is_empty() {
        let has_vars = patch
            .deletes
            .iter()
            .chain(&patch.inserts)
            .any(|p| p.variables().next().is_some());
        if has_vars {
            return Err(PatchError::MalformedPatch(
                "DELETES/INSERTS contain variables but no WHERE binds them".into(),
            ));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_all(
    index: &mut MultiIndex,
    patch: &N3Patch,
    graph: AtomId,
    now: Timestamp,
    bindings: &[Solution],
    journal: &mut Vec<AppliedOp>,
    counts: &mut PatchCounts,
    applied_ops: &mut usize,
    fail_after: Option<usize>,
) -> Result<(), IndexError> {
    let temporal = index.is_temporal();

    // Deletes for every binding first, then inserts for every binding.
    for binding in bindings {
        for pattern in &patch.deletes {
            let Some(triple) = ground(pattern, binding) else {
                // Still-unbound variables: skip, per patch semantics.
                continue;
            };
            check_fault(applied_ops, fail_after)?;
            if temporal {
                let versions = index.tombstone_versions(triple, graph, now)?;
                if !versions.is_empty() {
                    counts.deleted += 1;
                    journal.push(AppliedOp::Tombstoned { versions, graph });
                }
            } else if index.remove_plain(triple, graph)? {
                counts.deleted += 1;
                journal.push(AppliedOp::RemovedPlain { triple, graph });
            }
        }
    }

    for binding in bindings {
        for pattern in &patch.inserts {
            let Some(triple) = ground(pattern, binding) else {
                continue;
            };
            check_fault(applied_ops, fail_after)?;
            if temporal {
                // The shared temporal write path: interval validation plus
                // truncation of any overlapping prior version, so a patch
                // insert keeps the current view single-valued exactly like
                // a direct store insert.
                let outcome = index.insert_temporal(triple, now, TIME_MAX, now, graph)?;
                if outcome.changed() {
                    counts.inserted += 1;
                    journal.push(AppliedOp::InsertedTemporal { outcome, graph });
                }
            } else if index.insert_plain(triple, graph)? {
                counts.inserted += 1;
                journal.push(AppliedOp::InsertedPlain { triple, graph });
            }
        }
    }

    Ok(())
}

/// Substitutes a binding into a pattern; `None` when any position stays
/// unbound.
fn ground(pattern: &TriplePattern, binding: &Solution) -> Option<TripleKey> {
    let resolve = |term: Term| match term {
        Term::Atom(a) => Some(a),
        Term::Var(v) => binding.get(v),
    };
    Some(TripleKey::new(
        resolve(pattern.s)?,
        resolve(pattern.p)?,
        resolve(pattern.o)?,
    ))
}

fn check_fault(applied_ops: &mut usize, fail_after: Option<usize>) -> Result<(), IndexError> {
    if let Some(limit) = fail_after {
        if *applied_ops >= limit {
            return Err(IndexError::Internal("injected patch fault".into()));
        }
    }
    *applied_ops += 1;
    Ok(())
}

/// Runs the journaled inverses in reverse order.
///
/// Inverse failures are logged and skipped: rollback is best-effort per op
/// but the inverses are exact under the primitives' semantics, so a failure
/// here means the storage layer itself is failing.
fn rollback(index: &mut MultiIndex, journal: Vec<AppliedOp>, now: Timestamp) {
    for op in journal.into_iter().rev() {
        let result = match op {
            AppliedOp::RemovedPlain { triple, graph } => {
                index.insert_plain(triple, graph).map(|_| ())
            }
            AppliedOp::Tombstoned { versions, graph } => {
                versions
                    .iter()
                    .try_for_each(|key| index.clear_tombstone(key, graph, now).map(|_| ()))
            }
            AppliedOp::InsertedPlain { triple, graph } => {
                index.remove_plain(triple, graph).map(|_| ())
            }
            AppliedOp::InsertedTemporal { outcome, graph } => {
                undo_temporal_insert(index, &outcome, graph, now)
            }
        };
        if let Err(e) = result {
            warn!(%e, "rollback inverse failed");
        }
    }
}

/// Inverse of one temporal assertion: drop what it wrote, re-seat what its
/// truncation clipped (original keys and metadata restored exactly).
fn undo_temporal_insert(
    index: &mut MultiIndex,
    outcome: &TemporalInsertOutcome,
    graph: AtomId,
    now: Timestamp,
) -> Result<(), IndexError> {
    if let Some(key) = outcome.inserted {
        index.remove_version(&key, graph)?;
    }
    if let Some(key) = outcome.revived {
        index.set_tombstone(&key, graph, true, now)?;
    }
    for clipped in outcome.truncated.iter().rev() {
        if let Some(replacement) = clipped.replacement {
            index.remove_version(&replacement, graph)?;
        }
        index.insert_version(&clipped.original, &clipped.original_meta, graph)?;
    }
    Ok(())
}
