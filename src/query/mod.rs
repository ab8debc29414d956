//! Streaming Query Operator Module
//!
//! This module implements the **pull-based**, **single-threaded** operator
//! layer over the multi-index store: pattern matching, basic graph patterns
//! with selectivity-driven reordering, OPTIONAL / UNION, FILTER expressions,
//! property paths, solution modifiers, and aggregates.
//!
//! ## Design Overview
//!
//! Every operator exposes the same two calls:
//!
//! - `advance() -> Result<bool, QueryError>` — move to the next solution,
//!   `false` at end of stream;
//! - `current() -> &Solution` — borrow the solution produced by the last
//!   successful `advance()`.
//!
//! Nothing is materialized unless the semantics require it (ORDER BY buffers,
//! hash-join builds one side, aggregates accumulate); everything else
//! streams one solution at a time. Operators never await — callers may
//! suspend between `advance()` calls, and every `advance()` checks the
//! query's cooperative cancellation flag first.
//!
//! A [`Solution`] is a fixed-capacity record mapping query-local variable
//! ids to atoms; typical pattern widths stay inline, wider queries spill to
//! the heap.
//!
//! # Join strategy
//!
//! A basic graph pattern is greedily reordered by ascending cardinality
//! estimate (from the index's O(1) frequency counters), then folded
//! left-deep. Each subsequent pattern joins by **indexed nested-loop** when
//! its estimate under the already-bound variables is small, and by **hash
//! join** (build = the estimated-smaller pattern side, probe = the stream)
//! when both sides are large.
//!
//! # Failure model
//!
//! Value-level trouble (non-numeric arithmetic, unparsable literals,
//! unbound variables in expressions) degrades to unbound/dropped rows.
//! Storage-level trouble aborts the query: errors surface once through
//! `advance()` and the operator is terminal afterwards.

pub mod aggregate;
pub mod expr;
pub mod modifiers;
pub mod path;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, trace};

use crate::index::{IndexError, IndexScan, MultiIndex, ScanPattern};
use crate::keys::{AtomId, TemporalPredicate, Term, Timestamp, TriplePattern, VarId};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// A right-hand pattern estimated at or below this joins by indexed
/// nested-loop; anything larger builds a hash table instead.
const NESTED_LOOP_THRESHOLD: u64 = 1_024;

/// Estimate assigned to a pattern position whose variable an earlier
/// pattern binds: selective, but not a known constant.
const JOIN_BOUND_ESTIMATE: u64 = 32;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by query operators.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Error from the index/storage layer; aborts the query.
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// The cooperative cancellation flag was set.
    #[error("query cancelled")]
    Cancelled,

    /// Malformed query construct.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Cancellation
// ------------------------------------------------------------------------------------------------

/// Cooperatively-set cancellation flag shared by every operator of one
/// query. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A fresh, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; every operator observes it on its next
    /// `advance()`.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ------------------------------------------------------------------------------------------------
// Solution
// ------------------------------------------------------------------------------------------------

/// A partial mapping from query-local variable ids to atoms.
///
/// Fixed-capacity inline for up to eight bindings; wider solutions spill to
/// the heap once and stay there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Solution {
    bindings: SmallVec<[(VarId, AtomId); 8]>,
}

impl Solution {
    /// The empty solution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bound variables.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// The atom bound to `var`, if any.
    pub fn get(&self, var: VarId) -> Option<AtomId> {
        self.bindings
            .iter()
            .find(|(v, _)| *v == var)
            .map(|(_, a)| *a)
    }

    /// Binds `var` to `atom`.
    ///
    /// Returns `false` — leaving the solution unchanged — when `var` is
    /// already bound to a *different* atom (join incompatibility).
    pub fn bind(&mut self, var: VarId, atom: AtomId) -> bool {
        match self.get(var) {
            Some(existing) => existing == atom,
            None => {
                self.bindings.push((var, atom));
                true
            }
        }
    }

    /// Iterates `(var, atom)` pairs in binding order.
    pub fn iter(&self) -> impl Iterator<Item = (VarId, AtomId)> + '_ {
        self.bindings.iter().copied()
    }

    /// Merges two solutions; `None` when any shared variable disagrees.
    pub fn merged(&self, other: &Solution) -> Option<Solution> {
        let mut out = self.clone();
        for (var, atom) in other.iter() {
            if !out.bind(var, atom) {
                return None;
            }
        }
        Some(out)
    }

    /// Atom tuple for `vars`, with the sentinel minimum for unbound
    /// positions — the hash-join and GROUP BY key shape.
    pub fn key_for(&self, vars: &[VarId]) -> SmallVec<[AtomId; 4]> {
        vars.iter()
            .map(|v| self.get(*v).unwrap_or(crate::keys::ATOM_MIN))
            .collect()
    }

    /// Canonical (sorted) binding tuple, the DISTINCT identity.
    pub fn canonical(&self) -> SmallVec<[(VarId, AtomId); 8]> {
        let mut tuple = self.bindings.clone();
        tuple.sort_unstable();
        tuple
    }
}

// ------------------------------------------------------------------------------------------------
// Operator trait
// ------------------------------------------------------------------------------------------------

/// The pull interface every operator implements.
pub trait SolutionIter {
    /// Moves to the next solution; `Ok(false)` at end of stream. After an
    /// error the operator is terminal.
    fn advance(&mut self) -> Result<bool, QueryError>;

    /// The solution produced by the last successful [`advance`](Self::advance).
    fn current(&self) -> &Solution;
}

/// Drains an operator into a vector (the patch executor's WHERE bag, test
/// helpers).
pub fn collect_all(iter: &mut dyn SolutionIter) -> Result<Vec<Solution>, QueryError> {
    let mut out = Vec::new();
    while iter.advance()? {
        out.push(iter.current().clone());
    }
    Ok(out)
}

// ------------------------------------------------------------------------------------------------
// Query context
// ------------------------------------------------------------------------------------------------

/// Shared per-query state: the index snapshot, the cancellation flag, and
/// the resolved temporal predicate.
#[derive(Clone)]
pub struct QueryCtx<'s> {
    /// The index being queried; the borrow pins the reader snapshot.
    pub index: &'s MultiIndex,
    /// Cancellation flag checked on every `advance()`.
    pub cancel: CancelFlag,
    /// Temporal predicate applied to every pattern scan, already resolved
    /// (`Current` → `AsOf(now)`).
    pub predicate: Option<TemporalPredicate>,
}

impl<'s> QueryCtx<'s> {
    /// Builds a context, resolving `Current` against `now`.
    pub fn new(
        index: &'s MultiIndex,
        predicate: Option<TemporalPredicate>,
        now: Timestamp,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            index,
            cancel,
            predicate: predicate.map(|p| p.resolve(now)),
        }
    }

    fn check(&self) -> Result<(), QueryError> {
        if self.cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Pattern scan
// ------------------------------------------------------------------------------------------------

fn term_atom(term: Term, seed: &Solution) -> Option<AtomId> {
    match term {
        Term::Atom(a) => Some(a),
        Term::Var(v) => seed.get(v),
    }
}

/// Streams the matches of one triple pattern as solutions.
///
/// Wraps an index scan directly — no buffering. Seed bindings substitute
/// into the pattern before the scan is planned and are carried through to
/// every produced solution.
pub struct PatternScan<'s> {
    ctx: QueryCtx<'s>,
    pattern: TriplePattern,
    seed: Solution,
    scan: IndexScan<'s>,
    current: Solution,
}

impl<'s> PatternScan<'s> {
    /// Plans a scan for `pattern` under `seed` bindings.
    pub fn new(
        ctx: &QueryCtx<'s>,
        pattern: &TriplePattern,
        seed: &Solution,
    ) -> Result<Self, QueryError> {
        let scan_pattern = ScanPattern {
            s: term_atom(pattern.s, seed),
            p: term_atom(pattern.p, seed),
            o: term_atom(pattern.o, seed),
            graph: pattern.graph,
        };
        let scan = ctx.index.scan(scan_pattern, ctx.predicate)?;
        Ok(Self {
            ctx: ctx.clone(),
            pattern: *pattern,
            seed: seed.clone(),
            scan,
            current: Solution::new(),
        })
    }
}

impl SolutionIter for PatternScan<'_> {
    fn advance(&mut self) -> Result<bool, QueryError> {
        self.ctx.check()?;
        for m in self.scan.by_ref() {
            let m = m?;
            let mut sol = self.seed.clone();
            let mut compatible = true;
            for (term, atom) in [
                (self.pattern.s, m.s),
                (self.pattern.p, m.p),
                (self.pattern.o, m.o),
            ] {
                if let Term::Var(v) = term {
                    if !sol.bind(v, atom) {
                        // Repeated variable bound to two different atoms in
                        // this match.
                        compatible = false;
                        break;
                    }
                }
            }
            if compatible {
                self.current = sol;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn current(&self) -> &Solution {
        &self.current
    }
}

// ------------------------------------------------------------------------------------------------
// Joins
// ------------------------------------------------------------------------------------------------

/// Indexed nested-loop join: re-issues the right pattern as a fresh indexed
/// scan for every left solution.
pub struct NestedLoopJoin<'s> {
    ctx: QueryCtx<'s>,
    left: Box<dyn SolutionIter + 's>,
    pattern: TriplePattern,
    right: Option<PatternScan<'s>>,
    current: Solution,
}

impl<'s> NestedLoopJoin<'s> {
    /// Joins `left` with an indexed scan of `pattern`.
    pub fn new(
        ctx: &QueryCtx<'s>,
        left: Box<dyn SolutionIter + 's>,
        pattern: &TriplePattern,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            left,
            pattern: *pattern,
            right: None,
            current: Solution::new(),
        }
    }
}

impl SolutionIter for NestedLoopJoin<'_> {
    fn advance(&mut self) -> Result<bool, QueryError> {
        self.ctx.check()?;
        loop {
            if let Some(right) = &mut self.right {
                if right.advance()? {
                    self.current = right.current().clone();
                    return Ok(true);
                }
                self.right = None;
            }
            if !self.left.advance()? {
                return Ok(false);
            }
            self.right = Some(PatternScan::new(&self.ctx, &self.pattern, self.left.current())?);
        }
    }

    fn current(&self) -> &Solution {
        &self.current
    }
}

/// Hash join keyed on the shared variables' atom tuples.
///
/// The build side is materialized into an open-addressing multimap on the
/// first `advance()`; the probe side streams.
pub struct HashJoin<'s> {
    ctx: QueryCtx<'s>,
    probe: Box<dyn SolutionIter + 's>,
    build_src: Option<Box<dyn SolutionIter + 's>>,
    join_vars: SmallVec<[VarId; 4]>,
    table: rustc_hash::FxHashMap<SmallVec<[AtomId; 4]>, Vec<Solution>>,
    bucket: Vec<Solution>,
    bucket_idx: usize,
    probe_sol: Solution,
    current: Solution,
}

impl<'s> HashJoin<'s> {
    /// Joins `probe` against a materialized `build` on `join_vars`.
    pub fn new(
        ctx: &QueryCtx<'s>,
        probe: Box<dyn SolutionIter + 's>,
        build: Box<dyn SolutionIter + 's>,
        join_vars: SmallVec<[VarId; 4]>,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            probe,
            build_src: Some(build),
            join_vars,
            table: rustc_hash::FxHashMap::default(),
            bucket: Vec::new(),
            bucket_idx: 0,
            probe_sol: Solution::new(),
            current: Solution::new(),
        }
    }

    fn build_table(&mut self) -> Result<(), QueryError> {
        let Some(mut src) = self.build_src.take() else {
            return Ok(());
        };
        let mut rows = 0usize;
        while src.advance()? {
            self.ctx.check()?;
            let sol = src.current().clone();
            let key = sol.key_for(&self.join_vars);
            self.table.entry(key).or_default().push(sol);
            rows += 1;
        }
        debug!(rows, keys = self.table.len(), "hash-join build side materialized");
        Ok(())
    }
}

impl SolutionIter for HashJoin<'_> {
    fn advance(&mut self) -> Result<bool, QueryError> {
        self.ctx.check()?;
        self.build_table()?;
        loop {
            while self.bucket_idx < self.bucket.len() {
                let candidate = &self.bucket[self.bucket_idx];
                self.bucket_idx += 1;
                if let Some(merged) = self.probe_sol.merged(candidate) {
                    self.current = merged;
                    return Ok(true);
                }
            }
            if !self.probe.advance()? {
                return Ok(false);
            }
            self.probe_sol = self.probe.current().clone();
            let key = self.probe_sol.key_for(&self.join_vars);
            self.bucket = self.table.get(&key).cloned().unwrap_or_default();
            self.bucket_idx = 0;
        }
    }

    fn current(&self) -> &Solution {
        &self.current
    }
}

// ------------------------------------------------------------------------------------------------
// Basic graph pattern
// ------------------------------------------------------------------------------------------------

/// A basic graph pattern folded into a left-deep operator chain.
///
/// Patterns are reordered greedily by ascending cardinality estimate before
/// execution; later patterns see the variables earlier ones bind.
pub struct BgpIter<'s> {
    chain: Box<dyn SolutionIter + 's>,
}

impl<'s> BgpIter<'s> {
    /// Plans a BGP over `patterns` with no outer bindings.
    pub fn new(ctx: &QueryCtx<'s>, patterns: &[TriplePattern]) -> Result<Self, QueryError> {
        Self::with_seed(ctx, patterns, &Solution::new())
    }

    /// Plans a BGP whose patterns are pre-substituted with `seed` bindings
    /// (the OPTIONAL and patch-WHERE entry point).
    pub fn with_seed(
        ctx: &QueryCtx<'s>,
        patterns: &[TriplePattern],
        seed: &Solution,
    ) -> Result<Self, QueryError> {
        if patterns.is_empty() {
            return Ok(Self {
                chain: Box::new(OnceIter::new(seed.clone())),
            });
        }

        let order = plan_order(ctx, patterns, seed);
        trace!(?order, "bgp pattern order");

        let mut bound: SmallVec<[VarId; 8]> = SmallVec::new();
        for (v, _) in seed.iter() {
            bound.push(v);
        }

        let first = &patterns[order[0]];
        note_bound(&mut bound, first);
        let mut chain: Box<dyn SolutionIter + 's> =
            Box::new(PatternScan::new(ctx, first, seed)?);

        for &idx in &order[1..] {
            let pattern = &patterns[idx];
            let estimate = pattern_estimate(ctx, pattern, &bound, seed);
            let shared = shared_vars(pattern, &bound);

            chain = if estimate <= NESTED_LOOP_THRESHOLD || shared.is_empty() {
                Box::new(NestedLoopJoin::new(ctx, chain, pattern))
            } else {
                let build = Box::new(PatternScan::new(ctx, pattern, seed)?);
                Box::new(HashJoin::new(ctx, chain, build, shared))
            };
            note_bound(&mut bound, pattern);
        }

        Ok(Self { chain })
    }
}

impl SolutionIter for BgpIter<'_> {
    fn advance(&mut self) -> Result<bool, QueryError> {
        self.chain.advance()
    }

    fn current(&self) -> &Solution {
        self.chain.current()
    }
}

/// Greedy ordering: repeatedly take the lowest-estimate pattern given the
/// variables bound so far.
fn plan_order(ctx: &QueryCtx<'_>, patterns: &[TriplePattern], seed: &Solution) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..patterns.len()).collect();
    let mut bound: SmallVec<[VarId; 8]> = SmallVec::new();
    for (v, _) in seed.iter() {
        bound.push(v);
    }

    let mut order = Vec::with_capacity(patterns.len());
    while !remaining.is_empty() {
        let best = remaining
            .iter()
            .enumerate()
            .min_by_key(|&(_, &idx)| pattern_estimate(ctx, &patterns[idx], &bound, seed))
            .map(|(pos, _)| pos)
            .unwrap_or(0);
        let idx = remaining.swap_remove(best);
        note_bound(&mut bound, &patterns[idx]);
        order.push(idx);
    }
    order
}

fn note_bound(bound: &mut SmallVec<[VarId; 8]>, pattern: &TriplePattern) {
    for v in pattern.variables() {
        if !bound.contains(&v) {
            bound.push(v);
        }
    }
}

fn shared_vars(pattern: &TriplePattern, bound: &[VarId]) -> SmallVec<[VarId; 4]> {
    let mut out = SmallVec::new();
    for v in pattern.variables() {
        if bound.contains(&v) && !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

/// Estimate for a pattern given seed bindings and variables bound upstream.
fn pattern_estimate(
    ctx: &QueryCtx<'_>,
    pattern: &TriplePattern,
    bound: &[VarId],
    seed: &Solution,
) -> u64 {
    let atom = |term: Term| term_atom(term, seed);
    let mut est = ctx
        .index
        .estimate(atom(pattern.s), atom(pattern.p), atom(pattern.o));
    let var_is_bound = |term: Term| matches!(term, Term::Var(v) if bound.contains(&v));
    if var_is_bound(pattern.s) || var_is_bound(pattern.o) || var_is_bound(pattern.p) {
        est = est.min(JOIN_BOUND_ESTIMATE);
    }
    est
}

/// Yields exactly one fixed solution — the empty-BGP identity.
struct OnceIter {
    solution: Solution,
    done: bool,
}

impl OnceIter {
    fn new(solution: Solution) -> Self {
        Self {
            solution,
            done: false,
        }
    }
}

impl SolutionIter for OnceIter {
    fn advance(&mut self) -> Result<bool, QueryError> {
        if self.done {
            return Ok(false);
        }
        self.done = true;
        Ok(true)
    }

    fn current(&self) -> &Solution {
        &self.solution
    }
}

// ------------------------------------------------------------------------------------------------
// OPTIONAL — left outer join
// ------------------------------------------------------------------------------------------------

/// Left outer join: every left solution survives; matching right solutions
/// extend it, a matchless right leaves its variables unbound.
pub struct OptionalIter<'s> {
    ctx: QueryCtx<'s>,
    left: Box<dyn SolutionIter + 's>,
    right_patterns: Vec<TriplePattern>,
    right: Option<BgpIter<'s>>,
    right_matched: bool,
    current: Solution,
}

impl<'s> OptionalIter<'s> {
    /// Wraps `left` with an optional group of `right_patterns`.
    pub fn new(
        ctx: &QueryCtx<'s>,
        left: Box<dyn SolutionIter + 's>,
        right_patterns: Vec<TriplePattern>,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            left,
            right_patterns,
            right: None,
            right_matched: false,
            current: Solution::new(),
        }
    }
}

impl SolutionIter for OptionalIter<'_> {
    fn advance(&mut self) -> Result<bool, QueryError> {
        self.ctx.check()?;
        loop {
            if let Some(right) = &mut self.right {
                if right.advance()? {
                    self.right_matched = true;
                    self.current = right.current().clone();
                    return Ok(true);
                }
                let matched = self.right_matched;
                self.right = None;
                if !matched {
                    // No right match: emit the bare left solution.
                    self.current = self.left.current().clone();
                    return Ok(true);
                }
            }
            if !self.left.advance()? {
                return Ok(false);
            }
            self.right_matched = false;
            self.right = Some(BgpIter::with_seed(
                &self.ctx,
                &self.right_patterns,
                self.left.current(),
            )?);
        }
    }

    fn current(&self) -> &Solution {
        &self.current
    }
}

// ------------------------------------------------------------------------------------------------
// UNION — concatenation
// ------------------------------------------------------------------------------------------------

/// Concatenates two solution streams; variables absent on one side simply
/// stay unbound on that side's rows.
pub struct UnionIter<'s> {
    ctx: QueryCtx<'s>,
    left: Box<dyn SolutionIter + 's>,
    right: Box<dyn SolutionIter + 's>,
    on_right: bool,
}

impl<'s> UnionIter<'s> {
    /// Left stream first, then the right.
    pub fn new(
        ctx: &QueryCtx<'s>,
        left: Box<dyn SolutionIter + 's>,
        right: Box<dyn SolutionIter + 's>,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            left,
            right,
            on_right: false,
        }
    }
}

impl SolutionIter for UnionIter<'_> {
    fn advance(&mut self) -> Result<bool, QueryError> {
        self.ctx.check()?;
        if !self.on_right {
            if self.left.advance()? {
                return Ok(true);
            }
            self.on_right = true;
        }
        self.right.advance()
    }

    fn current(&self) -> &Solution {
        if self.on_right {
            self.right.current()
        } else {
            self.left.current()
        }
    }
}
