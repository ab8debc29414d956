//! Solution modifiers: DISTINCT, ORDER BY, LIMIT/OFFSET.
//!
//! DISTINCT streams with an atom-tuple set. ORDER BY is the one modifier
//! that must buffer: the input is drained on first `advance()` and sorted
//! with a stable sort so listed keys act as primary/secondary/... in order.
//! LIMIT/OFFSET stream over whatever sits below them (post-ORDER when
//! composed that way).

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::keys::{AtomId, VarId};

use super::expr::{lexical_form, parse_numeric};
use super::{QueryCtx, QueryError, Solution, SolutionIter};

// ------------------------------------------------------------------------------------------------
// DISTINCT
// ------------------------------------------------------------------------------------------------

/// Drops solutions whose full binding tuple was already emitted.
pub struct DistinctIter<'s> {
    ctx: QueryCtx<'s>,
    inner: Box<dyn SolutionIter + 's>,
    seen: FxHashSet<SmallVec<[(VarId, AtomId); 8]>>,
}

impl<'s> DistinctIter<'s> {
    /// Wraps `inner`.
    pub fn new(ctx: &QueryCtx<'s>, inner: Box<dyn SolutionIter + 's>) -> Self {
        Self {
            ctx: ctx.clone(),
            inner,
            seen: FxHashSet::default(),
        }
    }
}

impl SolutionIter for DistinctIter<'_> {
    fn advance(&mut self) -> Result<bool, QueryError> {
        self.ctx.check()?;
        while self.inner.advance()? {
            if self.seen.insert(self.inner.current().canonical()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn current(&self) -> &Solution {
        self.inner.current()
    }
}

// ------------------------------------------------------------------------------------------------
// ORDER BY
// ------------------------------------------------------------------------------------------------

/// One ORDER BY key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    /// Variable whose binding orders the rows.
    pub var: VarId,
    /// Descending instead of ascending.
    pub descending: bool,
}

impl SortKey {
    /// Ascending key on `var`.
    pub fn asc(var: VarId) -> Self {
        Self {
            var,
            descending: false,
        }
    }

    /// Descending key on `var`.
    pub fn desc(var: VarId) -> Self {
        Self {
            var,
            descending: true,
        }
    }
}

/// Buffering stable sort over the full input.
///
/// Term order is numeric when both values parse as numeric literals,
/// lexicographic on the lexical form otherwise; unbound sorts first.
pub struct OrderByIter<'s> {
    ctx: QueryCtx<'s>,
    inner: Option<Box<dyn SolutionIter + 's>>,
    keys: Vec<SortKey>,
    buffer: Vec<Solution>,
    idx: usize,
    current: Solution,
}

impl<'s> OrderByIter<'s> {
    /// Wraps `inner` with the listed sort keys (primary first).
    pub fn new(
        ctx: &QueryCtx<'s>,
        inner: Box<dyn SolutionIter + 's>,
        keys: Vec<SortKey>,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            inner: Some(inner),
            keys,
            buffer: Vec::new(),
            idx: 0,
            current: Solution::new(),
        }
    }

    fn drain_and_sort(&mut self) -> Result<(), QueryError> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        while inner.advance()? {
            self.ctx.check()?;
            self.buffer.push(inner.current().clone());
        }

        let atoms = self.ctx.index.atoms();
        let keys = self.keys.clone();
        // Stable: equal keys keep their upstream order.
        self.buffer.sort_by(|a, b| {
            for key in &keys {
                let ord = compare_bindings(a.get(key.var), b.get(key.var), atoms);
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        Ok(())
    }
}

impl SolutionIter for OrderByIter<'_> {
    fn advance(&mut self) -> Result<bool, QueryError> {
        self.ctx.check()?;
        self.drain_and_sort()?;
        if self.idx >= self.buffer.len() {
            return Ok(false);
        }
        self.current = self.buffer[self.idx].clone();
        self.idx += 1;
        Ok(true)
    }

    fn current(&self) -> &Solution {
        &self.current
    }
}

fn compare_bindings(
    a: Option<AtomId>,
    b: Option<AtomId>,
    atoms: &crate::atoms::AtomStore,
) -> std::cmp::Ordering {
    match (a, b) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => {
            if x == y {
                return std::cmp::Ordering::Equal;
            }
            let tx = atoms
                .lookup(x)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            let ty = atoms
                .lookup(y)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            match (parse_numeric(&tx), parse_numeric(&ty)) {
                (Some(nx), Some(ny)) => {
                    nx.partial_cmp(&ny).unwrap_or(std::cmp::Ordering::Equal)
                }
                _ => lexical_form(&tx).cmp(lexical_form(&ty)),
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// LIMIT / OFFSET
// ------------------------------------------------------------------------------------------------

/// Skips `offset` solutions, then yields at most `limit`.
pub struct SliceIter<'s> {
    ctx: QueryCtx<'s>,
    inner: Box<dyn SolutionIter + 's>,
    offset: usize,
    limit: Option<usize>,
    skipped: bool,
    yielded: usize,
}

impl<'s> SliceIter<'s> {
    /// Wraps `inner` with OFFSET `offset` and optional LIMIT `limit`.
    pub fn new(
        ctx: &QueryCtx<'s>,
        inner: Box<dyn SolutionIter + 's>,
        offset: usize,
        limit: Option<usize>,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            inner,
            offset,
            limit,
            skipped: false,
            yielded: 0,
        }
    }
}

impl SolutionIter for SliceIter<'_> {
    fn advance(&mut self) -> Result<bool, QueryError> {
        self.ctx.check()?;
        if !self.skipped {
            for _ in 0..self.offset {
                if !self.inner.advance()? {
                    self.skipped = true;
                    return Ok(false);
                }
            }
            self.skipped = true;
        }
        if let Some(limit) = self.limit {
            if self.yielded >= limit {
                return Ok(false);
            }
        }
        if self.inner.advance()? {
            self.yielded += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn current(&self) -> &Solution {
        self.inner.current()
    }
}
