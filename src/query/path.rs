//! Property-path evaluation.
//!
//! Evaluates a path expression to its set of reachable `(start, end)` pairs
//! with **set semantics**: each pair is produced at most once per query,
//! carrying the length of a *shortest* witnessing path for diagnostics.
//!
//! Transitive closures run breadth-first with a visited set per source, so
//! cycles terminate and pairs surface in increasing path-length order. The
//! frontier uses an inline small-buffer that spills to the heap on dense
//! graphs; per-step work allocates nothing beyond that.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::index::ScanPattern;
use crate::keys::{AtomId, Term};

use super::{QueryCtx, QueryError, Solution, SolutionIter};

// ------------------------------------------------------------------------------------------------
// Path expression tree
// ------------------------------------------------------------------------------------------------

/// A property-path expression over predicate atoms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathExpr {
    /// An atomic predicate step.
    Pred(AtomId),
    /// `^E` — swap start and end.
    Inverse(Box<PathExpr>),
    /// `E1 / E2` — sequence through a projected-out intermediate.
    Seq(Box<PathExpr>, Box<PathExpr>),
    /// `E1 | E2` — union of pair sets.
    Alt(Box<PathExpr>, Box<PathExpr>),
    /// `E?` — the path or the empty step.
    ZeroOrOne(Box<PathExpr>),
    /// `E+` — transitive closure, one step minimum.
    OneOrMore(Box<PathExpr>),
    /// `E*` — transitive closure with the empty step.
    ZeroOrMore(Box<PathExpr>),
    /// `!(p1|…|pn)` — any predicate outside the set.
    NegatedSet(Vec<AtomId>),
}

/// One reachable pair with its shortest witnessed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathMatch {
    /// Path start node.
    pub start: AtomId,
    /// Path end node.
    pub end: AtomId,
    /// Shortest number of atomic steps witnessing the pair (0 for the
    /// reflexive pairs of `E?` / `E*`).
    pub length: u32,
}

// ------------------------------------------------------------------------------------------------
// Evaluation
// ------------------------------------------------------------------------------------------------

type PairMap = FxHashMap<(AtomId, AtomId), u32>;

/// Evaluates `expr`, restricted by optional ground `start` / `end` nodes
/// and an optional graph, returning pairs sorted by increasing length.
pub fn eval_path(
    ctx: &QueryCtx<'_>,
    expr: &PathExpr,
    start: Option<AtomId>,
    end: Option<AtomId>,
    graph: Option<AtomId>,
) -> Result<Vec<PathMatch>, QueryError> {
    let pairs = pair_set(ctx, expr, start, graph)?;

    let mut out: Vec<PathMatch> = pairs
        .into_iter()
        .filter(|((s, e), _)| start.map(|a| a == *s).unwrap_or(true) && end.map(|a| a == *e).unwrap_or(true))
        .map(|((s, e), length)| PathMatch {
            start: s,
            end: e,
            length,
        })
        .collect();
    out.sort_unstable_by_key(|m| (m.length, m.start, m.end));
    Ok(out)
}

/// Pair set of `expr` keyed `(start, end) → shortest length`.
///
/// `source` restricts closure expansion to one start node when the query
/// binds it; every other shape computes its full (graph-restricted) set and
/// lets the caller filter.
fn pair_set(
    ctx: &QueryCtx<'_>,
    expr: &PathExpr,
    source: Option<AtomId>,
    graph: Option<AtomId>,
) -> Result<PairMap, QueryError> {
    ctx.check()?;
    match expr {
        PathExpr::Pred(p) => {
            let mut out = PairMap::default();
            for m in ctx.index.scan(
                ScanPattern {
                    s: source,
                    p: Some(*p),
                    o: None,
                    graph,
                },
                ctx.predicate,
            )? {
                let m = m?;
                insert_min(&mut out, (m.s, m.o), 1);
            }
            Ok(out)
        }

        PathExpr::Inverse(inner) => {
            // The inversion swaps ends, so a bound start becomes a bound
            // end of the inner expression — which we cannot push down as a
            // source; compute unrestricted and flip.
            let inner_pairs = pair_set(ctx, inner, None, graph)?;
            let mut out = PairMap::default();
            for ((s, e), len) in inner_pairs {
                if source.map(|a| a == e).unwrap_or(true) {
                    insert_min(&mut out, (e, s), len);
                }
            }
            Ok(out)
        }

        PathExpr::Seq(a, b) => {
            let left = pair_set(ctx, a, source, graph)?;
            let right = pair_set(ctx, b, None, graph)?;
            // Join on the intermediate node, which is projected out.
            let mut by_start: FxHashMap<AtomId, SmallVec<[(AtomId, u32); 4]>> =
                FxHashMap::default();
            for ((s, e), len) in &right {
                by_start.entry(*s).or_default().push((*e, *len));
            }
            let mut out = PairMap::default();
            for ((s, mid), len_a) in left {
                if let Some(ends) = by_start.get(&mid) {
                    for (e, len_b) in ends {
                        insert_min(&mut out, (s, *e), len_a + len_b);
                    }
                }
            }
            Ok(out)
        }

        PathExpr::Alt(a, b) => {
            let mut out = pair_set(ctx, a, source, graph)?;
            for (pair, len) in pair_set(ctx, b, source, graph)? {
                insert_min(&mut out, pair, len);
            }
            Ok(out)
        }

        PathExpr::ZeroOrOne(inner) => {
            let mut out = pair_set(ctx, inner, source, graph)?;
            for node in reflexive_nodes(ctx, source, graph)? {
                insert_min(&mut out, (node, node), 0);
            }
            Ok(out)
        }

        PathExpr::OneOrMore(inner) => closure(ctx, inner, source, graph),

        PathExpr::ZeroOrMore(inner) => {
            let mut out = closure(ctx, inner, source, graph)?;
            for node in reflexive_nodes(ctx, source, graph)? {
                insert_min(&mut out, (node, node), 0);
            }
            Ok(out)
        }

        PathExpr::NegatedSet(excluded) => {
            let mut out = PairMap::default();
            for m in ctx.index.scan(
                ScanPattern {
                    s: source,
                    p: None,
                    o: None,
                    graph,
                },
                ctx.predicate,
            )? {
                let m = m?;
                if !excluded.contains(&m.p) {
                    insert_min(&mut out, (m.s, m.o), 1);
                }
            }
            Ok(out)
        }
    }
}

/// Transitive closure of `inner` by breadth-first frontier expansion.
///
/// Sources are the bound start when given, otherwise every node with an
/// outgoing edge. A per-source visited set kills cycles; BFS order makes
/// the recorded length the shortest one.
fn closure(
    ctx: &QueryCtx<'_>,
    inner: &PathExpr,
    source: Option<AtomId>,
    graph: Option<AtomId>,
) -> Result<PairMap, QueryError> {
    let edges = pair_set(ctx, inner, None, graph)?;
    let mut adjacency: FxHashMap<AtomId, SmallVec<[(AtomId, u32); 4]>> = FxHashMap::default();
    for ((s, e), len) in &edges {
        adjacency.entry(*s).or_default().push((*e, *len));
    }

    let sources: Vec<AtomId> = match source {
        Some(s) => vec![s],
        None => adjacency.keys().copied().collect(),
    };

    let mut out = PairMap::default();
    for src in sources {
        ctx.check()?;
        let mut visited: FxHashSet<AtomId> = FxHashSet::default();
        let mut frontier: SmallVec<[(AtomId, u32); 16]> = SmallVec::new();
        frontier.push((src, 0));

        while !frontier.is_empty() {
            let mut next: SmallVec<[(AtomId, u32); 16]> = SmallVec::new();
            for (node, dist) in frontier.drain(..) {
                let Some(succ) = adjacency.get(&node) else {
                    continue;
                };
                for (target, step) in succ {
                    if visited.insert(*target) {
                        let total = dist + step;
                        insert_min(&mut out, (src, *target), total);
                        next.push((*target, total));
                    }
                }
            }
            frontier = next;
        }
    }
    Ok(out)
}

/// Node universe for the reflexive pairs of `E?` / `E*`: every subject or
/// object in scope, or just the bound start when one is given.
fn reflexive_nodes(
    ctx: &QueryCtx<'_>,
    source: Option<AtomId>,
    graph: Option<AtomId>,
) -> Result<Vec<AtomId>, QueryError> {
    if let Some(s) = source {
        return Ok(vec![s]);
    }
    let mut nodes: FxHashSet<AtomId> = FxHashSet::default();
    for m in ctx.index.scan(
        ScanPattern {
            s: None,
            p: None,
            o: None,
            graph,
        },
        ctx.predicate,
    )? {
        let m = m?;
        nodes.insert(m.s);
        nodes.insert(m.o);
    }
    Ok(nodes.into_iter().collect())
}

fn insert_min(map: &mut PairMap, pair: (AtomId, AtomId), len: u32) {
    map.entry(pair)
        .and_modify(|existing| *existing = (*existing).min(len))
        .or_insert(len);
}

// ------------------------------------------------------------------------------------------------
// PathScan — solution-operator adapter
// ------------------------------------------------------------------------------------------------

/// Exposes path matches as solutions binding the start/end terms.
///
/// The pair set is evaluated on the first `advance()`; ground start/end
/// terms act as filters, variables bind.
pub struct PathScan<'s> {
    ctx: QueryCtx<'s>,
    expr: PathExpr,
    start: Term,
    end: Term,
    graph: Option<AtomId>,
    matches: Option<Vec<PathMatch>>,
    idx: usize,
    current: Solution,
    current_length: u32,
}

impl<'s> PathScan<'s> {
    /// Plans a path scan between `start` and `end` terms.
    pub fn new(
        ctx: &QueryCtx<'s>,
        expr: PathExpr,
        start: Term,
        end: Term,
        graph: Option<AtomId>,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            expr,
            start,
            end,
            graph,
            matches: None,
            idx: 0,
            current: Solution::new(),
            current_length: 0,
        }
    }

    /// Shortest witnessed length of the current match (diagnostics).
    pub fn current_length(&self) -> u32 {
        self.current_length
    }
}

impl SolutionIter for PathScan<'_> {
    fn advance(&mut self) -> Result<bool, QueryError> {
        self.ctx.check()?;
        if self.matches.is_none() {
            let matches = eval_path(
                &self.ctx,
                &self.expr,
                self.start.atom(),
                self.end.atom(),
                self.graph,
            )?;
            self.matches = Some(matches);
            self.idx = 0;
        }

        let matches = self.matches.as_ref().map(|m| m.as_slice()).unwrap_or(&[]);
        while self.idx < matches.len() {
            let m = matches[self.idx];
            self.idx += 1;

            let mut sol = Solution::new();
            let mut ok = true;
            if let Term::Var(v) = self.start {
                ok &= sol.bind(v, m.start);
            }
            if let Term::Var(v) = self.end {
                ok &= sol.bind(v, m.end);
            }
            if ok {
                self.current = sol;
                self.current_length = m.length;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn current(&self) -> &Solution {
        &self.current
    }
}
