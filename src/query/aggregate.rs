//! Aggregates: COUNT, SUM, AVG, MIN, MAX with GROUP BY.
//!
//! COUNT streams with a bare counter. The grouped form hashes solutions by
//! their group-key atom tuple and keeps one accumulator set per group;
//! groups surface in first-seen order. Numeric aggregates fed a non-numeric
//! value produce an unbound result for that group — never an error.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::atoms::AtomStore;
use crate::keys::{AtomId, VarId};

use super::expr::parse_numeric;
use super::{QueryError, Solution, SolutionIter};

// ------------------------------------------------------------------------------------------------
// Specification
// ------------------------------------------------------------------------------------------------

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    /// Row (or bound-value) count.
    Count,
    /// Numeric sum.
    Sum,
    /// Numeric mean.
    Avg,
    /// Minimum by term order.
    Min,
    /// Maximum by term order.
    Max,
}

/// One aggregate to compute: the operation and its input variable.
///
/// `var = None` is the `COUNT(*)` form: every row counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateSpec {
    /// Function to apply.
    pub op: AggregateOp,
    /// Input variable; `None` counts rows.
    pub var: Option<VarId>,
}

/// A computed aggregate value.
#[derive(Debug, Clone, PartialEq)]
pub enum AggValue {
    /// A count.
    Count(u64),
    /// A numeric result.
    Number(f64),
    /// A term (MIN/MAX results).
    Term(AtomId),
    /// No usable input (empty group, non-numeric operand).
    Unbound,
}

/// One output row: the group's bindings plus its aggregate values, in spec
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    /// Bindings of the group variables.
    pub group: Solution,
    /// One value per requested aggregate.
    pub values: Vec<AggValue>,
}

// ------------------------------------------------------------------------------------------------
// Streaming COUNT
// ------------------------------------------------------------------------------------------------

/// Streams the input once, counting rows. Nothing is materialized.
pub fn count_stream(iter: &mut dyn SolutionIter) -> Result<u64, QueryError> {
    let mut n = 0u64;
    while iter.advance()? {
        n += 1;
    }
    Ok(n)
}

// ------------------------------------------------------------------------------------------------
// GROUP BY
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Accumulator {
    Count(u64),
    Sum { total: f64, valid: bool },
    Avg { total: f64, n: u64, valid: bool },
    Best { atom: Option<AtomId>, min: bool },
}

impl Accumulator {
    fn new(spec: &AggregateSpec) -> Self {
        match spec.op {
            AggregateOp::Count => Accumulator::Count(0),
            AggregateOp::Sum => Accumulator::Sum {
                total: 0.0,
                valid: true,
            },
            AggregateOp::Avg => Accumulator::Avg {
                total: 0.0,
                n: 0,
                valid: true,
            },
            AggregateOp::Min => Accumulator::Best {
                atom: None,
                min: true,
            },
            AggregateOp::Max => Accumulator::Best {
                atom: None,
                min: false,
            },
        }
    }

    fn feed(&mut self, value: Option<AtomId>, atoms: &AtomStore) {
        match self {
            Accumulator::Count(n) => {
                if value.is_some() {
                    *n += 1;
                }
            }
            Accumulator::Sum { total, valid } => {
                let Some(atom) = value else { return };
                match numeric_of(atom, atoms) {
                    Some(v) => *total += v,
                    None => *valid = false,
                }
            }
            Accumulator::Avg { total, n, valid } => {
                let Some(atom) = value else { return };
                match numeric_of(atom, atoms) {
                    Some(v) => {
                        *total += v;
                        *n += 1;
                    }
                    None => *valid = false,
                }
            }
            Accumulator::Best { atom: best, min } => {
                let Some(candidate) = value else { return };
                match best {
                    None => *best = Some(candidate),
                    Some(current) => {
                        let ord = term_order(candidate, *current, atoms);
                        let better = if *min {
                            ord == std::cmp::Ordering::Less
                        } else {
                            ord == std::cmp::Ordering::Greater
                        };
                        if better {
                            *best = Some(candidate);
                        }
                    }
                }
            }
        }
    }

    fn finish(&self) -> AggValue {
        match self {
            Accumulator::Count(n) => AggValue::Count(*n),
            Accumulator::Sum { total, valid } => {
                if *valid {
                    AggValue::Number(*total)
                } else {
                    AggValue::Unbound
                }
            }
            Accumulator::Avg { total, n, valid } => {
                if *valid && *n > 0 {
                    AggValue::Number(*total / *n as f64)
                } else {
                    AggValue::Unbound
                }
            }
            Accumulator::Best { atom, .. } => match atom {
                Some(a) => AggValue::Term(*a),
                None => AggValue::Unbound,
            },
        }
    }
}

/// Computes `specs` over `iter` grouped by `group_vars`.
///
/// An empty `group_vars` yields exactly one row (the whole-input group),
/// even on empty input.
pub fn group_by(
    iter: &mut dyn SolutionIter,
    group_vars: &[VarId],
    specs: &[AggregateSpec],
    atoms: &AtomStore,
) -> Result<Vec<AggregateRow>, QueryError> {
    let mut order: Vec<SmallVec<[AtomId; 4]>> = Vec::new();
    let mut groups: FxHashMap<SmallVec<[AtomId; 4]>, (Solution, Vec<Accumulator>)> =
        FxHashMap::default();

    while iter.advance()? {
        let sol = iter.current();
        let key = sol.key_for(group_vars);
        let entry = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            let mut group = Solution::new();
            for var in group_vars {
                if let Some(atom) = sol.get(*var) {
                    group.bind(*var, atom);
                }
            }
            (group, specs.iter().map(Accumulator::new).collect())
        });

        for (spec, acc) in specs.iter().zip(entry.1.iter_mut()) {
            match spec.var {
                // COUNT(*) counts the row itself.
                None => {
                    if let Accumulator::Count(n) = acc {
                        *n += 1;
                    }
                }
                Some(var) => acc.feed(sol.get(var), atoms),
            }
        }
    }

    // Ungrouped aggregation always reports one row.
    if group_vars.is_empty() && groups.is_empty() {
        let accs: Vec<Accumulator> = specs.iter().map(Accumulator::new).collect();
        return Ok(vec![AggregateRow {
            group: Solution::new(),
            values: accs.iter().map(Accumulator::finish).collect(),
        }]);
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        if let Some((group, accs)) = groups.remove(&key) {
            out.push(AggregateRow {
                group,
                values: accs.iter().map(Accumulator::finish).collect(),
            });
        }
    }
    Ok(out)
}

fn numeric_of(atom: AtomId, atoms: &AtomStore) -> Option<f64> {
    let bytes = atoms.lookup(atom).ok()?;
    let text = String::from_utf8_lossy(bytes);
    parse_numeric(&text)
}

fn term_order(a: AtomId, b: AtomId, atoms: &AtomStore) -> std::cmp::Ordering {
    let ta = atoms
        .lookup(a)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default();
    let tb = atoms
        .lookup(b)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default();
    match (parse_numeric(&ta), parse_numeric(&tb)) {
        (Some(na), Some(nb)) => na.partial_cmp(&nb).unwrap_or(std::cmp::Ordering::Equal),
        _ => ta.cmp(&tb),
    }
}
