use crate::index::{IndexConfig, MultiIndex};
use crate::keys::{AtomId, Term, TriplePattern};
use crate::query::{CancelFlag, QueryCtx};
use tempfile::TempDir;

/// Opens a non-temporal index and loads `(s, p, o)` term triples into it.
pub fn index_with(tmp: &TempDir, triples: &[(&str, &str, &str)]) -> MultiIndex {
    let mut index = MultiIndex::open(
        tmp.path(),
        IndexConfig {
            temporal: false,
            named_graphs: false,
            cache_pages: 64,
        },
    )
    .unwrap();
    for (s, p, o) in triples {
        index
            .insert(s.as_bytes(), p.as_bytes(), o.as_bytes(), None, None, 1)
            .unwrap();
    }
    index
}

/// A context with no temporal predicate and a fresh cancel flag.
pub fn ctx(index: &MultiIndex) -> QueryCtx<'_> {
    QueryCtx::new(index, None, 0, CancelFlag::new())
}

/// Resolves an interned atom, panicking on unknown terms.
pub fn atom(index: &MultiIndex, term: &str) -> AtomId {
    index
        .atoms()
        .id_of(term.as_bytes())
        .unwrap_or_else(|| panic!("term {term} not interned"))
}

/// Pattern helper: `"?n"` strings are variables (id = n), anything else is
/// resolved to its atom.
pub fn pattern(index: &MultiIndex, s: &str, p: &str, o: &str) -> TriplePattern {
    TriplePattern::new(
        term(index, s),
        term(index, p),
        term(index, o),
    )
}

pub fn term(index: &MultiIndex, t: &str) -> Term {
    match t.strip_prefix('?') {
        Some(n) => Term::Var(n.parse().unwrap()),
        None => Term::Atom(atom(index, t)),
    }
}
