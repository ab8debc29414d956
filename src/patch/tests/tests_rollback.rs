#[cfg(test)]
mod tests {
    use crate::index::{IndexConfig, MultiIndex, ScanPattern};
    use crate::keys::{Term, TriplePattern};
    use crate::patch::{execute, N3Patch, PatchError};
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    fn open(dir: &std::path::Path, temporal: bool) -> MultiIndex {
        MultiIndex::open(
            dir,
            IndexConfig {
                temporal,
                named_graphs: false,
                cache_pages: 64,
            },
        )
        .unwrap()
    }

    fn atom(index: &MultiIndex, t: &str) -> Term {
        Term::Atom(index.atoms().id_of(t.as_bytes()).unwrap())
    }

    /// Full state of the store as a sorted triple list, for exact pre/post
    /// comparison.
    fn full_state(index: &MultiIndex) -> Vec<(u32, u32, u32)> {
        let mut out: Vec<(u32, u32, u32)> = index
            .scan(ScanPattern::default(), None)
            .unwrap()
            .map(|r| {
                let m = r.unwrap();
                (m.s, m.p, m.o)
            })
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn test_mid_patch_failure_restores_pre_state() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut index = open(tmp.path(), false);

        index.insert(b"<t1>", b"<status>", b"<open>", None, None, 1).unwrap();
        index.insert(b"<t2>", b"<status>", b"<open>", None, None, 1).unwrap();
        index.insert(b"<t3>", b"<kind>", b"<task>", None, None, 1).unwrap();
        let pre = full_state(&index);

        let status = atom(&index, "<status>");
        let open_term = atom(&index, "<open>");
        let done = Term::Atom(index.intern_term(b"<done>").unwrap());
        let graph = index.default_graph();

        let patch = N3Patch {
            where_patterns: vec![TriplePattern::new(Term::Var(0), status, open_term)],
            deletes: vec![TriplePattern::new(Term::Var(0), status, open_term)],
            inserts: vec![TriplePattern::new(Term::Var(0), status, done)],
        };

        // Inject a fault after three applied ops: both deletes and one
        // insert land, then the batch dies.
        match execute(&mut index, &patch, graph, 100, Some(3)) {
            Err(PatchError::PatchFailed(_)) => {}
            other => panic!("expected PatchFailed, got {other:?}"),
        }

        // Patch atomicity: post-state equals pre-state exactly.
        assert_eq!(full_state(&index), pre);
    }

    #[test]
    fn test_failure_before_any_op_changes_nothing() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut index = open(tmp.path(), false);

        index.insert(b"<a>", b"<p>", b"<b>", None, None, 1).unwrap();
        let pre = full_state(&index);

        let s = atom(&index, "<a>");
        let p = atom(&index, "<p>");
        let o = atom(&index, "<b>");
        let graph = index.default_graph();
        let patch = N3Patch {
            where_patterns: vec![],
            deletes: vec![TriplePattern::new(s, p, o)],
            inserts: vec![],
        };

        match execute(&mut index, &patch, graph, 100, Some(0)) {
            Err(PatchError::PatchFailed(_)) => {}
            other => panic!("expected PatchFailed, got {other:?}"),
        }
        assert_eq!(full_state(&index), pre);
    }

    #[test]
    fn test_rollback_restores_truncated_interval() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut index = open(tmp.path(), true);

        // Live open-ended fact; the patch's first insert truncates it.
        index
            .insert(b"<x>", b"<state>", b"<on>", None, Some((100, crate::keys::TIME_MAX)), 100)
            .unwrap();
        let s = atom(&index, "<x>");
        let p = atom(&index, "<state>");
        let o = atom(&index, "<on>");
        let other_s = Term::Atom(index.intern_term(b"<y>").unwrap());
        let other_p = Term::Atom(index.intern_term(b"<kind>").unwrap());
        let other_o = Term::Atom(index.intern_term(b"<task>").unwrap());
        let graph = index.default_graph();

        // First insert clips the prior version and writes a new one; the
        // fault fires before the second insert.
        let patch = N3Patch {
            where_patterns: vec![],
            deletes: vec![],
            inserts: vec![
                TriplePattern::new(s, p, o),
                TriplePattern::new(other_s, other_p, other_o),
            ],
        };
        match execute(&mut index, &patch, graph, 5_000, Some(1)) {
            Err(PatchError::PatchFailed(_)) => {}
            other => panic!("expected PatchFailed, got {other:?}"),
        }

        // Rollback restored the clipped version exactly: one version,
        // original open interval, original metadata.
        let all: Vec<_> = index
            .scan(
                ScanPattern::default(),
                Some(crate::keys::TemporalPredicate::AllTime),
            )
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(all.len(), 1);
        let version = all[0].version.unwrap();
        assert_eq!(version.valid_from, 100);
        assert_eq!(version.valid_to, crate::keys::TIME_MAX);
        assert_eq!(version.meta.version, 0, "original metadata restored");

        // The fact is current again, single-valued.
        let current = index
            .scan(
                ScanPattern::default(),
                Some(crate::keys::TemporalPredicate::AsOf(6_000)),
            )
            .unwrap()
            .count();
        assert_eq!(current, 1);
    }

    #[test]
    fn test_temporal_rollback_revives_tombstoned_versions() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut index = open(tmp.path(), true);

        index
            .insert(b"<x>", b"<state>", b"<on>", None, Some((100, crate::keys::TIME_MAX)), 100)
            .unwrap();

        let state = atom(&index, "<state>");
        let on = atom(&index, "<on>");
        let off = Term::Atom(index.intern_term(b"<off>").unwrap());
        let graph = index.default_graph();

        let count_current = |index: &MultiIndex| {
            index
                .scan(
                    ScanPattern::default(),
                    Some(crate::keys::TemporalPredicate::AsOf(600)),
                )
                .unwrap()
                .count()
        };
        assert_eq!(count_current(&index), 1);

        let patch = N3Patch {
            where_patterns: vec![TriplePattern::new(Term::Var(0), state, on)],
            deletes: vec![TriplePattern::new(Term::Var(0), state, on)],
            inserts: vec![TriplePattern::new(Term::Var(0), state, off)],
        };

        // The delete (tombstone) applies, then the fault fires before the
        // insert: the tombstone must be cleared again.
        match execute(&mut index, &patch, graph, 500, Some(1)) {
            Err(PatchError::PatchFailed(_)) => {}
            other => panic!("expected PatchFailed, got {other:?}"),
        }
        assert_eq!(count_current(&index), 1);
        let m = index
            .scan(
                ScanPattern::default(),
                Some(crate::keys::TemporalPredicate::AsOf(600)),
            )
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(m.o, on.atom().unwrap());
    }
}
