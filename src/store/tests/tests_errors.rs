#[cfg(test)]
mod tests {
    use crate::keys::{Term, TriplePattern};
    use crate::patch::N3Patch;
    use crate::query::{CancelFlag, SolutionIter};
    use crate::store::{ErrorKind, Store, StoreOptions, VarTable};
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    fn plain_options() -> StoreOptions {
        StoreOptions {
            temporal: false,
            named_graphs: false,
            ..StoreOptions::default()
        }
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ErrorKind::NotFound.code(), 1);
        assert_eq!(ErrorKind::InvalidInput.code(), 2);
        assert_eq!(ErrorKind::StorageFull.code(), 3);
        assert_eq!(ErrorKind::Corruption.code(), 4);
        assert_eq!(ErrorKind::PatchFailed.code(), 5);
        assert_eq!(ErrorKind::Cancelled.code(), 6);
        assert_eq!(ErrorKind::Busy.code(), 7);
    }

    #[test]
    fn test_malformed_patch_maps_to_invalid_input() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path(), plain_options()).unwrap();

        let patch = N3Patch {
            where_patterns: vec![],
            deletes: vec![TriplePattern::new(
                Term::Var(0),
                Term::Var(1),
                Term::Var(2),
            )],
            inserts: vec![],
        };
        let err = store.patch(&patch, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_cancellation_maps_to_cancelled() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path(), plain_options()).unwrap();
        store.insert_triple("<a>", "<p>", "<b>").unwrap();

        let snap = store.snapshot();
        let mut vars = VarTable::new();
        let pattern = snap.compile_pattern(&mut vars, "?s", "?p", "?o", None);
        let cancel = CancelFlag::new();
        let mut query = snap
            .query_cancellable(&[pattern], None, cancel.clone())
            .unwrap();

        cancel.cancel();
        let err = query.advance().unwrap_err();
        let store_err: crate::store::StoreError = err.into();
        assert_eq!(store_err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_named_graph_on_disabled_store_maps_to_invalid_input() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path(), plain_options()).unwrap();

        let err = store.insert_quad("<a>", "<p>", "<b>", "<urn:g>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
