#[cfg(test)]
mod tests {
    use crate::atoms::AtomStore;
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    #[test]
    fn test_intern_and_lookup_roundtrip() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut store = AtomStore::open(tmp.path().join("atoms")).unwrap();

        let a = store.intern(b"<http://example.org/alice>").unwrap();
        let b = store.intern(b"\"literal\"@en").unwrap();

        assert_eq!(store.lookup(a).unwrap(), b"<http://example.org/alice>");
        assert_eq!(store.lookup(b).unwrap(), b"\"literal\"@en");
    }

    #[test]
    fn test_intern_is_idempotent() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut store = AtomStore::open(tmp.path().join("atoms")).unwrap();

        let first = store.intern(b"<urn:x>").unwrap();
        let second = store.intern(b"<urn:x>").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_ids_are_dense_and_start_at_one() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut store = AtomStore::open(tmp.path().join("atoms")).unwrap();

        assert_eq!(store.intern(b"a").unwrap(), 1);
        assert_eq!(store.intern(b"b").unwrap(), 2);
        assert_eq!(store.intern(b"c").unwrap(), 3);
    }

    #[test]
    fn test_id_of_resolves_only_known_terms() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut store = AtomStore::open(tmp.path().join("atoms")).unwrap();

        let id = store.intern(b"<urn:known>").unwrap();
        assert_eq!(store.id_of(b"<urn:known>"), Some(id));
        assert_eq!(store.id_of(b"<urn:unknown>"), None);
    }

    #[test]
    fn test_bytes_used_grows_with_content() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut store = AtomStore::open(tmp.path().join("atoms")).unwrap();

        assert_eq!(store.bytes_used(), 0);
        store.intern(b"0123456789").unwrap();
        // Length prefix + ten content bytes.
        assert_eq!(store.bytes_used(), 14);
    }
}
