#[cfg(test)]
mod tests {
    use crate::atoms::AtomStore;
    use std::fs;
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    #[test]
    fn test_reopen_preserves_every_atom() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("atoms");

        let terms: Vec<String> = (0..500).map(|i| format!("<urn:term:{i}>")).collect();
        let mut ids = Vec::new();
        {
            let mut store = AtomStore::open(&dir).unwrap();
            for term in &terms {
                ids.push(store.intern(term.as_bytes()).unwrap());
            }
            store.flush().unwrap();
        }

        let store = AtomStore::open(&dir).unwrap();
        assert_eq!(store.len(), terms.len());
        for (term, id) in terms.iter().zip(&ids) {
            assert_eq!(store.lookup(*id).unwrap(), term.as_bytes());
            assert_eq!(store.id_of(term.as_bytes()), Some(*id));
        }
    }

    #[test]
    fn test_reopen_assigns_same_atom_for_same_bytes() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("atoms");

        let id = {
            let mut store = AtomStore::open(&dir).unwrap();
            let id = store.intern(b"<urn:stable>").unwrap();
            store.flush().unwrap();
            id
        };

        let mut store = AtomStore::open(&dir).unwrap();
        assert_eq!(store.intern(b"<urn:stable>").unwrap(), id);
    }

    #[test]
    fn test_missing_index_rebuilds_from_chunks() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("atoms");

        {
            let mut store = AtomStore::open(&dir).unwrap();
            store.intern(b"<urn:a>").unwrap();
            store.intern(b"<urn:b>").unwrap();
            store.flush().unwrap();
        }

        fs::remove_file(dir.join("index")).unwrap();

        let store = AtomStore::open(&dir).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.id_of(b"<urn:a>"), Some(1));
        assert_eq!(store.id_of(b"<urn:b>"), Some(2));
    }

    #[test]
    fn test_corrupted_index_rebuilds_from_chunks() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("atoms");

        {
            let mut store = AtomStore::open(&dir).unwrap();
            store.intern(b"<urn:a>").unwrap();
            store.flush().unwrap();
        }

        // Flip a byte inside the index body.
        let path = dir.join("index");
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let store = AtomStore::open(&dir).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.id_of(b"<urn:a>"), Some(1));
    }

    #[test]
    fn test_truncated_chunk_tail_recovers_durable_prefix() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("atoms");

        {
            let mut store = AtomStore::open(&dir).unwrap();
            store.intern(b"<urn:first>").unwrap();
            store.intern(b"<urn:second>").unwrap();
            store.flush().unwrap();
        }

        // Simulate a torn write: chop bytes off the chunk tail and drop the
        // index so the rebuild path runs.
        let chunk = dir.join("chunk-000000");
        let mut bytes = fs::read(&chunk).unwrap();
        bytes.truncate(bytes.len() - 4);
        fs::write(&chunk, &bytes).unwrap();
        fs::remove_file(dir.join("index")).unwrap();

        let store = AtomStore::open(&dir).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.id_of(b"<urn:first>"), Some(1));
        assert_eq!(store.id_of(b"<urn:second>"), None);
    }
}
