#[cfg(test)]
mod tests {
    use crate::btree::{BTree, Layout};
    use crate::keys::{Rotation, TripleKey};
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    fn key(i: u32) -> [u8; 12] {
        TripleKey::new(i, 1, 1).encode(Rotation::Spo)
    }

    fn tree_with(n: u32, dir: &std::path::Path) -> BTree {
        let mut tree = BTree::open(dir.join("t.tdb"), Layout::TRIPLE, 64).unwrap();
        for i in 0..n {
            tree.insert(&key(i), 0, None).unwrap();
        }
        tree
    }

    #[test]
    fn test_bounded_range_is_inclusive() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let tree = tree_with(1_000, tmp.path());

        let hits: Vec<_> = tree
            .range_scan(&key(100), &key(200))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(hits.len(), 101);
        assert_eq!(hits[0].key.as_slice(), &key(100));
        assert_eq!(hits[100].key.as_slice(), &key(200));
    }

    #[test]
    fn test_scan_crosses_leaf_boundary() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        // Enough entries for several leaves.
        let tree = tree_with(3_000, tmp.path());
        assert!(tree.depth().unwrap() >= 2);

        let cap = Layout::TRIPLE.leaf_capacity() as u32;
        // A window straddling the first split point must be seamless.
        let lo = cap - 50;
        let hi = cap + 50;
        let hits: Vec<_> = tree
            .range_scan(&key(lo), &key(hi))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(hits.len(), 101);
        for (offset, entry) in hits.iter().enumerate() {
            assert_eq!(entry.key.as_slice(), &key(lo + offset as u32));
        }
    }

    #[test]
    fn test_inverted_range_yields_nothing() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let tree = tree_with(100, tmp.path());

        let mut scan = tree.range_scan(&key(50), &key(10)).unwrap();
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_scan_on_empty_tree() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let tree = tree_with(0, tmp.path());

        let mut scan = tree.range_scan(&key(0), &key(u32::MAX - 1)).unwrap();
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_scan_with_min_between_keys() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut tree = BTree::open(tmp.path().join("t.tdb"), Layout::TRIPLE, 64).unwrap();
        for i in [10u32, 20, 30, 40] {
            tree.insert(&key(i), 0, None).unwrap();
        }

        // min lands between stored keys: scan starts at the next key up.
        let hits: Vec<_> = tree
            .range_scan(&key(15), &key(35))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        let got: Vec<&[u8]> = hits.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(got, vec![&key(20)[..], &key(30)[..]]);
    }

    #[test]
    fn test_leaf_linkage_covers_all_keys_after_deletes() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut tree = tree_with(2_000, tmp.path());

        // Punch holes, including a whole leaf's worth at the front.
        for i in 0..900u32 {
            assert!(tree.remove(&key(i)).unwrap());
        }

        let hits: Vec<_> = tree
            .range_scan(&key(0), &key(u32::MAX - 1))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(hits.len(), 1_100);
        assert_eq!(hits[0].key.as_slice(), &key(900));
        assert_eq!(tree.entry_count(), 1_100);
    }
}
