#[cfg(test)]
mod tests {
    use crate::pager::{Pager, PagerError, PAGE_SIZE};
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    #[test]
    fn test_fresh_file_initializes() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let (pager, fresh) = Pager::open(tmp.path().join("t.tdb"), 16).unwrap();

        assert!(fresh);
        assert_eq!(pager.meta().root, 0);
        assert_eq!(pager.meta().next_page, 1);
        assert_eq!(pager.meta().entry_count, 0);
    }

    #[test]
    fn test_allocate_write_read_roundtrip() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let (mut pager, _) = Pager::open(tmp.path().join("t.tdb"), 16).unwrap();

        let id = pager.allocate().unwrap();
        assert_eq!(id, 1);

        pager.page_mut(id).unwrap()[0..4].copy_from_slice(b"tree");
        assert_eq!(&pager.page(id).unwrap()[0..4], b"tree");
        assert_eq!(pager.page(id).unwrap().len(), PAGE_SIZE);
    }

    #[test]
    fn test_allocated_pages_are_zeroed() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let (mut pager, _) = Pager::open(tmp.path().join("t.tdb"), 16).unwrap();

        let id = pager.allocate().unwrap();
        assert!(pager.page(id).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_page_zero_and_unallocated_are_invalid() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let (mut pager, _) = Pager::open(tmp.path().join("t.tdb"), 16).unwrap();
        pager.allocate().unwrap();

        assert!(matches!(pager.page(0), Err(PagerError::InvalidPage(0))));
        assert!(matches!(pager.page(9), Err(PagerError::InvalidPage(9))));
    }

    #[test]
    fn test_allocation_grows_and_remaps() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let (mut pager, _) = Pager::open(tmp.path().join("t.tdb"), 16).unwrap();

        // Allocate past the initial extension so the file must grow.
        let mut last = 0;
        for _ in 0..200 {
            last = pager.allocate().unwrap();
        }
        pager.page_mut(last).unwrap()[0] = 0xAB;
        assert_eq!(pager.page(last).unwrap()[0], 0xAB);
        assert!(pager.file_len() >= u64::from(last + 1) * PAGE_SIZE as u64);
    }
}
