#[cfg(test)]
mod tests {
    use crate::query::tests::helpers::{atom, ctx, index_with, pattern};
    use crate::query::{collect_all, BgpIter, OptionalIter, PatternScan, Solution, UnionIter};
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    #[test]
    fn test_optional_keeps_unmatched_left_rows() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let index = index_with(
            &tmp,
            &[
                ("<alice>", "<type>", "<person>"),
                ("<bob>", "<type>", "<person>"),
                ("<alice>", "<email>", "\"a@x\""),
            ],
        );
        let ctx = ctx(&index);

        let left = Box::new(
            PatternScan::new(
                &ctx,
                &pattern(&index, "?0", "<type>", "<person>"),
                &Solution::new(),
            )
            .unwrap(),
        );
        let mut opt = OptionalIter::new(
            &ctx,
            left,
            vec![pattern(&index, "?0", "<email>", "?1")],
        );
        let mut rows = collect_all(&mut opt).unwrap();
        rows.sort_by_key(|r| r.get(0));

        assert_eq!(rows.len(), 2);
        // Alice got her email joined in; Bob survives with ?1 unbound.
        assert_eq!(rows[0].get(0), Some(atom(&index, "<alice>")));
        assert_eq!(rows[0].get(1), Some(atom(&index, "\"a@x\"")));
        assert_eq!(rows[1].get(0), Some(atom(&index, "<bob>")));
        assert_eq!(rows[1].get(1), None);
    }

    #[test]
    fn test_optional_emits_cartesian_product_of_matches() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let index = index_with(
            &tmp,
            &[
                ("<alice>", "<type>", "<person>"),
                ("<alice>", "<email>", "\"a@x\""),
                ("<alice>", "<email>", "\"a@y\""),
            ],
        );
        let ctx = ctx(&index);

        let left = Box::new(
            PatternScan::new(
                &ctx,
                &pattern(&index, "?0", "<type>", "<person>"),
                &Solution::new(),
            )
            .unwrap(),
        );
        let mut opt = OptionalIter::new(
            &ctx,
            left,
            vec![pattern(&index, "?0", "<email>", "?1")],
        );
        let rows = collect_all(&mut opt).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.get(1).is_some()));
    }

    #[test]
    fn test_union_concatenates_both_sides() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let index = index_with(
            &tmp,
            &[
                ("<a>", "<p>", "<b>"),
                ("<c>", "<q>", "<d>"),
            ],
        );
        let ctx = ctx(&index);

        // Left binds ?0, right binds ?1: each side's rows leave the other
        // side's variable unbound.
        let left = Box::new(BgpIter::new(&ctx, &[pattern(&index, "?0", "<p>", "<b>")]).unwrap());
        let right = Box::new(BgpIter::new(&ctx, &[pattern(&index, "?1", "<q>", "<d>")]).unwrap());
        let mut union = UnionIter::new(&ctx, left, right);
        let rows = collect_all(&mut union).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(0), Some(atom(&index, "<a>")));
        assert_eq!(rows[0].get(1), None);
        assert_eq!(rows[1].get(0), None);
        assert_eq!(rows[1].get(1), Some(atom(&index, "<c>")));
    }

    #[test]
    fn test_union_with_empty_side() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let index = index_with(&tmp, &[("<a>", "<p>", "<b>")]);
        let ctx = ctx(&index);

        let left = Box::new(BgpIter::new(&ctx, &[pattern(&index, "?0", "<p>", "<b>")]).unwrap());
        let right =
            Box::new(BgpIter::new(&ctx, &[pattern(&index, "?0", "<p>", "<a>")]).unwrap());
        let mut union = UnionIter::new(&ctx, left, right);
        let rows = collect_all(&mut union).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
