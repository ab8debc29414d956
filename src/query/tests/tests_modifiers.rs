#[cfg(test)]
mod tests {
    use crate::query::modifiers::{DistinctIter, OrderByIter, SliceIter, SortKey};
    use crate::query::tests::helpers::{atom, ctx, index_with, pattern};
    use crate::query::{collect_all, BgpIter};
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    #[test]
    fn test_distinct_deduplicates_projected_rows() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let index = index_with(
            &tmp,
            &[
                ("<a>", "<knows>", "<b>"),
                ("<a>", "<knows>", "<c>"),
                ("<d>", "<knows>", "<b>"),
            ],
        );
        let ctx = ctx(&index);

        // Project only the object (?1): two distinct values.
        let inner =
            Box::new(BgpIter::new(&ctx, &[pattern(&index, "?0", "<knows>", "?1")]).unwrap());
        // Without projection all three rows are distinct.
        let mut distinct = DistinctIter::new(&ctx, inner);
        assert_eq!(collect_all(&mut distinct).unwrap().len(), 3);
    }

    #[test]
    fn test_order_by_numeric_ascending_descending() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let index = index_with(
            &tmp,
            &[
                ("<a>", "<age>", "\"30\""),
                ("<b>", "<age>", "\"9\""),
                ("<c>", "<age>", "\"120\""),
            ],
        );
        let ctx = ctx(&index);

        let ages = |descending: bool| -> Vec<u32> {
            let inner =
                Box::new(BgpIter::new(&ctx, &[pattern(&index, "?0", "<age>", "?1")]).unwrap());
            let key = if descending {
                SortKey::desc(1)
            } else {
                SortKey::asc(1)
            };
            let mut ordered = OrderByIter::new(&ctx, inner, vec![key]);
            collect_all(&mut ordered)
                .unwrap()
                .iter()
                .map(|r| r.get(1).unwrap())
                .collect()
        };

        // Numeric order, not lexicographic: 9 < 30 < 120.
        let nine = atom(&index, "\"9\"");
        let thirty = atom(&index, "\"30\"");
        let onetwenty = atom(&index, "\"120\"");
        assert_eq!(ages(false), vec![nine, thirty, onetwenty]);
        assert_eq!(ages(true), vec![onetwenty, thirty, nine]);
    }

    #[test]
    fn test_order_by_secondary_key_breaks_ties() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let index = index_with(
            &tmp,
            &[
                ("<x>", "<group>", "\"1\""),
                ("<y>", "<group>", "\"1\""),
                ("<z>", "<group>", "\"0\""),
            ],
        );
        let ctx = ctx(&index);

        let inner =
            Box::new(BgpIter::new(&ctx, &[pattern(&index, "?0", "<group>", "?1")]).unwrap());
        let mut ordered = OrderByIter::new(
            &ctx,
            inner,
            vec![SortKey::asc(1), SortKey::desc(0)],
        );
        let rows = collect_all(&mut ordered).unwrap();

        assert_eq!(rows[0].get(0), Some(atom(&index, "<z>")));
        // Within group "1", subjects descend lexicographically: y before x.
        assert_eq!(rows[1].get(0), Some(atom(&index, "<y>")));
        assert_eq!(rows[2].get(0), Some(atom(&index, "<x>")));
    }

    #[test]
    fn test_limit_offset_post_order() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let triples: Vec<(String, String, String)> = (0..10)
            .map(|i| (format!("<s{i}>"), "<v>".to_string(), format!("\"{i}\"")))
            .collect();
        let borrowed: Vec<(&str, &str, &str)> = triples
            .iter()
            .map(|(s, p, o)| (s.as_str(), p.as_str(), o.as_str()))
            .collect();
        let index = index_with(&tmp, &borrowed);
        let ctx = ctx(&index);

        let inner = Box::new(BgpIter::new(&ctx, &[pattern(&index, "?0", "<v>", "?1")]).unwrap());
        let ordered = Box::new(OrderByIter::new(&ctx, inner, vec![SortKey::asc(1)]));
        let mut sliced = SliceIter::new(&ctx, ordered, 3, Some(4));
        let rows = collect_all(&mut sliced).unwrap();

        let values: Vec<u32> = rows.iter().map(|r| r.get(1).unwrap()).collect();
        let expected: Vec<u32> = (3..7).map(|i| atom(&index, &format!("\"{i}\""))).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_offset_past_end_yields_nothing() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let index = index_with(&tmp, &[("<a>", "<p>", "<b>")]);
        let ctx = ctx(&index);

        let inner = Box::new(BgpIter::new(&ctx, &[pattern(&index, "?0", "<p>", "?1")]).unwrap());
        let mut sliced = SliceIter::new(&ctx, inner, 5, None);
        assert!(collect_all(&mut sliced).unwrap().is_empty());
    }
}
