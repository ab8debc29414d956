#[cfg(test)]
mod tests {
    use crate::index::{IndexConfig, MultiIndex, ScanPattern};
    use crate::keys::Rotation;
    use tempfile::TempDir;

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

    fn pattern(s: bool, p: bool, o: bool) -> ScanPattern {
        ScanPattern {
            s: s.then_some(1),
            p: p.then_some(2),
            o: o.then_some(3),
            graph: None,
        }
    }

    #[test]
    fn test_selection_table_plain() {
        let tmp = TempDir::new().unwrap();
        let index = open(tmp.path(), false);

        let cases = [
            (pattern(true, true, true), Rotation::Spo),
            (pattern(true, true, false), Rotation::Spo),
            (pattern(true, false, true), Rotation::Osp),
            (pattern(false, true, true), Rotation::Pos),
            (pattern(true, false, false), Rotation::Spo),
            (pattern(false, true, false), Rotation::Pos),
            (pattern(false, false, true), Rotation::Osp),
            (pattern(false, false, false), Rotation::Spo),
        ];
        for (p, expected) in cases {
            assert_eq!(index.select_rotation(&p, false), expected, "{p:?}");
        }
    }

    #[test]
    fn test_selection_table_temporal() {
        let tmp = TempDir::new().unwrap();
        let index = open(tmp.path(), true);

        let cases = [
            (pattern(true, true, true), Rotation::Spot),
            (pattern(true, true, false), Rotation::Spot),
            (pattern(true, false, true), Rotation::Ospt),
            (pattern(false, true, true), Rotation::Post),
            (pattern(true, false, false), Rotation::Spot),
            (pattern(false, true, false), Rotation::Post),
            (pattern(false, false, true), Rotation::Ospt),
            (pattern(false, false, false), Rotation::Spot),
        ];
        for (p, expected) in cases {
            assert_eq!(index.select_rotation(&p, false), expected, "{p:?}");
        }

        // Unconstrained pattern with a time window routes time-leading.
        assert_eq!(
            index.select_rotation(&pattern(false, false, false), true),
            Rotation::Tspo
        );
        // A bound position wins over the time window.
        assert_eq!(
            index.select_rotation(&pattern(false, true, false), true),
            Rotation::Post
        );
    }
}
