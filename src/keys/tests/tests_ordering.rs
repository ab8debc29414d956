#[cfg(test)]
mod tests {
    use crate::keys::{Rotation, TemporalKey, TripleKey, ATOM_MAX, ATOM_MIN, TIME_MAX};

    /// Byte order of encoded keys must equal semantic order of the rotated
    /// field tuples — the property the B+Tree's memcmp search relies on.
    #[test]
    fn test_encoded_order_matches_semantic_order_spo() {
        let keys = [
            TripleKey::new(1, 1, 1),
            TripleKey::new(1, 1, 2),
            TripleKey::new(1, 2, 1),
            TripleKey::new(2, 1, 1),
            TripleKey::new(2, 300, 4),
            TripleKey::new(70_000, 1, 1),
        ];
        for window in keys.windows(2) {
            let a = window[0].encode(Rotation::Spo);
            let b = window[1].encode(Rotation::Spo);
            assert!(a < b, "{:?} !< {:?}", window[0], window[1]);
        }
    }

    #[test]
    fn test_encoded_order_matches_semantic_order_pos() {
        // Under POS the predicate leads, so ordering follows (p, o, s).
        let a = TripleKey::new(9, 1, 5);
        let b = TripleKey::new(1, 2, 5);
        assert!(a.encode(Rotation::Pos) < b.encode(Rotation::Pos));
    }

    #[test]
    fn test_temporal_versions_sort_chronologically() {
        // Fixed SPO: versions must order by (valid_from, valid_to, tx).
        let v1 = TemporalKey::new(1, 2, 3, 100, 200, 50);
        let v2 = TemporalKey::new(1, 2, 3, 100, 300, 50);
        let v3 = TemporalKey::new(1, 2, 3, 100, 300, 60);
        let v4 = TemporalKey::new(1, 2, 3, 150, 300, 10);
        let encoded: Vec<_> = [v1, v2, v3, v4]
            .iter()
            .map(|k| k.encode(Rotation::Spot))
            .collect();
        for window in encoded.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn test_sentinels_bracket_everything() {
        let min = TripleKey::new(ATOM_MIN, ATOM_MIN, ATOM_MIN).encode(Rotation::Spo);
        let max = TripleKey::new(ATOM_MAX, ATOM_MAX, ATOM_MAX).encode(Rotation::Spo);
        let mid = TripleKey::new(1, u32::MAX - 1, 77).encode(Rotation::Spo);
        assert!(min < mid && mid < max);

        let tmax = TemporalKey::new(ATOM_MAX, ATOM_MAX, ATOM_MAX, TIME_MAX, TIME_MAX, TIME_MAX)
            .encode(Rotation::Spot);
        let tmid = TemporalKey::new(5, 5, 5, 0, TIME_MAX, 12).encode(Rotation::Spot);
        assert!(tmid < tmax);
    }
}
