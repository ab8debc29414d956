#[cfg(test)]
mod tests {
    use crate::keys::{Rotation, TemporalKey, TripleKey, TEMPORAL_KEY_LEN, TRIPLE_KEY_LEN};

    #[test]
    fn test_triple_key_roundtrip_all_rotations() {
        let key = TripleKey::new(7, 11, 13);
        for rotation in Rotation::NON_TEMPORAL {
            let bytes = key.encode(rotation);
            assert_eq!(bytes.len(), TRIPLE_KEY_LEN);
            let decoded = TripleKey::decode(&bytes, rotation).unwrap();
            assert_eq!(decoded, key, "rotation {rotation:?}");
        }
    }

    #[test]
    fn test_temporal_key_roundtrip_all_rotations() {
        let key = TemporalKey::new(3, 5, 9, 1_000, 2_000, 1_500);
        for rotation in Rotation::TEMPORAL {
            let bytes = key.encode(rotation);
            assert_eq!(bytes.len(), TEMPORAL_KEY_LEN);
            let decoded = TemporalKey::decode(&bytes, rotation).unwrap();
            assert_eq!(decoded, key, "rotation {rotation:?}");
        }
    }

    #[test]
    fn test_rotation_field_order() {
        let key = TripleKey::new(1, 2, 3);

        let spo = key.encode(Rotation::Spo);
        assert_eq!(&spo[0..4], &1u32.to_be_bytes());
        assert_eq!(&spo[4..8], &2u32.to_be_bytes());
        assert_eq!(&spo[8..12], &3u32.to_be_bytes());

        let pos = key.encode(Rotation::Pos);
        assert_eq!(&pos[0..4], &2u32.to_be_bytes());
        assert_eq!(&pos[4..8], &3u32.to_be_bytes());
        assert_eq!(&pos[8..12], &1u32.to_be_bytes());

        let osp = key.encode(Rotation::Osp);
        assert_eq!(&osp[0..4], &3u32.to_be_bytes());
        assert_eq!(&osp[4..8], &1u32.to_be_bytes());
        assert_eq!(&osp[8..12], &2u32.to_be_bytes());
    }

    #[test]
    fn test_tspo_leads_with_valid_from() {
        let key = TemporalKey::new(1, 2, 3, 0xAABB, 0xCCDD, 42);
        let bytes = key.encode(Rotation::Tspo);
        assert_eq!(&bytes[0..8], &0xAABBu64.to_be_bytes());
        assert_eq!(&bytes[8..12], &1u32.to_be_bytes());
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert!(TripleKey::decode(&[0u8; 11], Rotation::Spo).is_err());
        assert!(TemporalKey::decode(&[0u8; 12], Rotation::Spot).is_err());
    }

    #[test]
    fn test_file_stem_roundtrip() {
        for rotation in Rotation::NON_TEMPORAL
            .into_iter()
            .chain(Rotation::TEMPORAL)
        {
            assert_eq!(
                Rotation::from_file_stem(rotation.file_stem()),
                Some(rotation)
            );
        }
        assert_eq!(Rotation::from_file_stem("bogus"), None);
    }
}
