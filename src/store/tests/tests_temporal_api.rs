#[cfg(test)]
mod tests {
    use crate::keys::{TemporalPredicate, TIME_MAX};
    use crate::query::collect_all;
    use crate::store::{Store, StoreOptions, VarTable};
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    fn temporal_options() -> StoreOptions {
        StoreOptions {
            temporal: true,
            named_graphs: false,
            ..StoreOptions::default()
        }
    }

    // Millisecond epochs for the employment scenario.
    const T_2020: u64 = 1_577_836_800_000;
    const T_2021_06: u64 = 1_622_505_600_000;
    const T_2023_01: u64 = 1_672_531_200_000;
    const T_2023_07: u64 = 1_688_169_600_000;
    const T_2023_12: u64 = 1_703_980_800_000;
    const T_2024: u64 = 1_704_067_200_000;

    #[test]
    fn test_employment_history_scenario() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path(), temporal_options()).unwrap();

        store
            .insert_temporal("<alice>", "<works>", "<Acme>", T_2020, T_2023_07, None)
            .unwrap();
        store
            .insert_temporal("<alice>", "<works>", "<OpenAI>", T_2023_07, TIME_MAX, None)
            .unwrap();

        let snap = store.snapshot();
        let employer_at = |t: u64| -> Vec<String> {
            let mut vars = VarTable::new();
            let p = snap.compile_pattern(&mut vars, "<alice>", "<works>", "?org", None);
            let mut query = snap
                .query(&[p], Some(TemporalPredicate::AsOf(t)))
                .unwrap();
            collect_all(&mut query)
                .unwrap()
                .iter()
                .map(|r| {
                    let atom = r.get(0).unwrap();
                    String::from_utf8_lossy(snap.index().atoms().lookup(atom).unwrap()).into_owned()
                })
                .collect()
        };

        assert_eq!(employer_at(T_2021_06), vec!["<Acme>".to_string()]);
        assert_eq!(employer_at(T_2024), vec!["<OpenAI>".to_string()]);

        // The 2023 range sees both employers.
        let mut vars = VarTable::new();
        let p = snap.compile_pattern(&mut vars, "<alice>", "<works>", "?org", None);
        let mut query = snap
            .query(&[p], Some(TemporalPredicate::Range { lo: T_2023_01, hi: T_2023_12 }))
            .unwrap();
        assert_eq!(collect_all(&mut query).unwrap().len(), 2);
    }

    #[test]
    fn test_current_insert_then_asof_before_is_empty() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path(), temporal_options()).unwrap();
        store.insert_triple("<a>", "<p>", "<b>").unwrap();

        let snap = store.snapshot();
        // Before the insert's valid_from nothing holds.
        assert!(!snap
            .contains("<a>", "<p>", "<b>", None, Some(TemporalPredicate::AsOf(1_000)))
            .unwrap());
        // Current sees it.
        assert!(snap
            .contains("<a>", "<p>", "<b>", None, Some(TemporalPredicate::Current))
            .unwrap());
    }

    #[test]
    fn test_zero_width_interval_is_invalid_input() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path(), temporal_options()).unwrap();

        let err = store
            .insert_temporal("<a>", "<p>", "<b>", 500, 500, None)
            .unwrap_err();
        assert_eq!(err.code(), 2);
    }

    #[test]
    fn test_temporal_insert_on_plain_store_is_invalid() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let store = Store::open(
            tmp.path(),
            StoreOptions {
                temporal: false,
                named_graphs: false,
                ..StoreOptions::default()
            },
        )
        .unwrap();

        let err = store
            .insert_temporal("<a>", "<p>", "<b>", 0, 100, None)
            .unwrap_err();
        assert_eq!(err.code(), 2);
    }

    #[test]
    fn test_delete_is_audit_preserving() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path(), temporal_options()).unwrap();

        store
            .insert_temporal("<a>", "<p>", "<b>", T_2020, TIME_MAX, None)
            .unwrap();
        store.delete_triple("<a>", "<p>", "<b>", None).unwrap();

        let snap = store.snapshot();
        // Invisible to every predicate...
        assert!(!snap
            .contains("<a>", "<p>", "<b>", None, Some(TemporalPredicate::AllTime))
            .unwrap());
        // ...but the version is still physically recorded.
        assert_eq!(store.statistics().unwrap().triples, 1);
    }

    #[test]
    fn test_temporal_history_survives_reopen() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        {
            let store = Store::open(tmp.path(), temporal_options()).unwrap();
            store
                .insert_temporal("<alice>", "<works>", "<Acme>", T_2020, T_2023_07, None)
                .unwrap();
            store.close().unwrap();
        }

        let store = Store::open(tmp.path(), temporal_options()).unwrap();
        let snap = store.snapshot();
        assert!(snap
            .contains(
                "<alice>",
                "<works>",
                "<Acme>",
                None,
                Some(TemporalPredicate::AsOf(T_2021_06))
            )
            .unwrap());
        assert!(!snap
            .contains(
                "<alice>",
                "<works>",
                "<Acme>",
                None,
                Some(TemporalPredicate::AsOf(T_2024))
            )
            .unwrap());
    }
}
