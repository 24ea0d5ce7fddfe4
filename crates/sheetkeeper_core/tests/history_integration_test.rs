//! Integration tests for squashed history, undo and cross-tab conflicts

#[cfg(test)]
mod history_integration_tests {
    use serde_json::{Value, json};
    use sheetkeeper_core::HistorySession;
    use sheetkeeper_core::config::HistoryConfig;
    use sheetkeeper_core::events::HistoryEvent;
    use sheetkeeper_core::history::{MemoryStorage, UndoOutcome, VersionStorage};
    use sheetkeeper_core::tabs::{ConflictChoice, ConflictEvent, ConflictOutcome, TabBus};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn character(name: &str) -> Value {
        json!({
            "name": name,
            "tier": 1,
            "type": "Jack",
            "descriptor": "Clever",
            "focus": "Talks to Machines",
            "stats": {"might": 9, "speed": 11, "intellect": 14}
        })
    }

    /// Collects event names emitted by a session
    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<HistoryEvent>>>,
    }

    impl Recorder {
        fn attach(session: &HistorySession) -> Self {
            let recorder = Self::default();
            let sink = Arc::clone(&recorder.events);
            session.subscribe(Arc::new(move |event| {
                sink.lock().unwrap().push(event.clone());
            }));
            recorder
        }

        fn names(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.name()).collect()
        }

        fn count(&self, name: &str) -> usize {
            self.names().into_iter().filter(|n| *n == name).count()
        }

        /// The conflict handle the UI would have been given
        fn last_conflict(&self) -> Option<ConflictEvent> {
            self.events.lock().unwrap().iter().rev().find_map(|e| match e {
                HistoryEvent::VersionConflict(conflict) => Some(conflict.clone()),
                _ => None,
            })
        }
    }

    fn open(storage: &Arc<MemoryStorage>, bus: &TabBus) -> HistorySession {
        let storage: Arc<dyn VersionStorage> = storage.clone();
        HistorySession::open(HistoryConfig::default(), storage, bus.clone()).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn three_quick_edits_become_one_squashed_version() {
        let bus = TabBus::new("character");
        let storage = Arc::new(MemoryStorage::new());
        let session = open(&storage, &bus);

        let mut doc = character("Ava");
        session.record_edit(&doc, "Changed name").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        doc["tier"] = json!(2);
        session.record_edit(&doc, "Changed tier").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        doc["type"] = json!("Nano");
        session.record_edit(&doc, "Changed type").unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let versions = session.versions();
        assert_eq!(versions.len(), 1);
        let record = &versions[0];
        assert_eq!(record.snapshot, doc);
        assert_eq!(record.description, "Edited name, tier, type");

        let wire = serde_json::to_value(record).unwrap();
        assert_eq!(wire["isSquashed"], true);
        assert_eq!(wire["squashedCount"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_commit_exactly_once() {
        let bus = TabBus::new("character");
        let storage = Arc::new(MemoryStorage::new());
        let session = open(&storage, &bus);
        let recorder = Recorder::attach(&session);

        for i in 0..20 {
            session
                .record_edit(&character(&format!("Ava {}", i)), "Changed name")
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_secs(3)).await;

        let versions = session.versions();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].snapshot, character("Ava 19"));
        assert_eq!(versions[0].squashed_count, Some(20));
        assert_eq!(versions[0].description, "Changed name");
        assert_eq!(recorder.count("squash-completed"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn undo_before_commit_leaves_the_log_empty() {
        let bus = TabBus::new("character");
        let storage = Arc::new(MemoryStorage::new());
        let session = open(&storage, &bus);

        session.record_edit(&character("Ava"), "Changed name").unwrap();
        let outcome = session.undo();
        assert_eq!(outcome, UndoOutcome::Buffered { restored: None });
        assert_eq!(session.pending_len(), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(session.versions().is_empty());
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn undo_after_commit_only_moves_the_cursor() {
        let bus = TabBus::new("character");
        let storage = Arc::new(MemoryStorage::new());
        let session = open(&storage, &bus);

        session.record_edit(&character("Ava"), "Changed name").unwrap();
        session.flush().await.unwrap();
        session.record_edit(&character("Bea"), "Changed name").unwrap();
        session.flush().await.unwrap();
        assert_eq!(session.versions().len(), 2);

        assert_eq!(session.undo(), UndoOutcome::Navigated { index: 0 });
        assert!(session.is_viewing_old_version());
        assert_eq!(session.displayed_character().unwrap()["name"], "Ava");
        assert_eq!(storage.count().unwrap(), 2);

        assert_eq!(session.redo(), UndoOutcome::Navigated { index: 1 });
        assert!(!session.is_viewing_old_version());
    }

    #[tokio::test(start_paused = true)]
    async fn dirty_tab_gets_conflict_and_clean_tab_gets_notice() {
        let bus = TabBus::new("character");
        let storage = Arc::new(MemoryStorage::new());
        let tab_a = open(&storage, &bus);
        let tab_b = open(&storage, &bus);
        let tab_c = open(&storage, &bus);
        let events_b = Recorder::attach(&tab_b);
        let events_c = Recorder::attach(&tab_c);
        settle().await;

        tab_b.record_edit(&character("From B"), "Changed name").unwrap();
        tab_a.record_edit(&character("From A"), "Changed name").unwrap();
        tab_a.flush().await.unwrap();
        settle().await;

        assert_eq!(events_b.count("version-conflict"), 1);
        assert_eq!(events_c.count("newer-version-available"), 1);
        assert_eq!(events_c.count("version-conflict"), 0);

        // B's own timer commit is held back by the unresolved conflict
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(storage.count().unwrap(), 1);
        assert_eq!(tab_b.pending_len(), 1);

        let conflict = tab_b.active_conflict().unwrap();
        let outcome = tab_b
            .resolve_conflict(&conflict, ConflictChoice::LoadRemote)
            .await
            .unwrap();
        assert!(matches!(outcome, Some(ConflictOutcome::ReloadRequired { .. })));
        assert_eq!(tab_b.pending_len(), 0);
        assert_eq!(tab_b.latest_character().unwrap()["name"], "From A");
        assert!(
            tab_b
                .resolve_conflict(&conflict, ConflictChoice::SaveLocal)
                .await
                .unwrap()
                .is_none()
        );

        settle().await;
        assert!(events_c.count("conflict-resolved") >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn save_local_overwrites_and_notifies_the_other_tab() {
        let bus = TabBus::new("character");
        let storage = Arc::new(MemoryStorage::new());
        let tab_a = open(&storage, &bus);
        let tab_b = open(&storage, &bus);
        let events_a = Recorder::attach(&tab_a);
        settle().await;

        tab_b.record_edit(&character("From B"), "Changed name").unwrap();
        tab_a.record_edit(&character("From A"), "Changed name").unwrap();
        tab_a.flush().await.unwrap();
        settle().await;

        let conflict = tab_b.active_conflict().unwrap();
        let outcome = tab_b
            .resolve_conflict(&conflict, ConflictChoice::SaveLocal)
            .await
            .unwrap();
        assert_eq!(outcome, Some(ConflictOutcome::ProceedWithSave));
        settle().await;

        let versions = tab_a.store().get_all_versions().unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].snapshot["name"], "From B");
        assert_eq!(events_a.count("conflict-resolved"), 1);
        assert_eq!(events_a.count("newer-version-available"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn load_remote_from_the_event_handle_discards_local_edits() {
        let bus = TabBus::new("character");
        let storage = Arc::new(MemoryStorage::new());
        let tab_a = open(&storage, &bus);
        let tab_b = open(&storage, &bus);
        let events_b = Recorder::attach(&tab_b);
        settle().await;

        tab_b.record_edit(&character("B-local"), "Changed name").unwrap();
        tab_a.record_edit(&character("A-remote"), "Changed name").unwrap();
        tab_a.flush().await.unwrap();
        settle().await;

        let conflict = events_b.last_conflict().unwrap();
        assert!(matches!(
            conflict.resolve(ConflictChoice::LoadRemote),
            Some(ConflictOutcome::ReloadRequired { .. })
        ));
        assert_eq!(tab_b.pending_len(), 0);
        assert_eq!(tab_b.latest_character().unwrap()["name"], "A-remote");

        tokio::time::sleep(Duration::from_secs(2)).await;
        tab_b.shutdown().await.unwrap();

        let names: Vec<Value> = storage
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.snapshot["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("A-remote")]);
    }

    #[tokio::test(start_paused = true)]
    async fn save_local_from_the_event_handle_commits_held_edits() {
        let bus = TabBus::new("character");
        let storage = Arc::new(MemoryStorage::new());
        let tab_a = open(&storage, &bus);
        let tab_b = open(&storage, &bus);
        let events_b = Recorder::attach(&tab_b);
        settle().await;

        tab_b.record_edit(&character("B-local"), "Changed name").unwrap();
        tab_a.record_edit(&character("A-remote"), "Changed name").unwrap();
        tab_a.flush().await.unwrap();
        settle().await;

        // B's own timer fires and is held back by the conflict
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(tab_b.pending_len(), 1);

        let conflict = events_b.last_conflict().unwrap();
        assert_eq!(
            conflict.resolve(ConflictChoice::SaveLocal),
            Some(ConflictOutcome::ProceedWithSave)
        );
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(tab_b.pending_len(), 0);
        let versions = tab_a.store().get_all_versions().unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].snapshot["name"], "B-local");
    }

    #[tokio::test(start_paused = true)]
    async fn cap_is_enforced_through_the_session() {
        let bus = TabBus::new("character");
        let storage = Arc::new(MemoryStorage::new());
        let config = HistoryConfig {
            max_versions: 5,
            ..HistoryConfig::default()
        };
        let session = HistorySession::open(config, storage.clone(), bus).unwrap();

        for i in 0..8 {
            session
                .record_edit(&character(&format!("v{}", i)), "Changed name")
                .unwrap();
            session.flush().await.unwrap();
        }

        let versions = session.versions();
        assert_eq!(versions.len(), 5);
        assert_eq!(versions[0].snapshot["name"], "v3");
        assert_eq!(versions[4].snapshot["name"], "v7");
        for pair in versions.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test(start_paused = true)]
    async fn sqlite_history_survives_a_restart() {
        use sheetkeeper_core::history::SqliteStorage;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let bus = TabBus::new("character");

        let session = HistorySession::open(
            HistoryConfig::default(),
            Arc::new(SqliteStorage::new(&path)),
            bus.clone(),
        )
        .unwrap();
        let mut doc = character("Ava");
        doc["portrait"] = json!("data:image/png;base64,AAAA");
        session.record_edit(&doc, "Changed name").unwrap();
        session.shutdown().await.unwrap();
        drop(session);

        let reopened = HistorySession::open(
            HistoryConfig::default(),
            Arc::new(SqliteStorage::new(&path)),
            bus,
        )
        .unwrap();
        let versions = reopened.versions();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].snapshot, character("Ava"));
        assert!(versions[0].is_squashed);
    }
}
