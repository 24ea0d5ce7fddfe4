//! One tab's history session for one document.
//!
//! [`HistorySession`] wires the store, the squash scheduler, the navigator,
//! the undo coordinator and the conflict detector together. It is the only
//! type most embedders need.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sheetkeeper_core::config::HistoryConfig;
//! use sheetkeeper_core::history::MemoryStorage;
//! use sheetkeeper_core::session::HistorySession;
//! use sheetkeeper_core::tabs::TabBus;
//!
//! let bus = TabBus::new("character");
//! let session = HistorySession::open(HistoryConfig::default(), Arc::new(MemoryStorage::new()), bus)?;
//! session.record_edit(&character, "Changed name")?;
//! session.flush().await?;
//! ```

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

use crate::callback_registry::{EventCallback, EventRegistry, SubscriptionId};
use crate::change::{ChangeCategory, ChangeDescription};
use crate::clock::{Clock, SystemClock};
use crate::config::HistoryConfig;
use crate::error::Result;
use crate::events::{EventKind, HistoryEvent};
use crate::history::types::with_binary_fields;
use crate::history::{
    CommitOutcome, SchedulerPhase, SquashScheduler, UndoCoordinator, UndoOutcome, VersionMetadata,
    VersionNavigator, VersionRecord, VersionStorage, VersionStore,
};
use crate::tabs::{ConflictChoice, ConflictDetector, ConflictEvent, ConflictOutcome, TabBus};

/// History, undo and conflict handling for one document in one tab.
pub struct HistorySession {
    config: HistoryConfig,
    store: Arc<VersionStore>,
    scheduler: Arc<SquashScheduler>,
    navigator: Arc<Mutex<VersionNavigator>>,
    undo: Arc<UndoCoordinator>,
    detector: ConflictDetector,
    events: Arc<EventRegistry>,
    reload_subscription: SubscriptionId,
    resolution_subscription: SubscriptionId,
}

impl HistorySession {
    /// Open a session and announce the tab on `bus`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(
        config: HistoryConfig,
        storage: Arc<dyn VersionStorage>,
        bus: TabBus,
    ) -> Result<Self> {
        Self::open_with_clock(config, storage, bus, Arc::new(SystemClock))
    }

    /// Open a session with an explicit clock.
    pub fn open_with_clock(
        config: HistoryConfig,
        storage: Arc<dyn VersionStorage>,
        bus: TabBus,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if bus.document_type() != config.document_type {
            log::warn!(
                "Session for {} documents opened on the {} tab bus",
                config.document_type,
                bus.document_type()
            );
        }

        let store = Arc::new(VersionStore::with_clock(storage, &config, clock));
        store.init()?;
        let newest = store.latest_version()?;

        let events = Arc::new(EventRegistry::new());
        let detector = ConflictDetector::new(bus, Arc::clone(&events), config.conflict_grace());
        match &newest {
            Some(record) => detector.set_baseline(Some(record.content_hash.clone()), record.timestamp),
            None => detector.set_baseline(None, 0),
        }

        let scheduler = Arc::new(SquashScheduler::new(
            Arc::clone(&store),
            Some(detector.clone()),
            Arc::clone(&events),
            config.squash_delay(),
        ));

        let mut navigator = VersionNavigator::new(Arc::clone(&store));
        navigator.init()?;
        if let Some(record) = newest {
            navigator.set_latest_character(record.snapshot);
        }
        let navigator = Arc::new(Mutex::new(navigator));

        let weak_navigator = Arc::downgrade(&navigator);
        let reload_subscription = events.subscribe_to(
            EventKind::SquashCompleted,
            Arc::new(move |_| {
                if let Some(navigator) = weak_navigator.upgrade()
                    && let Err(e) = navigator.lock().unwrap().reload()
                {
                    log::warn!("Could not reload versions after a squash: {}", e);
                }
            }),
        );

        let undo = Arc::new(UndoCoordinator::new(
            Arc::clone(&scheduler),
            Arc::clone(&navigator),
            Arc::clone(&events),
        ));

        // Resolving a conflict acts on the buffer, whichever handle resolved it
        let resolution_subscription = {
            let own_tab = detector.tab_id().to_string();
            let store = Arc::clone(&store);
            let scheduler = Arc::downgrade(&scheduler);
            let navigator = Arc::downgrade(&navigator);
            let undo = Arc::downgrade(&undo);
            events.subscribe_to(
                EventKind::ConflictResolved,
                Arc::new(move |event| {
                    let HistoryEvent::ConflictResolved {
                        resolution,
                        hash,
                        tab_id,
                    } = event
                    else {
                        return;
                    };
                    if *tab_id != own_tab {
                        return;
                    }
                    let (Some(scheduler), Some(navigator), Some(undo)) =
                        (scheduler.upgrade(), navigator.upgrade(), undo.upgrade())
                    else {
                        return;
                    };

                    match resolution {
                        ConflictChoice::LoadRemote => {
                            scheduler.discard_pending();
                            undo.reset();
                            if let Err(e) = load_newest_as_head(&store, &navigator, hash.as_deref()) {
                                log::warn!("Could not load the remote version: {}", e);
                            }
                        }
                        ConflictChoice::SaveLocal => {
                            if let Err(e) = scheduler.request_commit() {
                                log::warn!("Could not schedule the local save: {}", e);
                            }
                        }
                    }
                }),
            )
        };

        detector.start();
        log::info!(
            "Opened {} history in tab {} ({} version(s))",
            config.document_type,
            detector.tab_id(),
            store.len()?
        );

        Ok(Self {
            config,
            store,
            scheduler,
            navigator,
            undo,
            detector,
            events,
            reload_subscription,
            resolution_subscription,
        })
    }

    /// Session configuration
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// This tab's ID
    pub fn tab_id(&self) -> &str {
        self.detector.tab_id()
    }

    /// The underlying version store
    pub fn store(&self) -> &Arc<VersionStore> {
        &self.store
    }

    /// The conflict detector of this tab
    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    /// Subscribe to history events.
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        self.events.subscribe(callback)
    }

    /// Subscribe to one kind of history event.
    pub fn subscribe_to(&self, kind: EventKind, callback: EventCallback) -> SubscriptionId {
        self.events.subscribe_to(kind, callback)
    }

    /// Drop a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Editing
    // ------------------------------------------------------------------

    /// Record an edit of the document.
    ///
    /// Returns the conflict this edit runs into, if another tab already
    /// saved a different version.
    pub fn record_edit<T: Serialize + ?Sized>(
        &self,
        snapshot: &T,
        description: impl Into<ChangeDescription>,
    ) -> Result<Option<ConflictEvent>> {
        let snapshot = serde_json::to_value(snapshot)?;
        let conflict = self.detector.mark_dirty(snapshot.clone());
        self.undo.record_edit(&snapshot, description)?;
        Ok(conflict)
    }

    /// Undo the newest edit, or step back one version.
    pub fn undo(&self) -> UndoOutcome {
        let outcome = self.undo.undo();
        self.sync_dirty(&outcome);
        outcome
    }

    /// Redo, or step forward one version.
    pub fn redo(&self) -> UndoOutcome {
        let outcome = self.undo.redo();
        self.sync_dirty(&outcome);
        outcome
    }

    fn sync_dirty(&self, outcome: &UndoOutcome) {
        if !matches!(outcome, UndoOutcome::Buffered { .. }) {
            return;
        }
        match self.scheduler.latest_pending_snapshot() {
            Some(snapshot) => {
                self.detector.mark_dirty(snapshot);
            }
            None => self.detector.mark_clean(),
        }
    }

    /// Number of buffered edits
    pub fn pending_len(&self) -> usize {
        self.scheduler.pending_len()
    }

    /// Scheduler phase
    pub fn phase(&self) -> SchedulerPhase {
        self.scheduler.phase()
    }

    /// Commit buffered edits now.
    pub async fn flush(&self) -> Result<CommitOutcome> {
        self.scheduler.flush().await
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Step to the previous version
    pub fn navigate_backward(&self) -> bool {
        self.navigator.lock().unwrap().navigate_backward()
    }

    /// Step to the next version
    pub fn navigate_forward(&self) -> bool {
        self.navigator.lock().unwrap().navigate_forward()
    }

    /// Jump to a version by index
    pub fn navigate_to_version(&self, index: usize) -> Result<()> {
        self.navigator.lock().unwrap().navigate_to_version(index)
    }

    /// Show the newest version again
    pub fn restore_to_latest(&self) {
        self.navigator.lock().unwrap().restore_to_latest()
    }

    /// Whether a historical version is displayed
    pub fn is_viewing_old_version(&self) -> bool {
        self.navigator.lock().unwrap().is_viewing_old_version()
    }

    /// Metadata of the displayed version
    pub fn current_version_metadata(&self) -> Option<VersionMetadata> {
        self.navigator.lock().unwrap().current_version_metadata()
    }

    /// The document the UI should show
    pub fn displayed_character(&self) -> Option<Value> {
        self.navigator.lock().unwrap().displayed_character()
    }

    /// The live document, including buffered edits
    pub fn latest_character(&self) -> Option<Value> {
        self.navigator.lock().unwrap().latest_character().cloned()
    }

    /// Cached versions, oldest first
    pub fn versions(&self) -> Vec<VersionRecord> {
        self.navigator.lock().unwrap().versions().to_vec()
    }

    /// Re-read the version list from the store.
    pub fn reload(&self) -> Result<()> {
        self.navigator.lock().unwrap().reload()
    }

    /// Make the displayed historical version the live document again.
    ///
    /// The restore is recorded as a new edit, so history is never rewritten.
    /// Returns the restored document, or `None` when already at the newest
    /// version.
    pub fn restore_displayed_version(&self) -> Result<Option<Value>> {
        let (snapshot, metadata) = {
            let navigator = self.navigator.lock().unwrap();
            let Some(snapshot) = navigator.restorable_snapshot() else {
                return Ok(None);
            };
            (snapshot, navigator.current_version_metadata())
        };

        let when = metadata
            .and_then(|m| chrono::DateTime::from_timestamp_millis(m.timestamp))
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "an earlier point".to_string());
        let description =
            ChangeDescription::new(ChangeCategory::Restore, format!("Restored version from {}", when));

        self.record_edit(&snapshot, description)?;
        self.navigator.lock().unwrap().restore_to_latest();
        log::info!("Restored version from {}", when);
        Ok(Some(snapshot))
    }

    // ------------------------------------------------------------------
    // Conflicts
    // ------------------------------------------------------------------

    /// The unresolved conflict, if any
    pub fn active_conflict(&self) -> Option<ConflictEvent> {
        self.detector.active_conflict()
    }

    /// Other tabs editing the same document type
    pub fn open_tabs(&self) -> Vec<String> {
        self.detector.open_tabs()
    }

    /// Resolve a conflict and act on the choice.
    ///
    /// `LoadRemote` drops buffered edits and makes the newest stored version
    /// the live document. `SaveLocal` commits the buffered edits right away.
    /// Resolving the [`ConflictEvent`] handle directly has the same effect,
    /// except that the save-local commit runs in the background.
    /// Returns `None` if the conflict was already resolved.
    pub async fn resolve_conflict(
        &self,
        conflict: &ConflictEvent,
        choice: ConflictChoice,
    ) -> Result<Option<ConflictOutcome>> {
        let Some(outcome) = conflict.resolve(choice) else {
            return Ok(None);
        };

        if let ConflictOutcome::ProceedWithSave = outcome {
            self.scheduler.flush().await?;
        }
        Ok(Some(outcome))
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Flush what can be flushed within the teardown timeout, then leave.
    ///
    /// The tab is announced as closed even if the flush fails or times out.
    pub async fn shutdown(&self) -> Result<()> {
        let timeout = self.config.teardown_timeout();
        let result = match tokio::time::timeout(timeout, self.scheduler.flush()).await {
            Ok(Ok(CommitOutcome::Blocked(_))) => {
                log::warn!(
                    "Closing with {} unsaved edit(s) held back by a conflict",
                    self.scheduler.pending_len()
                );
                Ok(())
            }
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                log::warn!("Final flush failed: {}", e);
                Err(e)
            }
            Err(_) => {
                log::warn!("Final flush did not finish within {:?}", timeout);
                Ok(())
            }
        };

        self.scheduler.cancel_timer();
        self.detector.stop();
        self.events.unsubscribe(self.reload_subscription);
        self.events.unsubscribe(self.resolution_subscription);
        log::info!("Closed history session in tab {}", self.detector.tab_id());
        result
    }
}

/// Make the newest stored version the live document, e.g. after a tab chose
/// to load another tab's version.
fn load_newest_as_head(
    store: &VersionStore,
    navigator: &Mutex<VersionNavigator>,
    expected_hash: Option<&str>,
) -> Result<()> {
    let newest = store.latest_version()?;

    let mut navigator = navigator.lock().unwrap();
    navigator.reload()?;
    if let Some(record) = newest {
        if let Some(hash) = expected_hash
            && record.content_hash != hash
        {
            log::warn!(
                "Newest stored version {} is not the remote version {}",
                record.content_hash,
                hash
            );
        }
        let head = with_binary_fields(
            &record.snapshot,
            navigator.latest_character(),
            store.excluded_fields(),
        );
        navigator.set_latest_character(head);
    }
    navigator.restore_to_latest();
    Ok(())
}

impl std::fmt::Debug for HistorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistorySession")
            .field("tab_id", &self.detector.tab_id())
            .field("document_type", &self.config.document_type)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
