//! Debounced squashing of rapid edits into one version.
//!
//! Every edit lands in an in-memory buffer and (re)starts a single debounce
//! timer. When the timer fires, or on [`SquashScheduler::flush`], the whole
//! buffer is committed as one [`VersionRecord`]: the newest snapshot wins and
//! the descriptions are merged.
//!
//! ```text
//!  Idle ──edit──▶ Pending ──timer / flush──▶ Committing ──▶ Idle
//!                   ▲  │                          │
//!                   └──┘ edit (timer reset)       └─ failure: entries back in the buffer
//! ```

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::types::{PendingChange, VersionRecord};
use super::version_store::VersionStore;
use crate::callback_registry::EventRegistry;
use crate::change::{ChangeDescription, merge_descriptions};
use crate::error::{HistoryError, Result};
use crate::events::HistoryEvent;
use crate::tabs::{ConflictDetector, ConflictEvent, SaveClearance};

/// Where the scheduler is in its commit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// Nothing buffered
    Idle,
    /// Edits buffered, waiting for the timer
    Pending,
    /// A commit is writing to the store
    Committing,
}

/// Result of a commit attempt.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// The buffer was written as one version
    Committed(VersionRecord),
    /// Nothing was buffered
    Empty,
    /// The conflict gate refused the commit; the buffer is untouched
    Blocked(ConflictEvent),
}

struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

struct SchedulerState {
    buffer: Vec<PendingChange>,
    timer: Option<Timer>,
    next_timer_id: u64,
    committing: bool,
    commit_epoch: u64,
}

struct SchedulerShared {
    store: Arc<VersionStore>,
    gate: Option<ConflictDetector>,
    events: Arc<EventRegistry>,
    delay: Duration,
    state: Mutex<SchedulerState>,
    /// Serializes commits
    commit_lock: tokio::sync::Mutex<()>,
}

impl SchedulerShared {
    fn cancel_timer(state: &mut SchedulerState) {
        if let Some(timer) = state.timer.take() {
            timer.handle.abort();
        }
    }

    fn arm_timer(self: &Arc<Self>, state: &mut SchedulerState, delay: Duration) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| HistoryError::NoRuntime)?;
        Self::cancel_timer(state);
        let id = state.next_timer_id;
        state.next_timer_id += 1;

        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            {
                // Detach so a concurrent reset cannot abort the commit below
                let mut state = shared.state.lock().unwrap();
                if state.timer.as_ref().map(|t| t.id) != Some(id) {
                    return;
                }
                state.timer = None;
            }
            shared.commit_from_timer().await;
        });
        state.timer = Some(Timer { id, handle });
        Ok(())
    }

    async fn commit_from_timer(self: &Arc<Self>) {
        match self.commit().await {
            Ok(CommitOutcome::Committed(record)) => {
                log::debug!("Timer commit wrote version {}", record.id);
            }
            Ok(CommitOutcome::Empty) => {}
            Ok(CommitOutcome::Blocked(_)) => {
                log::info!("Squash deferred until the version conflict is resolved");
            }
            Err(e) => {
                let kept = self.state.lock().unwrap().buffer.len();
                log::error!("Squash commit failed, {} edit(s) kept for retry: {}", kept, e);
                self.events.emit(&HistoryEvent::CommitFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    async fn commit(self: &Arc<Self>) -> Result<CommitOutcome> {
        let _commit = self.commit_lock.lock().await;
        if self.state.lock().unwrap().buffer.is_empty() {
            return Ok(CommitOutcome::Empty);
        }

        if let Some(gate) = &self.gate
            && let SaveClearance::Blocked(conflict) = gate.check_before_save().await
        {
            return Ok(CommitOutcome::Blocked(conflict));
        }

        let entries = {
            let mut state = self.state.lock().unwrap();
            // Undo may have emptied the buffer during the grace window
            if state.buffer.is_empty() {
                return Ok(CommitOutcome::Empty);
            }
            state.committing = true;
            std::mem::take(&mut state.buffer)
        };

        let result = self.persist(&entries).await;

        let mut state = self.state.lock().unwrap();
        state.committing = false;
        match result {
            Ok(record) => {
                state.commit_epoch += 1;
                let still_pending = state.buffer.last().map(|c| c.snapshot.clone());
                drop(state);

                if let Some(gate) = &self.gate {
                    gate.notify_version_saved(&record);
                    if let Some(snapshot) = still_pending {
                        gate.mark_dirty(snapshot);
                    }
                }
                self.events.emit(&HistoryEvent::SquashCompleted {
                    record: record.clone(),
                });
                Ok(CommitOutcome::Committed(record))
            }
            Err(e) => {
                let newer = std::mem::replace(&mut state.buffer, entries);
                state.buffer.extend(newer);
                Err(e)
            }
        }
    }

    async fn persist(&self, entries: &[PendingChange]) -> Result<VersionRecord> {
        let Some(newest) = entries.last() else {
            return Err(HistoryError::StorageIo("nothing to commit".into()));
        };
        let snapshot = newest.snapshot.clone();
        let descriptions: Vec<ChangeDescription> =
            entries.iter().map(|c| c.description.clone()).collect();
        let description = merge_descriptions(&descriptions);
        let count = entries.len();
        let store = Arc::clone(&self.store);

        let record = tokio::task::spawn_blocking(move || -> Result<VersionRecord> {
            let mut record = store.save_version(&snapshot, &description)?;
            match store.mark_squashed(&record.id, count) {
                Ok(_) => {
                    record.is_squashed = true;
                    record.squashed_count = Some(count);
                }
                Err(e) => log::warn!(
                    "Version {} saved but squash metadata was not recorded: {}",
                    record.id,
                    e
                ),
            }
            Ok(record)
        })
        .await
        .map_err(|e| HistoryError::StorageIo(format!("commit task failed: {}", e)))??;

        log::info!(
            "Squashed {} edit(s) into version {} ({})",
            count,
            record.id,
            record.description
        );
        Ok(record)
    }
}

impl Drop for SchedulerShared {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            Self::cancel_timer(state);
        }
    }
}

/// Buffers edits and commits them as squashed versions.
pub struct SquashScheduler {
    shared: Arc<SchedulerShared>,
}

impl SquashScheduler {
    /// Create a scheduler committing to `store` after `delay` of inactivity.
    ///
    /// When `gate` is set every commit first passes
    /// [`ConflictDetector::check_before_save`] and announces the new version
    /// afterwards.
    pub fn new(
        store: Arc<VersionStore>,
        gate: Option<ConflictDetector>,
        events: Arc<EventRegistry>,
        delay: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                store,
                gate,
                events,
                delay,
                state: Mutex::new(SchedulerState {
                    buffer: Vec::new(),
                    timer: None,
                    next_timer_id: 0,
                    committing: false,
                    commit_epoch: 0,
                }),
                commit_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The store commits go to
    pub fn store(&self) -> &Arc<VersionStore> {
        &self.shared.store
    }

    /// Debounce delay
    pub fn delay(&self) -> Duration {
        self.shared.delay
    }

    /// Current phase
    pub fn phase(&self) -> SchedulerPhase {
        let state = self.shared.state.lock().unwrap();
        if state.committing {
            SchedulerPhase::Committing
        } else if state.buffer.is_empty() {
            SchedulerPhase::Idle
        } else {
            SchedulerPhase::Pending
        }
    }

    /// Cancel the pending timer (if any) and start a new one.
    ///
    /// The timer runs on the current tokio runtime; without one this returns
    /// [`HistoryError::NoRuntime`] and no timer is armed.
    pub fn reset_timer(&self) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        self.shared.arm_timer(&mut state, self.shared.delay)
    }

    /// Commit the buffer on the next tick instead of after the debounce delay.
    ///
    /// Returns `false` when nothing is buffered. Unlike [`flush`](Self::flush)
    /// this does not wait, so it can be called from an event callback.
    pub fn request_commit(&self) -> Result<bool> {
        let mut state = self.shared.state.lock().unwrap();
        if state.buffer.is_empty() {
            return Ok(false);
        }
        self.shared.arm_timer(&mut state, Duration::ZERO)?;
        Ok(true)
    }

    /// Cancel the pending timer without committing.
    pub fn cancel_timer(&self) {
        let mut state = self.shared.state.lock().unwrap();
        SchedulerShared::cancel_timer(&mut state);
    }

    /// Whether a debounce timer is armed
    pub fn timer_armed(&self) -> bool {
        self.shared.state.lock().unwrap().timer.is_some()
    }

    /// Buffer an edit and restart the timer.
    ///
    /// The snapshot is serialized into an owned JSON value, so the caller may
    /// keep mutating its own copy. A snapshot that cannot be serialized is
    /// rejected and the buffer is left as it was, as is an edit made outside
    /// a tokio runtime ([`HistoryError::NoRuntime`]).
    pub fn buffer_change<T: Serialize + ?Sized>(
        &self,
        snapshot: &T,
        description: impl Into<ChangeDescription>,
    ) -> Result<()> {
        let snapshot = serde_json::to_value(snapshot)?;
        let mut state = self.shared.state.lock().unwrap();
        self.shared.arm_timer(&mut state, self.shared.delay)?;
        state
            .buffer
            .push(PendingChange::new(snapshot, description.into()));
        Ok(())
    }

    /// Restart the timer, then buffer the edit.
    pub fn track_change<T: Serialize + ?Sized>(
        &self,
        snapshot: &T,
        description: impl Into<ChangeDescription>,
    ) -> Result<()> {
        self.reset_timer()?;
        self.buffer_change(snapshot, description)
    }

    /// Commit the buffer now.
    ///
    /// Waits for an in-flight commit first. On failure the buffered edits
    /// are kept and the error is returned.
    pub async fn flush(&self) -> Result<CommitOutcome> {
        self.cancel_timer();
        self.shared.commit().await
    }

    /// Number of buffered edits
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().unwrap().buffer.len()
    }

    /// Copy of the buffered edits, oldest first
    pub fn pending_changes(&self) -> Vec<PendingChange> {
        self.shared.state.lock().unwrap().buffer.clone()
    }

    /// Snapshot of the newest buffered edit
    pub fn latest_pending_snapshot(&self) -> Option<Value> {
        self.shared
            .state
            .lock()
            .unwrap()
            .buffer
            .last()
            .map(|c| c.snapshot.clone())
    }

    /// Remove and return the newest buffered edit.
    pub fn pop_pending(&self) -> Option<PendingChange> {
        self.shared.state.lock().unwrap().buffer.pop()
    }

    /// Put an edit back on top of the buffer. The timer is left alone.
    pub fn push_pending(&self, change: PendingChange) {
        self.shared.state.lock().unwrap().buffer.push(change);
    }

    /// Drop every buffered edit and cancel the timer.
    pub fn discard_pending(&self) -> usize {
        let mut state = self.shared.state.lock().unwrap();
        SchedulerShared::cancel_timer(&mut state);
        let dropped = state.buffer.len();
        state.buffer.clear();
        if dropped > 0 {
            log::info!("Discarded {} buffered edit(s)", dropped);
        }
        dropped
    }

    /// Number of successful commits so far.
    pub fn commit_epoch(&self) -> u64 {
        self.shared.state.lock().unwrap().commit_epoch
    }
}

impl std::fmt::Debug for SquashScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SquashScheduler")
            .field("delay", &self.shared.delay)
            .field("phase", &self.phase())
            .field("pending", &self.pending_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistoryConfig;
    use crate::history::MemoryStorage;
    use crate::tabs::TabBus;
    use crate::test_utils::{EventLog, FlakyStorage, character};
    use std::collections::HashMap;

    const DELAY: Duration = Duration::from_millis(1000);

    fn store_over(storage: Arc<dyn crate::history::VersionStorage>) -> Arc<VersionStore> {
        let store = Arc::new(VersionStore::new(storage, &HistoryConfig::default()));
        store.init().unwrap();
        store
    }

    fn scheduler() -> (SquashScheduler, EventLog) {
        let events = Arc::new(EventRegistry::new());
        let log = EventLog::attach(&events);
        let store = store_over(Arc::new(MemoryStorage::new()));
        (SquashScheduler::new(store, None, events, DELAY), log)
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_edits_squash_into_one_version() {
        let (scheduler, log) = scheduler();

        scheduler
            .buffer_change(&character("Kira"), "Changed name")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut doc = character("Kira");
        doc["tier"] = serde_json::json!(2);
        scheduler.buffer_change(&doc, "Changed tier").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        doc["type"] = serde_json::json!("Nano");
        scheduler.buffer_change(&doc, "Changed type").unwrap();
        assert_eq!(scheduler.phase(), SchedulerPhase::Pending);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let versions = scheduler.store().get_all_versions().unwrap();
        assert_eq!(versions.len(), 1);
        assert!(versions[0].is_squashed);
        assert_eq!(versions[0].squashed_count, Some(3));
        assert_eq!(versions[0].snapshot, doc);
        assert_eq!(versions[0].description, "Edited name, tier, type");
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
        assert_eq!(scheduler.commit_epoch(), 1);
        assert_eq!(log.names(), vec!["squash-completed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_edit_restarts_the_timer() {
        let (scheduler, _) = scheduler();

        for i in 0..5 {
            scheduler
                .buffer_change(&character(&format!("v{}", i)), "Changed name")
                .unwrap();
            tokio::time::sleep(Duration::from_millis(600)).await;
            assert!(scheduler.store().is_empty().unwrap());
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        let versions = scheduler.store().get_all_versions().unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].snapshot["name"], "v4");
        assert_eq!(versions[0].description, "Changed name");
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_commits_immediately() {
        let (scheduler, _) = scheduler();
        assert!(matches!(
            scheduler.flush().await.unwrap(),
            CommitOutcome::Empty
        ));

        scheduler
            .buffer_change(&character("Kira"), "Changed name")
            .unwrap();
        let outcome = scheduler.flush().await.unwrap();
        let CommitOutcome::Committed(record) = outcome else {
            panic!("expected a commit");
        };
        assert_eq!(record.squashed_count, Some(1));
        assert!(!scheduler.timer_armed());

        // The cancelled timer must not commit again
        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(scheduler.store().len().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unserializable_snapshot_leaves_buffer_alone() {
        let (scheduler, _) = scheduler();
        scheduler
            .buffer_change(&character("Kira"), "Changed name")
            .unwrap();

        let mut bad: HashMap<(i32, i32), i32> = HashMap::new();
        bad.insert((1, 2), 3);
        let err = scheduler.buffer_change(&bad, "Changed stats").unwrap_err();
        assert!(matches!(err, HistoryError::Serialization(_)));
        assert_eq!(scheduler.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_timer_commit_keeps_edits() {
        let events = Arc::new(EventRegistry::new());
        let log = EventLog::attach(&events);
        let storage = Arc::new(FlakyStorage::new());
        let scheduler = SquashScheduler::new(store_over(storage.clone()), None, events, DELAY);

        storage.fail_inserts(true);
        scheduler
            .buffer_change(&character("a"), "Changed name")
            .unwrap();
        scheduler.buffer_change(&character("b"), "Changed name").unwrap();
        tokio::time::sleep(DELAY + Duration::from_millis(1)).await;

        assert_eq!(log.names(), vec!["commit-failed"]);
        assert_eq!(scheduler.pending_len(), 2);
        assert_eq!(scheduler.phase(), SchedulerPhase::Pending);

        storage.fail_inserts(false);
        let CommitOutcome::Committed(record) = scheduler.flush().await.unwrap() else {
            panic!("expected a commit");
        };
        assert_eq!(record.squashed_count, Some(2));
        assert_eq!(record.snapshot["name"], "b");
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_error_is_returned() {
        let storage = Arc::new(FlakyStorage::new());
        let scheduler = SquashScheduler::new(
            store_over(storage.clone()),
            None,
            Arc::new(EventRegistry::new()),
            DELAY,
        );
        storage.fail_inserts(true);
        scheduler.buffer_change(&character("a"), "Changed name").unwrap();

        assert!(scheduler.flush().await.is_err());
        assert_eq!(scheduler.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_edits_during_commit_go_to_next_buffer() {
        let storage = Arc::new(FlakyStorage::new());
        let scheduler = Arc::new(SquashScheduler::new(
            store_over(storage.clone()),
            None,
            Arc::new(EventRegistry::new()),
            Duration::from_secs(3600),
        ));
        let gate = storage.gate_next_insert();

        scheduler.buffer_change(&character("a"), "Changed name").unwrap();
        let flushing = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.flush().await })
        };

        let entered = gate.entered;
        tokio::task::spawn_blocking(move || entered.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scheduler.phase(), SchedulerPhase::Committing);
        scheduler.buffer_change(&character("b"), "Changed name").unwrap();
        gate.release.send(()).unwrap();

        let CommitOutcome::Committed(record) = flushing.await.unwrap().unwrap() else {
            panic!("expected a commit");
        };
        assert_eq!(record.snapshot["name"], "a");
        assert_eq!(scheduler.pending_len(), 1);
        assert_eq!(scheduler.phase(), SchedulerPhase::Pending);
        scheduler.discard_pending();
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_gate_blocks_commit() {
        let bus = TabBus::new("character");
        let events = Arc::new(EventRegistry::new());
        let detector =
            ConflictDetector::with_tab_id("local", bus.clone(), events.clone(), DELAY / 10);
        detector.set_baseline(Some("h0".into()), 1);

        let other = ConflictDetector::with_tab_id(
            "other",
            bus.clone(),
            Arc::new(EventRegistry::new()),
            DELAY / 10,
        );
        other.notify_version_saved(&VersionRecord {
            id: "r".into(),
            snapshot: character("Other"),
            timestamp: 5,
            description: "Changed name".into(),
            content_hash: "h1".into(),
            is_squashed: false,
            squashed_count: None,
        });
        detector.process_pending();

        let scheduler = SquashScheduler::new(
            store_over(Arc::new(MemoryStorage::new())),
            Some(detector.clone()),
            events,
            DELAY,
        );
        detector.mark_dirty(character("Mine"));
        scheduler
            .buffer_change(&character("Mine"), "Changed name")
            .unwrap();

        let outcome = scheduler.flush().await.unwrap();
        let CommitOutcome::Blocked(conflict) = outcome else {
            panic!("expected the gate to block");
        };
        assert_eq!(conflict.remote_hash(), "h1");
        assert_eq!(scheduler.pending_len(), 1);
        assert!(scheduler.store().is_empty().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_pending() {
        let (scheduler, log) = scheduler();
        scheduler.buffer_change(&character("a"), "Changed name").unwrap();
        assert_eq!(scheduler.discard_pending(), 1);
        tokio::time::sleep(DELAY * 2).await;
        assert!(scheduler.store().is_empty().unwrap());
        assert!(log.names().is_empty());
    }

    #[test]
    fn test_edit_outside_runtime_is_rejected() {
        let (scheduler, _) = scheduler();

        let err = scheduler
            .buffer_change(&character("Kira"), "Changed name")
            .unwrap_err();
        assert!(matches!(err, HistoryError::NoRuntime));
        assert_eq!(scheduler.pending_len(), 0);
        assert!(scheduler.reset_timer().is_err());
        assert!(!scheduler.timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_commit_skips_the_delay() {
        let (scheduler, log) = scheduler();
        assert!(!scheduler.request_commit().unwrap());

        scheduler
            .buffer_change(&character("Kira"), "Changed name")
            .unwrap();
        assert!(scheduler.request_commit().unwrap());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(scheduler.store().len().unwrap(), 1);
        assert_eq!(scheduler.pending_len(), 0);
        assert_eq!(log.names(), vec!["squash-completed"]);
    }
}
