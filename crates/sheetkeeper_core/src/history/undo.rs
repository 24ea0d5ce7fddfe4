//! Unified undo/redo over buffered and committed edits.
//!
//! While edits sit in the squash buffer, undo and redo move entries between
//! the buffer and a redo stack and never touch the store. Once everything is
//! committed, undo and redo step the navigation cursor through versions
//! instead.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

use super::navigation::VersionNavigator;
use super::squash::SquashScheduler;
use super::types::PendingChange;
use crate::callback_registry::EventRegistry;
use crate::change::ChangeDescription;
use crate::error::Result;
use crate::events::HistoryEvent;

/// Which gesture was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoAction {
    Undo,
    Redo,
}

impl fmt::Display for UndoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndoAction::Undo => f.write_str("undo"),
            UndoAction::Redo => f.write_str("redo"),
        }
    }
}

/// What an undo or redo did.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoOutcome {
    /// A buffered edit was undone or redone. `restored` is the document now
    /// shown, `None` when undoing the very first edit of an empty document.
    Buffered { restored: Option<Value> },
    /// The cursor moved to another committed version.
    Navigated { index: usize },
    /// Nothing to undo or redo.
    Nothing,
}

/// The two undo modes.
#[derive(Debug, Clone)]
pub enum UndoState {
    /// Edits are buffered (or were undone) since the commit numbered `epoch`.
    Buffered {
        /// Document before the first buffered edit
        base: Option<Value>,
        /// Undone edits, newest last
        redo: Vec<PendingChange>,
        epoch: u64,
    },
    /// Everything is committed
    Committed,
}

/// Dispatches undo/redo to the buffer or to version navigation.
pub struct UndoCoordinator {
    scheduler: Arc<SquashScheduler>,
    navigator: Arc<Mutex<VersionNavigator>>,
    events: Arc<EventRegistry>,
    state: Mutex<UndoState>,
}

impl UndoCoordinator {
    pub fn new(
        scheduler: Arc<SquashScheduler>,
        navigator: Arc<Mutex<VersionNavigator>>,
        events: Arc<EventRegistry>,
    ) -> Self {
        Self {
            scheduler,
            navigator,
            events,
            state: Mutex::new(UndoState::Committed),
        }
    }

    /// Current undo mode.
    pub fn state(&self) -> UndoState {
        self.state.lock().unwrap().clone()
    }

    /// Buffer an edit and make it the live document.
    ///
    /// The first edit after a commit remembers the pre-edit document as the
    /// undo base. Any edit clears the redo stack.
    pub fn record_edit<T: Serialize + ?Sized>(
        &self,
        snapshot: &T,
        description: impl Into<ChangeDescription>,
    ) -> Result<Value> {
        let snapshot = serde_json::to_value(snapshot)?;
        let epoch = self.scheduler.commit_epoch();
        let mut state = self.state.lock().unwrap();

        let base = match &*state {
            UndoState::Buffered {
                base,
                redo,
                epoch: started,
            } if *started == epoch && (self.scheduler.pending_len() > 0 || !redo.is_empty()) => {
                base.clone()
            }
            _ => self.navigator.lock().unwrap().latest_character().cloned(),
        };

        self.scheduler.buffer_change(&snapshot, description)?;
        *state = UndoState::Buffered {
            base,
            redo: Vec::new(),
            epoch,
        };
        drop(state);

        self.navigator
            .lock()
            .unwrap()
            .set_latest_character(snapshot.clone());
        Ok(snapshot)
    }

    /// Whether redo currently works on the buffer.
    ///
    /// Undone buffered edits stay redoable until the next commit, even when
    /// the buffer itself is empty.
    fn redo_buffered_mode(&self, state: &UndoState) -> bool {
        match state {
            UndoState::Buffered { redo, epoch, .. } => {
                self.scheduler.pending_len() > 0
                    || (!redo.is_empty() && *epoch == self.scheduler.commit_epoch())
            }
            UndoState::Committed => false,
        }
    }

    /// Undo the newest edit, or step back one version.
    ///
    /// Only an uncommitted buffer keeps undo on the buffer. Once it is empty,
    /// undo walks back through stored versions.
    pub fn undo(&self) -> UndoOutcome {
        let mut state = self.state.lock().unwrap();
        let outcome = if self.scheduler.pending_len() > 0 {
            self.undo_buffered(&mut state)
        } else {
            let mut navigator = self.navigator.lock().unwrap();
            if navigator.navigate_backward() {
                // Leaving the buffer behind drops its redo stack
                *state = UndoState::Committed;
                UndoOutcome::Navigated {
                    index: navigator.current_index().unwrap_or(0),
                }
            } else {
                UndoOutcome::Nothing
            }
        };
        drop(state);
        self.finish(UndoAction::Undo, outcome)
    }

    /// Redo the newest undone edit, or step forward one version.
    pub fn redo(&self) -> UndoOutcome {
        let mut state = self.state.lock().unwrap();
        let outcome = if self.redo_buffered_mode(&state) {
            self.redo_buffered(&mut state)
        } else {
            *state = UndoState::Committed;
            drop(state);
            let mut navigator = self.navigator.lock().unwrap();
            if navigator.navigate_forward() {
                UndoOutcome::Navigated {
                    index: navigator.current_index().unwrap_or(0),
                }
            } else {
                UndoOutcome::Nothing
            }
        };
        self.finish(UndoAction::Redo, outcome)
    }

    fn undo_buffered(&self, state: &mut UndoState) -> UndoOutcome {
        let UndoState::Buffered { base, redo, .. } = state else {
            return UndoOutcome::Nothing;
        };
        let Some(undone) = self.scheduler.pop_pending() else {
            return UndoOutcome::Nothing;
        };
        redo.push(undone);

        let restored = self
            .scheduler
            .latest_pending_snapshot()
            .or_else(|| base.clone());
        if self.scheduler.pending_len() > 0 {
            self.restart_timer();
        } else {
            self.scheduler.cancel_timer();
        }

        let mut navigator = self.navigator.lock().unwrap();
        match &restored {
            Some(snapshot) => navigator.set_latest_character(snapshot.clone()),
            None => navigator.clear_latest_character(),
        }
        UndoOutcome::Buffered { restored }
    }

    fn redo_buffered(&self, state: &mut UndoState) -> UndoOutcome {
        let UndoState::Buffered { redo, .. } = state else {
            return UndoOutcome::Nothing;
        };
        let Some(change) = redo.pop() else {
            return UndoOutcome::Nothing;
        };
        let restored = change.snapshot.clone();
        self.scheduler.push_pending(change);
        self.restart_timer();

        self.navigator
            .lock()
            .unwrap()
            .set_latest_character(restored.clone());
        UndoOutcome::Buffered {
            restored: Some(restored),
        }
    }

    fn restart_timer(&self) {
        if let Err(e) = self.scheduler.reset_timer() {
            log::warn!("Buffered edits wait for the next flush: {}", e);
        }
    }

    fn finish(&self, action: UndoAction, outcome: UndoOutcome) -> UndoOutcome {
        log::debug!("{} -> {:?}", action, outcome);
        self.events.emit(&HistoryEvent::UndoCompleted {
            action,
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Forget buffered undo state, e.g. after the buffer was discarded.
    pub fn reset(&self) {
        *self.state.lock().unwrap() = UndoState::Committed;
    }
}

impl std::fmt::Debug for UndoCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoCoordinator")
            .field("state", &*self.state.lock().unwrap())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistoryConfig;
    use crate::history::{MemoryStorage, VersionStore};
    use crate::test_utils::{EventLog, character};
    use std::time::Duration;

    struct Fixture {
        scheduler: Arc<SquashScheduler>,
        navigator: Arc<Mutex<VersionNavigator>>,
        undo: UndoCoordinator,
        log: EventLog,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(EventRegistry::new());
        let log = EventLog::attach(&events);
        let store = Arc::new(VersionStore::new(
            Arc::new(MemoryStorage::new()),
            &HistoryConfig::default(),
        ));
        store.init().unwrap();
        let scheduler = Arc::new(SquashScheduler::new(
            store.clone(),
            None,
            events.clone(),
            Duration::from_millis(1000),
        ));
        let mut navigator = VersionNavigator::new(store);
        navigator.init().unwrap();
        navigator.set_latest_character(character("Original"));
        let navigator = Arc::new(Mutex::new(navigator));
        let undo = UndoCoordinator::new(scheduler.clone(), navigator.clone(), events);
        Fixture {
            scheduler,
            navigator,
            undo,
            log,
        }
    }

    fn head(fixture: &Fixture) -> Value {
        fixture
            .navigator
            .lock()
            .unwrap()
            .latest_character()
            .cloned()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_before_commit_never_writes() {
        let f = fixture();
        f.undo.record_edit(&character("A"), "Changed name").unwrap();
        f.undo.record_edit(&character("B"), "Changed name").unwrap();

        let outcome = f.undo.undo();
        assert_eq!(
            outcome,
            UndoOutcome::Buffered {
                restored: Some(character("A"))
            }
        );
        assert_eq!(head(&f)["name"], "A");

        f.undo.undo();
        assert_eq!(head(&f)["name"], "Original");
        assert_eq!(f.scheduler.pending_len(), 0);
        assert!(!f.scheduler.timer_armed());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(f.scheduler.store().is_empty().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_redo_buffered() {
        let f = fixture();
        f.undo.record_edit(&character("A"), "Changed name").unwrap();
        f.undo.record_edit(&character("B"), "Changed name").unwrap();
        f.undo.undo();
        f.undo.undo();

        assert_eq!(
            f.undo.redo(),
            UndoOutcome::Buffered {
                restored: Some(character("A"))
            }
        );
        assert_eq!(f.scheduler.pending_len(), 1);
        f.undo.redo();
        assert_eq!(head(&f)["name"], "B");
        assert_eq!(f.undo.redo(), UndoOutcome::Nothing);

        // The redone edits are committed like any other
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let versions = f.scheduler.store().get_all_versions().unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].snapshot["name"], "B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_edit_clears_redo() {
        let f = fixture();
        f.undo.record_edit(&character("A"), "Changed name").unwrap();
        f.undo.undo();
        f.undo.record_edit(&character("C"), "Changed name").unwrap();

        assert_eq!(f.undo.redo(), UndoOutcome::Nothing);
        f.undo.undo();
        assert_eq!(head(&f)["name"], "Original");
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_after_commit_navigates() {
        let f = fixture();
        f.undo.record_edit(&character("A"), "Changed name").unwrap();
        f.scheduler.flush().await.unwrap();
        f.undo.record_edit(&character("B"), "Changed name").unwrap();
        f.scheduler.flush().await.unwrap();
        f.navigator.lock().unwrap().reload().unwrap();

        assert_eq!(f.undo.undo(), UndoOutcome::Navigated { index: 0 });
        assert_eq!(f.scheduler.store().len().unwrap(), 2);
        assert_eq!(f.undo.undo(), UndoOutcome::Nothing);
        assert_eq!(f.undo.redo(), UndoOutcome::Navigated { index: 1 });
        assert_eq!(f.undo.redo(), UndoOutcome::Nothing);

        let names = f.log.names();
        assert_eq!(names.iter().filter(|n| **n == "undo-completed").count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_past_emptied_buffer_steps_back_a_version() {
        let f = fixture();
        f.undo.record_edit(&character("A"), "Changed name").unwrap();
        f.scheduler.flush().await.unwrap();
        f.undo.record_edit(&character("B"), "Changed name").unwrap();
        f.scheduler.flush().await.unwrap();
        f.navigator.lock().unwrap().reload().unwrap();

        f.undo.record_edit(&character("C"), "Changed name").unwrap();
        assert_eq!(
            f.undo.undo(),
            UndoOutcome::Buffered {
                restored: Some(character("B"))
            }
        );
        assert_eq!(f.scheduler.pending_len(), 0);

        assert_eq!(f.undo.undo(), UndoOutcome::Navigated { index: 0 });
        assert!(f.navigator.lock().unwrap().is_viewing_old_version());
        assert!(matches!(f.undo.state(), UndoState::Committed));

        // The undone "C" was dropped with the buffer, redo walks versions
        assert_eq!(f.undo.redo(), UndoOutcome::Navigated { index: 1 });
        assert_eq!(f.undo.redo(), UndoOutcome::Nothing);
        assert_eq!(f.scheduler.store().len().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redo_survives_undo_with_nowhere_to_go() {
        let f = fixture();
        f.undo.record_edit(&character("A"), "Changed name").unwrap();
        f.undo.undo();
        assert_eq!(f.undo.undo(), UndoOutcome::Nothing);

        assert_eq!(
            f.undo.redo(),
            UndoOutcome::Buffered {
                restored: Some(character("A"))
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_invalidates_buffered_redo() {
        let f = fixture();
        f.undo.record_edit(&character("A"), "Changed name").unwrap();
        f.undo.record_edit(&character("B"), "Changed name").unwrap();
        f.undo.undo();
        f.scheduler.flush().await.unwrap();

        // Redo of "B" is gone, and with a single version there is nowhere to go
        f.navigator.lock().unwrap().reload().unwrap();
        assert_eq!(f.undo.redo(), UndoOutcome::Nothing);
        assert!(matches!(f.undo.state(), UndoState::Committed));
    }

    #[test]
    fn test_nothing_to_undo() {
        let f = fixture();
        assert_eq!(f.undo.undo(), UndoOutcome::Nothing);
        assert_eq!(f.undo.redo(), UndoOutcome::Nothing);
        assert_eq!(f.log.names(), vec!["undo-completed", "undo-completed"]);
    }
}
