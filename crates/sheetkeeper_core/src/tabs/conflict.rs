//! Optimistic cross-tab conflict detection.
//!
//! Each tab editing a document owns one [`ConflictDetector`]. It tracks the
//! fingerprint of the last version the tab saw, whether the tab has unsaved
//! edits, and what other tabs have announced on the [`TabBus`]. Conflicts are
//! raised as [`HistoryEvent::VersionConflict`] events, never as errors.
//!
//! Detection is best-effort: a reply that arrives after the grace window of
//! [`ConflictDetector::check_before_save`] is missed, and the tab learns about
//! the other version from its `version-saved` broadcast instead.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use super::bus::{TabBus, TabReceiver};
use super::protocol::{ConflictChoice, TabMessage, TabMessageKind};
use crate::callback_registry::EventRegistry;
use crate::events::HistoryEvent;
use crate::history::VersionRecord;

/// A version announced by another tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVersion {
    /// Tab that announced it
    pub tab_id: String,
    /// Content hash
    pub hash: String,
    /// Version timestamp
    pub timestamp: i64,
    /// Version description, when known
    pub label: Option<String>,
}

/// Per-tab detection state.
#[derive(Debug, Clone)]
pub struct TabSession {
    /// This tab
    pub tab_id: String,
    /// Hash of the last version this tab saved or loaded
    pub current_hash: Option<String>,
    /// Timestamp of that version (or of the newest acknowledged remote)
    pub last_timestamp: i64,
    /// Whether the tab has edits not yet committed
    pub dirty: bool,
    /// Latest unsaved document state
    pub pending_snapshot: Option<Value>,
    /// Newer version another tab saved while this tab was clean
    pub stale_remote: Option<RemoteVersion>,
    /// Unresolved conflict, if any
    pub active_conflict: Option<ConflictEvent>,
    /// Other tabs seen on the bus
    pub peers: BTreeSet<String>,
}

impl TabSession {
    fn new(tab_id: String) -> Self {
        Self {
            tab_id,
            current_hash: None,
            last_timestamp: 0,
            dirty: false,
            pending_snapshot: None,
            stale_remote: None,
            active_conflict: None,
            peers: BTreeSet::new(),
        }
    }

    fn differs(&self, hash: &str) -> bool {
        self.current_hash.as_deref() != Some(hash)
    }

    fn is_newer(&self, remote: &RemoteVersion) -> bool {
        remote.timestamp > self.last_timestamp && self.differs(&remote.hash)
    }

    fn unresolved_conflict(&self) -> Option<ConflictEvent> {
        self.active_conflict
            .as_ref()
            .filter(|c| !c.is_resolved())
            .cloned()
    }
}

/// What a resolution asks of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// Local pending edits were dropped. Reload the remote version.
    ReloadRequired { hash: String, timestamp: i64 },
    /// Local edits stand. The next commit may proceed.
    ProceedWithSave,
}

/// Result of the pre-commit gate.
#[derive(Debug, Clone)]
pub enum SaveClearance {
    /// No known conflict, commit away
    Clear,
    /// The commit must wait until this conflict is resolved
    Blocked(ConflictEvent),
}

struct ConflictInner {
    local_hash: Option<String>,
    remote: RemoteVersion,
    resolved: AtomicBool,
    detector: Weak<DetectorInner>,
}

/// A detected conflict between this tab's unsaved edits and another tab's
/// saved version.
///
/// Clones share state: resolving any clone resolves them all, and only the
/// first call to [`resolve`](Self::resolve) has an effect.
#[derive(Clone)]
pub struct ConflictEvent {
    inner: Arc<ConflictInner>,
}

impl ConflictEvent {
    /// Hash of the version this tab's edits are based on
    pub fn local_hash(&self) -> Option<&str> {
        self.inner.local_hash.as_deref()
    }

    /// Hash of the other tab's version
    pub fn remote_hash(&self) -> &str {
        &self.inner.remote.hash
    }

    /// Timestamp of the other tab's version
    pub fn remote_timestamp(&self) -> i64 {
        self.inner.remote.timestamp
    }

    /// Description of the other tab's version, when it was announced with one
    pub fn label(&self) -> Option<&str> {
        self.inner.remote.label.as_deref()
    }

    /// Tab that saved the other version
    pub fn remote_tab_id(&self) -> &str {
        &self.inner.remote.tab_id
    }

    /// Whether the conflict was resolved (here or by another tab)
    pub fn is_resolved(&self) -> bool {
        self.inner.resolved.load(Ordering::SeqCst)
    }

    /// Whether two handles refer to the same conflict
    pub fn same_as(&self, other: &ConflictEvent) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Settle the conflict.
    ///
    /// Returns `None` when it was already resolved. Both choices are
    /// broadcast to the other tabs as `conflict-resolved`.
    pub fn resolve(&self, choice: ConflictChoice) -> Option<ConflictOutcome> {
        if self.inner.resolved.swap(true, Ordering::SeqCst) {
            return None;
        }

        let outcome = match choice {
            ConflictChoice::LoadRemote => ConflictOutcome::ReloadRequired {
                hash: self.inner.remote.hash.clone(),
                timestamp: self.inner.remote.timestamp,
            },
            ConflictChoice::SaveLocal => ConflictOutcome::ProceedWithSave,
        };

        if let Some(detector) = self.inner.detector.upgrade() {
            detector.apply_resolution(self, choice);
        }
        Some(outcome)
    }

    fn supersede(&self) {
        self.inner.resolved.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ConflictEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictEvent")
            .field("local_hash", &self.inner.local_hash)
            .field("remote", &self.inner.remote)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

struct DetectorInner {
    tab_id: String,
    bus: TabBus,
    events: Arc<EventRegistry>,
    grace: Duration,
    session: Mutex<TabSession>,
    /// Receiver for `process_pending`, handed to the listener by `start`
    queued: Mutex<Option<TabReceiver>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl DetectorInner {
    fn post(&self, kind: TabMessageKind) {
        let type_name = kind.type_name();
        if let Err(e) = self.bus.post(&TabMessage::new(self.tab_id.clone(), kind)) {
            log::warn!("Tab {} could not broadcast {}: {}", self.tab_id, type_name, e);
        }
    }

    fn emit_all(&self, events: Vec<HistoryEvent>) {
        for event in events {
            self.events.emit(&event);
        }
    }

    /// Record a conflict with `remote`. Returns the conflict and whether it
    /// is new (an identical unresolved one is reused).
    fn raise_conflict(
        self: &Arc<Self>,
        session: &mut TabSession,
        remote: RemoteVersion,
    ) -> (ConflictEvent, bool) {
        if let Some(active) = session.unresolved_conflict() {
            if active.remote_hash() == remote.hash {
                return (active, false);
            }
            active.supersede();
        }

        log::info!(
            "Tab {} conflicts with version {} from tab {}",
            self.tab_id,
            remote.hash,
            remote.tab_id
        );
        let event = ConflictEvent {
            inner: Arc::new(ConflictInner {
                local_hash: session.current_hash.clone(),
                remote,
                resolved: AtomicBool::new(false),
                detector: Arc::downgrade(self),
            }),
        };
        session.active_conflict = Some(event.clone());
        (event, true)
    }

    fn handle_message(self: &Arc<Self>, message: TabMessage) {
        if message.tab_id == self.tab_id {
            return;
        }
        let sender = message.tab_id;
        let mut replies = Vec::new();
        let mut events = Vec::new();

        {
            let mut session = self.session.lock().unwrap();
            match message.kind {
                TabMessageKind::TabOpened => {
                    log::debug!("Tab {} opened", sender);
                    session.peers.insert(sender);
                    if let Some(hash) = session.current_hash.clone() {
                        replies.push(TabMessageKind::RespondLatest {
                            hash,
                            timestamp: session.last_timestamp,
                        });
                    }
                }
                TabMessageKind::TabClosed => {
                    log::debug!("Tab {} closed", sender);
                    session.peers.remove(&sender);
                }
                TabMessageKind::VersionSaved {
                    hash,
                    timestamp,
                    label,
                } => {
                    session.peers.insert(sender.clone());
                    let remote = RemoteVersion {
                        tab_id: sender,
                        hash,
                        timestamp,
                        label,
                    };
                    if !session.differs(&remote.hash) {
                        session.last_timestamp = session.last_timestamp.max(remote.timestamp);
                    } else if session.dirty {
                        let (event, raised) = self.raise_conflict(&mut session, remote);
                        if raised {
                            events.push(HistoryEvent::VersionConflict(event));
                        }
                    } else {
                        events.push(HistoryEvent::NewerVersionAvailable {
                            hash: remote.hash.clone(),
                            timestamp: remote.timestamp,
                            label: remote.label.clone(),
                        });
                        session.stale_remote = Some(remote);
                    }
                }
                TabMessageKind::RequestLatest => {
                    session.peers.insert(sender);
                    if let Some(hash) = session.current_hash.clone() {
                        replies.push(TabMessageKind::RespondLatest {
                            hash,
                            timestamp: session.last_timestamp,
                        });
                    }
                }
                TabMessageKind::RespondLatest { hash, timestamp } => {
                    session.peers.insert(sender.clone());
                    let remote = RemoteVersion {
                        tab_id: sender,
                        hash,
                        timestamp,
                        label: None,
                    };
                    let known = session
                        .stale_remote
                        .as_ref()
                        .is_some_and(|s| s.hash == remote.hash);
                    if session.is_newer(&remote) && !known {
                        if !session.dirty {
                            events.push(HistoryEvent::NewerVersionAvailable {
                                hash: remote.hash.clone(),
                                timestamp: remote.timestamp,
                                label: None,
                            });
                        }
                        session.stale_remote = Some(remote);
                    }
                }
                TabMessageKind::ConflictResolved {
                    resolution,
                    hash,
                    timestamp,
                } => {
                    session.peers.insert(sender.clone());
                    if let Some(active) = session.active_conflict.take() {
                        active.supersede();
                        log::info!(
                            "Tab {} resolved a conflict ({}), dropping the local prompt",
                            sender,
                            resolution
                        );
                    }
                    if let Some(hash) = &hash
                        && session.differs(hash)
                    {
                        session.stale_remote = Some(RemoteVersion {
                            tab_id: sender.clone(),
                            hash: hash.clone(),
                            timestamp: timestamp.unwrap_or(session.last_timestamp),
                            label: None,
                        });
                    }
                    events.push(HistoryEvent::ConflictResolved {
                        resolution,
                        hash,
                        tab_id: sender,
                    });
                }
            }
        }

        for reply in replies {
            self.post(reply);
        }
        self.emit_all(events);
    }

    fn apply_resolution(&self, conflict: &ConflictEvent, choice: ConflictChoice) {
        let remote = &conflict.inner.remote;
        let winning_hash = {
            let mut session = self.session.lock().unwrap();
            if session
                .active_conflict
                .as_ref()
                .is_some_and(|active| active.same_as(conflict))
            {
                session.active_conflict = None;
            }
            if session
                .stale_remote
                .as_ref()
                .is_some_and(|s| s.timestamp <= remote.timestamp)
            {
                session.stale_remote = None;
            }
            session.last_timestamp = session.last_timestamp.max(remote.timestamp);

            match choice {
                ConflictChoice::LoadRemote => {
                    session.dirty = false;
                    session.pending_snapshot = None;
                    session.current_hash = Some(remote.hash.clone());
                    Some(remote.hash.clone())
                }
                ConflictChoice::SaveLocal => None,
            }
        };

        log::info!(
            "Tab {} resolved conflict with {} as {}",
            self.tab_id,
            remote.hash,
            choice
        );
        self.post(TabMessageKind::ConflictResolved {
            resolution: choice,
            hash: winning_hash.clone(),
            timestamp: winning_hash.as_ref().map(|_| remote.timestamp),
        });
        self.events.emit(&HistoryEvent::ConflictResolved {
            resolution: choice,
            hash: winning_hash,
            tab_id: self.tab_id.clone(),
        });
    }
}

impl Drop for DetectorInner {
    fn drop(&mut self) {
        if let Ok(listener) = self.listener.get_mut()
            && let Some(handle) = listener.take()
        {
            handle.abort();
        }
    }
}

/// Cross-tab conflict detector for one tab.
///
/// Cloning is cheap and every clone drives the same tab.
#[derive(Clone)]
pub struct ConflictDetector {
    inner: Arc<DetectorInner>,
}

impl ConflictDetector {
    /// Create a detector with a fresh tab ID.
    ///
    /// Messages posted on `bus` from now on are queued until [`start`](Self::start)
    /// or [`process_pending`](Self::process_pending) consumes them.
    pub fn new(bus: TabBus, events: Arc<EventRegistry>, grace: Duration) -> Self {
        Self::with_tab_id(uuid::Uuid::new_v4().to_string(), bus, events, grace)
    }

    /// Create a detector with an explicit tab ID.
    pub fn with_tab_id(
        tab_id: impl Into<String>,
        bus: TabBus,
        events: Arc<EventRegistry>,
        grace: Duration,
    ) -> Self {
        let tab_id = tab_id.into();
        let queued = bus.subscribe();
        Self {
            inner: Arc::new(DetectorInner {
                session: Mutex::new(TabSession::new(tab_id.clone())),
                tab_id,
                bus,
                events,
                grace,
                queued: Mutex::new(Some(queued)),
                listener: Mutex::new(None),
            }),
        }
    }

    /// This tab's ID
    pub fn tab_id(&self) -> &str {
        &self.inner.tab_id
    }

    /// Snapshot of the detection state
    pub fn state(&self) -> TabSession {
        self.inner.session.lock().unwrap().clone()
    }

    /// Whether the tab has uncommitted edits
    pub fn is_dirty(&self) -> bool {
        self.inner.session.lock().unwrap().dirty
    }

    /// The unresolved conflict, if any
    pub fn active_conflict(&self) -> Option<ConflictEvent> {
        self.inner.session.lock().unwrap().unresolved_conflict()
    }

    /// Other tabs known to be open, sorted
    pub fn open_tabs(&self) -> Vec<String> {
        self.inner
            .session
            .lock()
            .unwrap()
            .peers
            .iter()
            .cloned()
            .collect()
    }

    /// Set the version this tab starts from (usually the newest stored record).
    pub fn set_baseline(&self, hash: Option<String>, timestamp: i64) {
        let mut session = self.inner.session.lock().unwrap();
        session.current_hash = hash;
        session.last_timestamp = timestamp;
        session.stale_remote = None;
    }

    /// Spawn the listener task and announce this tab.
    ///
    /// Must run inside a tokio runtime. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut listener = self.inner.listener.lock().unwrap();
        if listener.is_some() {
            return;
        }
        let mut rx = self
            .inner
            .queued
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| self.inner.bus.subscribe());

        let weak = Arc::downgrade(&self.inner);
        *listener = Some(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_message(message);
            }
        }));
        drop(listener);

        log::debug!(
            "Tab {} listening on {}",
            self.inner.tab_id,
            self.inner.bus.document_type()
        );
        self.inner.post(TabMessageKind::TabOpened);
    }

    /// Stop the listener and tell the other tabs this one is gone.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.listener.lock().unwrap().take() {
            handle.abort();
        }
        self.inner.post(TabMessageKind::TabClosed);
    }

    /// Handle queued bus messages synchronously. Returns how many were handled.
    ///
    /// Only meaningful before [`start`](Self::start); afterwards the listener
    /// task owns the receiver and this returns 0.
    pub fn process_pending(&self) -> usize {
        let mut handled = 0;
        loop {
            let message = match self.inner.queued.lock().unwrap().as_mut() {
                Some(rx) => rx.try_recv(),
                None => None,
            };
            let Some(message) = message else {
                break;
            };
            self.inner.handle_message(message);
            handled += 1;
        }
        handled
    }

    /// Feed a message received over another transport.
    pub fn handle_message(&self, message: TabMessage) {
        self.inner.handle_message(message);
    }

    /// Record that the tab has unsaved edits.
    ///
    /// If another tab saved a different version while this one was clean,
    /// the conflict is raised now and returned.
    pub fn mark_dirty(&self, snapshot: Value) -> Option<ConflictEvent> {
        let mut session = self.inner.session.lock().unwrap();
        session.dirty = true;
        session.pending_snapshot = Some(snapshot);

        if let Some(active) = session.unresolved_conflict() {
            return Some(active);
        }
        let stale = session.stale_remote.clone()?;
        if !session.differs(&stale.hash) {
            session.stale_remote = None;
            return None;
        }

        let (event, raised) = self.inner.raise_conflict(&mut session, stale);
        drop(session);
        if raised {
            self.inner
                .events
                .emit(&HistoryEvent::VersionConflict(event.clone()));
        }
        Some(event)
    }

    /// Record that the tab has no unsaved edits any more.
    pub fn mark_clean(&self) {
        let mut session = self.inner.session.lock().unwrap();
        session.dirty = false;
        session.pending_snapshot = None;
    }

    /// Gate run before every commit.
    ///
    /// Blocks on a known conflict. Otherwise asks every tab for its latest
    /// version and waits the grace window for answers; a newer, different
    /// version raises a conflict.
    pub async fn check_before_save(&self) -> SaveClearance {
        if let Some(event) = self.known_conflict() {
            return SaveClearance::Blocked(event);
        }

        let mut rx = self.inner.bus.subscribe();
        self.inner.post(TabMessageKind::RequestLatest);

        let deadline = tokio::time::Instant::now() + self.inner.grace;
        let mut newest: Option<RemoteVersion> = None;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(message)) => {
                    if message.tab_id == self.inner.tab_id {
                        continue;
                    }
                    if let TabMessageKind::RespondLatest { hash, timestamp } = message.kind
                        && newest.as_ref().is_none_or(|n| timestamp > n.timestamp)
                    {
                        newest = Some(RemoteVersion {
                            tab_id: message.tab_id,
                            hash,
                            timestamp,
                            label: None,
                        });
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }

        let mut session = self.inner.session.lock().unwrap();
        if let Some(active) = session.unresolved_conflict() {
            return SaveClearance::Blocked(active);
        }
        let Some(remote) = newest.filter(|r| session.is_newer(r)) else {
            return SaveClearance::Clear;
        };
        let (event, raised) = self.inner.raise_conflict(&mut session, remote);
        drop(session);
        if raised {
            self.inner
                .events
                .emit(&HistoryEvent::VersionConflict(event.clone()));
        }
        SaveClearance::Blocked(event)
    }

    /// Conflict already known before asking the other tabs.
    fn known_conflict(&self) -> Option<ConflictEvent> {
        let mut session = self.inner.session.lock().unwrap();
        if let Some(active) = session.unresolved_conflict() {
            return Some(active);
        }
        let stale = session.stale_remote.clone()?;
        if !session.differs(&stale.hash) {
            return None;
        }
        let (event, raised) = self.inner.raise_conflict(&mut session, stale);
        drop(session);
        if raised {
            self.inner
                .events
                .emit(&HistoryEvent::VersionConflict(event.clone()));
        }
        Some(event)
    }

    /// Adopt a just-committed version and announce it.
    pub fn notify_version_saved(&self, record: &VersionRecord) {
        {
            let mut session = self.inner.session.lock().unwrap();
            session.current_hash = Some(record.content_hash.clone());
            session.last_timestamp = session.last_timestamp.max(record.timestamp);
            session.dirty = false;
            session.pending_snapshot = None;
            if session
                .stale_remote
                .as_ref()
                .is_some_and(|s| s.timestamp <= record.timestamp)
            {
                session.stale_remote = None;
            }
        }
        self.inner.post(TabMessageKind::VersionSaved {
            hash: record.content_hash.clone(),
            timestamp: record.timestamp,
            label: Some(record.description.clone()),
        });
    }
}

impl std::fmt::Debug for ConflictDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictDetector")
            .field("tab_id", &self.inner.tab_id)
            .field("document_type", &self.inner.bus.document_type())
            .finish_non_exhaustive()
    }
}
