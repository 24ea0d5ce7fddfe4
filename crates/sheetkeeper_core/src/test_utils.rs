//! Test utilities for sheetkeeper_core
//!
//! Shared fixtures: a sample character document, a storage backend whose
//! operations can be made to fail on demand, and an event recorder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::callback_registry::EventRegistry;
use crate::error::HistoryError;
use crate::events::HistoryEvent;
use crate::history::{MemoryStorage, StorageResult, VersionRecord, VersionStorage};

/// A small character record named `name`.
pub fn character(name: &str) -> Value {
    json!({
        "name": name,
        "tier": 1,
        "type": "Glaive",
        "descriptor": "Strong",
        "focus": "Bears a Halo of Fire",
        "stats": {"might": 12, "speed": 10, "intellect": 8},
        "skills": ["climbing"],
        "notes": ""
    })
}

/// Handles for a blocked insert. See [`FlakyStorage::gate_next_insert`].
pub struct InsertGate {
    /// Receives once the insert has started
    pub entered: mpsc::Receiver<()>,
    /// Send to let the insert finish
    pub release: mpsc::Sender<()>,
}

/// In-memory storage with switchable failures.
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    fail_open: AtomicBool,
    fail_inserts: AtomicBool,
    fail_deletes: AtomicBool,
    gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl FlakyStorage {
    /// Create a storage that works until told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail.
    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make `insert` fail.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make `delete` fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Block the next insert until the returned gate is released.
    pub fn gate_next_insert(&self) -> InsertGate {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some((entered_tx, release_rx));
        InsertGate {
            entered: entered_rx,
            release: release_tx,
        }
    }
}

impl VersionStorage for FlakyStorage {
    fn open(&self) -> StorageResult<()> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(HistoryError::StorageIo("open refused".into()));
        }
        self.inner.open()
    }

    fn close(&self) -> StorageResult<()> {
        self.inner.close()
    }

    fn insert(&self, record: &VersionRecord) -> StorageResult<()> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(HistoryError::StorageIo("disk full".into()));
        }
        self.inner.insert(record)
    }

    fn get(&self, id: &str) -> StorageResult<Option<VersionRecord>> {
        self.inner.get(id)
    }

    fn list(&self) -> StorageResult<Vec<VersionRecord>> {
        self.inner.list()
    }

    fn count(&self) -> StorageResult<usize> {
        self.inner.count()
    }

    fn oldest(&self) -> StorageResult<Option<VersionRecord>> {
        self.inner.oldest()
    }

    fn newest(&self) -> StorageResult<Option<VersionRecord>> {
        self.inner.newest()
    }

    fn delete(&self, id: &str) -> StorageResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(HistoryError::StorageIo("delete refused".into()));
        }
        self.inner.delete(id)
    }

    fn mark_squashed(&self, id: &str, squashed_count: usize) -> StorageResult<bool> {
        self.inner.mark_squashed(id, squashed_count)
    }

    fn clear(&self) -> StorageResult<()> {
        self.inner.clear()
    }
}

/// Records every event emitted on a registry.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<HistoryEvent>>>,
}

impl EventLog {
    /// Subscribe a new log to `registry`.
    pub fn attach(registry: &EventRegistry) -> Self {
        let log = Self::default();
        let sink = Arc::clone(&log.events);
        registry.subscribe(Arc::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        }));
        log
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> Vec<HistoryEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Names of the recorded events.
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }
}
