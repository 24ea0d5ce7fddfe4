//! In-process tab bus.
//!
//! A [`TabBus`] is a broadcast channel of JSON frames shared by every tab
//! editing the same document type. Each tab holds its own [`TabReceiver`].
//! The detector only ever sees [`TabMessage`]s, so another transport can be
//! swapped in by feeding decoded frames to
//! [`ConflictDetector::handle_message`](super::ConflictDetector::handle_message).

use std::sync::Arc;

use tokio::sync::broadcast;

use super::protocol::TabMessage;
use crate::error::{HistoryError, Result};

/// Frames buffered per receiver before it starts lagging.
const BUS_CAPACITY: usize = 256;

/// Broadcast channel scoped to one document type.
#[derive(Clone)]
pub struct TabBus {
    document_type: Arc<str>,
    tx: broadcast::Sender<String>,
}

impl TabBus {
    /// Create a bus for `document_type`.
    pub fn new(document_type: impl AsRef<str>) -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            document_type: Arc::from(document_type.as_ref()),
            tx,
        }
    }

    /// Document type this bus is scoped to.
    pub fn document_type(&self) -> &str {
        &self.document_type
    }

    /// Encode and post `message` to every subscriber.
    ///
    /// Returns the number of receivers the frame reached.
    pub fn post(&self, message: &TabMessage) -> Result<usize> {
        let frame = message.encode()?;
        self.post_frame(frame)
    }

    /// Post a raw frame. Used by bridges that already hold encoded JSON.
    pub fn post_frame(&self, frame: String) -> Result<usize> {
        self.tx.send(frame).map_err(|_| {
            HistoryError::Broadcast(format!(
                "no tab is listening on the {} channel",
                self.document_type
            ))
        })
    }

    /// Subscribe a new receiver. It sees frames posted from now on.
    pub fn subscribe(&self) -> TabReceiver {
        TabReceiver {
            document_type: self.document_type.clone(),
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl std::fmt::Debug for TabBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabBus")
            .field("document_type", &self.document_type)
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

/// Receiving end of a [`TabBus`].
pub struct TabReceiver {
    document_type: Arc<str>,
    rx: broadcast::Receiver<String>,
}

impl TabReceiver {
    /// Wait for the next well-formed message.
    ///
    /// Malformed frames are logged and skipped. Returns `None` once every
    /// sender is gone.
    pub async fn recv(&mut self) -> Option<TabMessage> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => {
                    if let Some(message) = self.decode(&frame) {
                        return Some(message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!(
                        "Tab receiver on {} lagged, {} message(s) dropped",
                        self.document_type,
                        n
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next queued message without waiting.
    pub fn try_recv(&mut self) -> Option<TabMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(frame) => {
                    if let Some(message) = self.decode(&frame) {
                        return Some(message);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    log::warn!(
                        "Tab receiver on {} lagged, {} message(s) dropped",
                        self.document_type,
                        n
                    );
                }
                Err(_) => return None,
            }
        }
    }

    fn decode(&self, frame: &str) -> Option<TabMessage> {
        match TabMessage::decode(frame) {
            Ok(message) => Some(message),
            Err(e) => {
                log::warn!(
                    "Skipping malformed frame on {} channel: {}",
                    self.document_type,
                    e
                );
                None
            }
        }
    }
}
