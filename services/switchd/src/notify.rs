//! Operator progress reporting.
//!
//! A switch pushes one logical progress message to the operator channel:
//! `open` sends it, every later `update` edits it in place, so the operator
//! sees a single message whose text tracks the current phase. Delivery is
//! best effort throughout; a sink failure never fails the switch.

use std::sync::Mutex;

use async_trait::async_trait;

/// Handle to the logical progress message returned by `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressHandle {
    pub message_id: i64,
}

/// Destination for operator-facing status updates.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Send the initial progress message. `None` means the channel could
    /// not be opened; subsequent updates become no-ops.
    async fn open(&self, text: &str) -> Option<ProgressHandle>;

    /// Edit the progress message in place. Failures are logged by the
    /// implementation and swallowed.
    async fn update(&self, handle: ProgressHandle, text: &str);

    /// One-shot notification outside any progress sequence.
    async fn notify_once(&self, text: &str);
}

// =============================================================================
// Recording sink for tests
// =============================================================================

/// What a recording sink observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Opened(String),
    Updated(String),
    Notified(String),
}

/// In-memory sink that records every event for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Texts of `Updated` events only.
    pub fn updates(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Updated(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn open(&self, text: &str) -> Option<ProgressHandle> {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Opened(text.to_string()));
        Some(ProgressHandle { message_id: 1 })
    }

    async fn update(&self, _handle: ProgressHandle, text: &str) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Updated(text.to_string()));
    }

    async fn notify_once(&self, text: &str) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Notified(text.to_string()));
    }
}
