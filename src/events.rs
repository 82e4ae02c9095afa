//! Typed event stream consumed by the UI collaborator (§6).
//!
//! The original emits untyped payloads on a runtime event bus; here each
//! event is a distinct variant on a single outbound `tokio::sync::broadcast`
//! channel so subscribers get compile-time exhaustiveness.

use serde::Serialize;

use crate::errors::{ErrorKind, Priority};
use crate::stats::Stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Download,
    Upload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    #[serde(rename = "sync-start")]
    SyncStart { kind: &'static str },

    #[serde(rename = "sync-complete")]
    SyncComplete { kind: &'static str, stats: Stats },

    #[serde(rename = "sync-stats")]
    SyncStats { stats: Stats },

    #[serde(rename = "file-synced")]
    FileSynced {
        file: String,
        action: SyncAction,
    },

    #[serde(rename = "sync-error")]
    SyncError {
        file: Option<String>,
        error: String,
        kind: ErrorKind,
        priority: Priority,
        action: &'static str,
        can_retry: bool,
    },

    #[serde(rename = "sync-retry")]
    SyncRetry {
        file: String,
        attempt: u32,
        max_attempts: u32,
        next_retry_in_ms: u64,
        error: String,
    },

    #[serde(rename = "sync-failed")]
    SyncFailed {
        file: String,
        error: String,
        priority: Priority,
        attempts: u32,
        final_failure: bool,
    },

    #[serde(rename = "sync-conflict")]
    SyncConflict {
        file: String,
        conflict: &'static str,
        suggestions: Vec<String>,
        message: String,
    },

    #[serde(rename = "backup-created")]
    BackupCreated { original: String, backup: String },
}

/// Broadcast capacity: generous enough that a slow subscriber doesn't force
/// the engine to block, matching the single-writer/many-reader model in §5.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _rx) = tokio::sync::broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Emitting is fire-and-forget: with no subscribers this is a no-op, the
    /// engine must never block or fail because nobody is listening.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Stats;

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(SyncEvent::SyncStart { kind: "initial" });
        let received = rx.recv().await.unwrap();
        match received {
            SyncEvent::SyncStart { kind } => assert_eq!(kind, "initial"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(SyncEvent::SyncComplete {
            kind: "initial",
            stats: Stats::default(),
        });
    }
}
