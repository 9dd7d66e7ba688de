//! Typed indexing status broadcast
//!
//! Observers subscribe to a broadcast channel; publishing never blocks, and
//! a slow observer loses messages rather than stalling writers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Batch phase hints. Only `idle`, `complete` and `error` are terminal for
/// a batch; the rest are advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Scanning,
    Embedding,
    Writing,
    Qdrant,
    Complete,
    Error,
}

/// One status update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub phase: Phase,
    pub total: usize,
    pub done: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qdrant_points: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Status {
    pub fn phase(phase: Phase, total: usize, done: usize) -> Self {
        Self {
            phase,
            total,
            done,
            last_file: None,
            qdrant_points: None,
            message: None,
            error: None,
        }
    }

    pub fn scanning(total: usize, done: usize, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::phase(Phase::Scanning, total, done)
        }
    }

    pub fn embedding(total: usize, done: usize, last_file: impl Into<String>) -> Self {
        Self {
            last_file: Some(last_file.into()),
            ..Self::phase(Phase::Embedding, total, done)
        }
    }

    pub fn complete(total: usize, qdrant_points: Option<u64>) -> Self {
        Self {
            qdrant_points,
            ..Self::phase(Phase::Complete, total, total)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error: Some(message),
            ..Self::phase(Phase::Error, 0, 0)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Best-effort status fan-out
#[derive(Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<Status>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { tx }
    }

    /// Publish one status update; dropped when no observer is subscribed
    pub fn publish(&self, status: Status) {
        let _ = self.tx.send(status);
    }

    /// Subscribe a new observer
    pub fn subscribe(&self) -> broadcast::Receiver<Status> {
        self.tx.subscribe()
    }
}
