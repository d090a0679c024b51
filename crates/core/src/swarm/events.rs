//! # Engine Events
//!
//! Typed progress events emitted by the round loop and the coordinator.
//! Every event is kept in the run outcome and, when a channel is attached,
//! forwarded to it as it happens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Kind of engine event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineEventKind {
    /// Run started (or resumed)
    RunStarted,
    /// A round began generating
    RoundStarted,
    /// Orchestrator moved to a new state
    StateChanged,
    /// A generator was invoked
    GeneratorStarted,
    /// A generator returned artifacts
    GeneratorCompleted,
    /// A generator failed or timed out
    GeneratorFailed,
    /// A generator was dropped from the active set after repeated failures
    GeneratorDemoted,
    /// A coordinated phase started
    PhaseStarted,
    /// Two generators wrote different content to the same path
    ConflictDetected,
    /// Round output merged into the source tree
    ArtifactsMerged,
    /// An artifact path was refused by the store
    PathRejected,
    /// Build and test probes finished
    VerificationCompleted,
    /// Round report persisted
    RoundCompleted,
    /// Finding count did not drop for several rounds
    NoProgress,
    /// Terminal state reached
    RunFinished,
}

/// An event in the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Unique event ID
    pub id: String,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Kind of event
    pub kind: EngineEventKind,
    /// Component or generator that produced this event
    pub actor: String,
    /// Round the event belongs to, if any
    #[serde(default)]
    pub round: Option<u32>,
    /// Associated data (JSON)
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl EngineEvent {
    /// Create a new event
    pub fn new(kind: EngineEventKind, actor: &str) -> Self {
        Self {
            id: uuid_v4(),
            timestamp: Utc::now(),
            kind,
            actor: actor.to_string(),
            round: None,
            data: None,
        }
    }

    pub fn in_round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    /// Add data to the event
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Shared, cloneable event recorder with an optional live channel
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<EngineEvent>>>,
    tx: Option<mpsc::Sender<EngineEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, tx: mpsc::Sender<EngineEvent>) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Record an event and forward it. A closed channel is ignored.
    pub async fn emit(&self, event: EngineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }

    pub fn snapshot(&self) -> Vec<EngineEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, kind: EngineEventKind) -> usize {
        self.events
            .lock()
            .map(|e| e.iter().filter(|ev| ev.kind == kind).count())
            .unwrap_or(0)
    }
}

/// Generate a simple UUID v4
fn uuid_v4() -> String {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    format!("{:x}-{:x}", nanos, rand_u32())
}

/// Simple random number (not cryptographic)
fn rand_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = EngineEvent::new(EngineEventKind::GeneratorStarted, "foundation").in_round(2);

        assert_eq!(event.actor, "foundation");
        assert_eq!(event.round, Some(2));
    }

    #[tokio::test]
    async fn test_event_log_forwards_and_records() {
        let (tx, mut rx) = mpsc::channel(8);
        let log = EventLog::new().with_channel(tx);
        log.emit(EngineEvent::new(EngineEventKind::RunStarted, "orchestrator"))
            .await;

        let clone = log.clone();
        clone
            .emit(EngineEvent::new(EngineEventKind::RoundStarted, "orchestrator").in_round(1))
            .await;

        assert_eq!(log.snapshot().len(), 2);
        assert_eq!(log.count(EngineEventKind::RoundStarted), 1);
        assert_eq!(rx.recv().await.map(|e| e.kind), Some(EngineEventKind::RunStarted));
    }

    #[tokio::test]
    async fn test_closed_channel_is_ignored() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let log = EventLog::new().with_channel(tx);
        log.emit(EngineEvent::new(EngineEventKind::RunFinished, "orchestrator"))
            .await;
        assert_eq!(log.snapshot().len(), 1);
    }
}
