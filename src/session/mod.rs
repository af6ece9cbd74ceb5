//! Session state for one agent run
//!
//! A `SessionState` is exclusively owned by one control-plane adapter for
//! the duration of a run. Executors mutate it once per turn; the adapter
//! mutates it on status transitions. It is never shared for concurrent
//! mutation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Metadata key for the monotonic successful-turn counter.
pub const META_STEPS: &str = "switchyard.steps";
/// Metadata key for the type tag of the most recent action.
pub const META_LAST_ACTION: &str = "switchyard.last_action_type";
/// Metadata key for the variant that produced the most recent turn.
pub const META_VARIANT: &str = "switchyard.variant";
/// Metadata key for cumulative prompt tokens.
pub const META_PROMPT_TOKENS: &str = "switchyard.prompt_tokens";
/// Metadata key for cumulative completion tokens.
pub const META_COMPLETION_TOKENS: &str = "switchyard.completion_tokens";
/// Metadata key for cumulative cost in dollars.
pub const META_COST: &str = "switchyard.accumulated_cost";

/// Status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not yet running.
    Init,
    /// Actively taking turns.
    Running,
    /// Completed successfully.
    Finished,
    /// Terminated by an unrecovered fault.
    Error,
    /// Halted externally before completion.
    Stopped,
}

impl SessionStatus {
    /// Terminal states admit no further turns.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker for the single outstanding action awaiting an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Opaque action identifier.
    pub action_id: String,
    /// Type tag of the action (e.g. "run_command").
    pub kind: String,
}

/// Errors from session snapshot/restore and invariant checks.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A second pending action was set before the first was observed.
    #[error("pending action already set: {0}")]
    PendingActionExists(String),

    /// A snapshot violated a session invariant on restore.
    #[error("invalid session snapshot: {0}")]
    InvalidSnapshot(String),

    /// A counter update would have decreased a cumulative value.
    #[error("counter {key} would decrease (current {current}, new {attempted})")]
    CounterRegression {
        key: String,
        current: f64,
        attempted: f64,
    },
}

/// The mutable record threading through one agent run.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Opaque session identifier.
    pub id: String,
    /// Completed loop iterations.
    pub iteration: u32,
    /// Hard cap on iterations.
    pub max_iterations: u32,
    /// Current status.
    pub status: SessionStatus,
    /// Message of the most recent unrecovered fault.
    pub last_fault: Option<String>,
    /// At most one outstanding action awaiting an observation.
    pending_action: Option<PendingAction>,
    /// Execution-mode metadata: variant tags, step counters, token/cost
    /// counters. Counters are additive only.
    metadata: HashMap<String, Value>,
}

impl SessionState {
    /// Create a fresh session with a generated id, status `Init`.
    pub fn new(max_iterations: u32) -> Self {
        Self::with_id(format!("sess_{}", Uuid::new_v4().simple()), max_iterations)
    }

    /// Create a fresh session with an explicit id, status `Init`.
    pub fn with_id(id: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            id: id.into(),
            iteration: 0,
            max_iterations: max_iterations.max(1),
            status: SessionStatus::Init,
            last_fault: None,
            pending_action: None,
            metadata: HashMap::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Transition to `Error` and record the fault message.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = SessionStatus::Error;
        self.last_fault = Some(message.into());
    }

    // ------------------------------------------------------------------
    // Pending action
    // ------------------------------------------------------------------

    pub fn pending_action(&self) -> Option<&PendingAction> {
        self.pending_action.as_ref()
    }

    /// Mark an action as outstanding. Fails if one is already pending;
    /// two actions may never await observations simultaneously.
    pub fn set_pending_action(&mut self, action: PendingAction) -> Result<(), SessionError> {
        if let Some(existing) = &self.pending_action {
            return Err(SessionError::PendingActionExists(existing.action_id.clone()));
        }
        self.pending_action = Some(action);
        Ok(())
    }

    /// Clear the outstanding action once its observation arrived.
    pub fn clear_pending_action(&mut self) {
        self.pending_action = None;
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Set a non-counter metadata entry (variant tag, last action type).
    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Read a counter as f64, defaulting to 0 when absent.
    pub fn counter(&self, key: &str) -> f64 {
        self.metadata
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    /// Add a non-negative delta to a cumulative counter. Counters are
    /// monotonically non-decreasing across a run.
    pub fn add_counter(&mut self, key: &str, delta: f64) -> Result<(), SessionError> {
        let current = self.counter(key);
        if delta < 0.0 {
            return Err(SessionError::CounterRegression {
                key: key.to_string(),
                current,
                attempted: current + delta,
            });
        }
        let updated = current + delta;
        // Integer-valued counters stay integers in the bag
        let value = if updated.fract() == 0.0 && updated <= u64::MAX as f64 {
            Value::from(updated as u64)
        } else {
            Value::from(updated)
        };
        self.metadata.insert(key.to_string(), value);
        Ok(())
    }

    /// Record a successful turn: bump the step counter and tag which
    /// variant produced which action type.
    pub fn record_turn(&mut self, variant: &str, action_kind: &str) {
        // delta is non-negative by construction
        let _ = self.add_counter(META_STEPS, 1.0);
        self.set_meta(META_LAST_ACTION, action_kind);
        self.set_meta(META_VARIANT, variant);
    }

    /// Successful-turn count for this run.
    pub fn steps(&self) -> u64 {
        self.counter(META_STEPS) as u64
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    /// Capture a durable snapshot for an external session store.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            status: self.status,
            iteration: self.iteration,
            max_iterations: self.max_iterations,
            last_fault: self.last_fault.clone(),
            pending_action: self.pending_action.clone(),
            metadata: self.metadata.clone(),
            captured_at: Utc::now(),
        }
    }

    /// Rebuild a session from a snapshot, re-validating invariants.
    pub fn restore(snapshot: SessionSnapshot) -> Result<Self, SessionError> {
        if snapshot.max_iterations == 0 {
            return Err(SessionError::InvalidSnapshot(
                "max_iterations must be >= 1".into(),
            ));
        }
        if snapshot.pending_action.is_some() && snapshot.status != SessionStatus::Running {
            return Err(SessionError::InvalidSnapshot(format!(
                "pending action requires running status, got {}",
                snapshot.status
            )));
        }
        Ok(Self {
            id: snapshot.id,
            iteration: snapshot.iteration,
            max_iterations: snapshot.max_iterations,
            status: snapshot.status,
            last_fault: snapshot.last_fault,
            pending_action: snapshot.pending_action,
            metadata: snapshot.metadata,
        })
    }
}

/// Durable key/value form of a session, consumed by an external store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub status: SessionStatus,
    pub iteration: u32,
    pub max_iterations: u32,
    pub last_fault: Option<String>,
    pub pending_action: Option<PendingAction>,
    pub metadata: HashMap<String, Value>,
    pub captured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal_set() {
        assert!(!SessionStatus::Init.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Finished.is_terminal());
        assert!(SessionStatus::Error.is_terminal());
        assert!(SessionStatus::Stopped.is_terminal());
    }

    #[test]
    fn test_pending_action_exclusive() {
        let mut session = SessionState::new(10);
        session
            .set_pending_action(PendingAction {
                action_id: "a1".into(),
                kind: "run_command".into(),
            })
            .unwrap();

        let second = session.set_pending_action(PendingAction {
            action_id: "a2".into(),
            kind: "read_file".into(),
        });
        assert!(matches!(second, Err(SessionError::PendingActionExists(id)) if id == "a1"));

        session.clear_pending_action();
        assert!(session.pending_action().is_none());
    }

    #[test]
    fn test_counters_monotonic() {
        let mut session = SessionState::new(10);
        session.add_counter(META_PROMPT_TOKENS, 120.0).unwrap();
        session.add_counter(META_PROMPT_TOKENS, 80.0).unwrap();
        assert_eq!(session.counter(META_PROMPT_TOKENS), 200.0);

        let err = session.add_counter(META_PROMPT_TOKENS, -5.0);
        assert!(matches!(err, Err(SessionError::CounterRegression { .. })));
        assert_eq!(session.counter(META_PROMPT_TOKENS), 200.0);
    }

    #[test]
    fn test_record_turn_bumps_steps() {
        let mut session = SessionState::new(10);
        session.record_turn("legacy", "run_command");
        session.record_turn("legacy", "finish");
        assert_eq!(session.steps(), 2);
        assert_eq!(
            session.metadata().get(META_LAST_ACTION).and_then(Value::as_str),
            Some("finish")
        );
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut session = SessionState::with_id("sess_test", 25);
        session.status = SessionStatus::Running;
        session.iteration = 3;
        session.fail("rate limited");
        session.add_counter(META_STEPS, 3.0).unwrap();

        let snapshot = session.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: SessionSnapshot = serde_json::from_str(&json).unwrap();
        let restored = SessionState::restore(parsed).unwrap();

        assert_eq!(restored.id, "sess_test");
        assert_eq!(restored.status, SessionStatus::Error);
        assert_eq!(restored.iteration, 3);
        assert_eq!(restored.last_fault.as_deref(), Some("rate limited"));
        assert_eq!(restored.steps(), 3);
    }

    #[test]
    fn test_restore_rejects_invalid() {
        let mut snapshot = SessionState::with_id("s", 5).snapshot();
        snapshot.max_iterations = 0;
        assert!(SessionState::restore(snapshot).is_err());

        let mut snapshot = SessionState::with_id("s", 5).snapshot();
        snapshot.pending_action = Some(PendingAction {
            action_id: "a1".into(),
            kind: "k".into(),
        });
        // status is Init, pending action requires Running
        assert!(SessionState::restore(snapshot).is_err());
    }
}
