//! Execution domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::log::LogEntry;

/// One run attempt of a pipeline
///
/// Created on run request; terminal states are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub trigger: TriggerKind,
    pub status: ExecutionStatus,
    pub params: HashMap<String, serde_json::Value>,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_seconds: Option<i64>,
    pub logs: Vec<LogEntry>,
    pub metrics: HashMap<String, serde_json::Value>,
    pub error_message: Option<String>,
    pub correlation: Option<Correlation>,
}

/// Execution status state machine
///
/// `pending -> running -> {success, failed}`; `pending`/`running` may also
/// move to `cancelled` on explicit request. Terminal states accept nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Pending, Cancelled) | (Running, Cancelled) => true,
            (Running, Success) | (Running, Failed) => true,
            // A queue-backed run can fail before ever reporting running.
            (Pending, Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a persisted status string. Unknown strings map to `Pending`,
    /// mirroring how rows predating a status are treated.
    pub fn parse(s: &str) -> ExecutionStatus {
        match s {
            "running" => ExecutionStatus::Running,
            "success" => ExecutionStatus::Success,
            "failed" => ExecutionStatus::Failed,
            "cancelled" => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Pending,
        }
    }
}

/// What caused a run to start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Scheduled,
    Webhook,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Webhook => "webhook",
        }
    }

    pub fn parse(s: &str) -> TriggerKind {
        match s {
            "scheduled" => TriggerKind::Scheduled,
            "webhook" => TriggerKind::Webhook,
            _ => TriggerKind::Manual,
        }
    }
}

/// Which backend a run was handed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Orchestrator,
    Queue,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Orchestrator => "orchestrator",
            Backend::Queue => "queue",
        }
    }

    pub fn parse(s: &str) -> Option<Backend> {
        match s {
            "orchestrator" => Some(Backend::Orchestrator),
            "queue" => Some(Backend::Queue),
            _ => None,
        }
    }
}

/// Opaque identifier binding an Execution to its remote run or queue task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    pub backend: Backend,
    pub id: String,
}

impl Correlation {
    pub fn orchestrator(id: impl Into<String>) -> Self {
        Self {
            backend: Backend::Orchestrator,
            id: id.into(),
        }
    }

    pub fn queue(id: impl Into<String>) -> Self {
        Self {
            backend: Backend::Queue,
            id: id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_accept_nothing() {
        use ExecutionStatus::*;
        for terminal in [Success, Failed, Cancelled] {
            for next in [Pending, Running, Success, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Success));
        assert!(Running.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Success));
        assert!(!Success.can_transition_to(Running));
    }

    #[test]
    fn test_status_string_round_trip() {
        use ExecutionStatus::*;
        for status in [Pending, Running, Success, Failed, Cancelled] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), status);
        }
    }
}
