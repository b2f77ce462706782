//! Engine error types

use thiserror::Error;
use uuid::Uuid;

use pipewright_core::domain::execution::ExecutionStatus;
use pipewright_core::error::GraphError;

/// Errors surfaced by dispatch, cancellation and schedule management
///
/// Orchestrator failures never appear here directly: dispatch falls back to
/// the task queue first, and only a failure of both backends surfaces as
/// `BackendsExhausted`.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("pipeline {0} not found")]
    PipelineNotFound(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("schedule {0} not found")]
    ScheduleNotFound(Uuid),

    #[error("unknown module `{0}`")]
    ModuleNotFound(String),

    #[error("node `{node}` has invalid config: {reason}")]
    InvalidConfig { node: String, reason: String },

    #[error("execution {id} is {status:?}; only pending or running executions can be cancelled")]
    InvalidState { id: Uuid, status: ExecutionStatus },

    #[error("schedule {0} is expired and cannot be toggled")]
    ScheduleExpired(Uuid),

    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Direct orchestrator interaction failed where no fallback applies
    /// (artifact sync, pause toggling).
    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("all execution backends failed: orchestrator: {orchestrator}; queue: {queue}")]
    BackendsExhausted { orchestrator: String, queue: String },
}
