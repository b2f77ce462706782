//! Execution polling
//!
//! For every non-terminal Execution with an orchestrator correlation id,
//! fetch the remote run state and advance the local record. Terminal
//! transitions persist `completed_at` and the duration computed from the
//! start/end timestamps.

use sqlx::PgPool;
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use pipewright_client::Orchestrator;
use pipewright_core::artifact;
use pipewright_core::domain::execution::{Execution, ExecutionStatus};

use crate::repository;

/// Polls the orchestrator for in-flight execution state
pub struct ExecutionPoller {
    pool: PgPool,
    orchestrator: Arc<dyn Orchestrator>,
    interval: Duration,
}

impl ExecutionPoller {
    pub fn new(pool: PgPool, orchestrator: Arc<dyn Orchestrator>, interval: Duration) -> Self {
        Self {
            pool,
            orchestrator,
            interval,
        }
    }

    /// Starts the polling loop
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("Starting execution poller (interval: {:?})", self.interval);

        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            match self.poll_once().await {
                Ok(advanced) => {
                    if advanced > 0 {
                        info!("Advanced {advanced} execution(s) this cycle");
                    }
                }
                Err(e) => {
                    error!("Error during execution poll cycle: {e:#}");
                }
            }
        }
    }

    /// Performs a single poll cycle. Per-item failures are logged and
    /// retried next cycle; they never abort the scan.
    pub async fn poll_once(&self) -> anyhow::Result<usize> {
        let executions = repository::execution::list_open_orchestrator_runs(&self.pool).await?;

        if executions.is_empty() {
            debug!("No in-flight orchestrator executions");
            return Ok(0);
        }

        let mut advanced = 0;
        for execution in executions {
            let id = execution.id;
            match self.poll_execution(&execution).await {
                Ok(true) => advanced += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to poll execution {id}: {e:#}; will retry next cycle");
                }
            }
        }

        Ok(advanced)
    }

    /// Reconcile one execution against its remote run.
    pub async fn poll_execution(&self, execution: &Execution) -> anyhow::Result<bool> {
        let Some(correlation) = &execution.correlation else {
            return Ok(false);
        };

        let dag_id = artifact::dag_id_for(execution.pipeline_id);
        let state = self
            .orchestrator
            .run_state(&dag_id, &correlation.id)
            .await?;

        let Some(mapped) = map_remote_state(&state.state) else {
            debug!(
                "Execution {}: unrecognized remote state `{}`, leaving untouched",
                execution.id, state.state
            );
            return Ok(false);
        };

        if mapped == execution.status {
            return Ok(false);
        }
        if !execution.status.can_transition_to(mapped) {
            warn!(
                "Execution {}: illegal transition {} -> {}, ignoring remote state",
                execution.id,
                execution.status.as_str(),
                mapped.as_str()
            );
            return Ok(false);
        }

        if mapped.is_terminal() {
            let completed_at = state.ended_at.unwrap_or_else(chrono::Utc::now);
            let started_at = execution.started_at.or(state.started_at);
            let duration = duration_between(started_at, Some(completed_at));

            repository::execution::finalize_remote(
                &self.pool,
                execution.id,
                mapped,
                started_at,
                completed_at,
                duration,
            )
            .await?;
            info!(
                "Execution {} finished remotely: {}",
                execution.id,
                mapped.as_str()
            );
        } else {
            repository::execution::apply_remote_state(
                &self.pool,
                execution.id,
                mapped,
                state.started_at,
            )
            .await?;
        }

        Ok(true)
    }
}

/// Map the orchestrator's run-state string onto the local state machine.
/// Unknown states return `None` and leave the Execution untouched.
pub(crate) fn map_remote_state(state: &str) -> Option<ExecutionStatus> {
    match state {
        "queued" => Some(ExecutionStatus::Pending),
        "running" => Some(ExecutionStatus::Running),
        "success" => Some(ExecutionStatus::Success),
        "failed" => Some(ExecutionStatus::Failed),
        _ => None,
    }
}

/// Whole seconds between two timestamps, clamped at zero.
pub(crate) fn duration_between(
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
) -> Option<i64> {
    let (start, end) = (started_at?, completed_at?);
    Some((end - start).num_seconds().max(0))
}
