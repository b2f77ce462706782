//! Execution repository

use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use pipewright_core::domain::execution::{
    Backend, Correlation, Execution, ExecutionStatus, TriggerKind,
};
use pipewright_core::domain::log::LogEntry;

/// Create a new execution in `pending`
pub async fn create(
    pool: &PgPool,
    pipeline_id: Uuid,
    trigger: TriggerKind,
    params: &HashMap<String, serde_json::Value>,
) -> Result<Execution, sqlx::Error> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let execution = Execution {
        id,
        pipeline_id,
        trigger,
        status: ExecutionStatus::Pending,
        params: params.clone(),
        requested_at: now,
        started_at: None,
        completed_at: None,
        duration_seconds: None,
        logs: Vec::new(),
        metrics: HashMap::new(),
        error_message: None,
        correlation: None,
    };

    sqlx::query(
        r#"
        INSERT INTO executions (id, pipeline_id, trigger_kind, status, params, requested_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(pipeline_id)
    .bind(trigger.as_str())
    .bind(ExecutionStatus::Pending.as_str())
    .bind(serde_json::to_value(params).unwrap_or(serde_json::Value::Null))
    .bind(now)
    .execute(pool)
    .await?;

    Ok(execution)
}

/// Find an execution by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Execution>, sqlx::Error> {
    let row = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT id, pipeline_id, trigger_kind, status, params, requested_at, started_at,
               completed_at, duration_seconds, logs, metrics, error_message, backend, correlation_id
        FROM executions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Non-terminal executions handed to the orchestrator, for the poll loop
pub async fn list_open_orchestrator_runs(pool: &PgPool) -> Result<Vec<Execution>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT id, pipeline_id, trigger_kind, status, params, requested_at, started_at,
               completed_at, duration_seconds, logs, metrics, error_message, backend, correlation_id
        FROM executions
        WHERE status IN ('pending', 'running') AND backend = 'orchestrator'
        ORDER BY requested_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Move an execution to `running` and record which backend carries it
pub async fn mark_running(
    pool: &PgPool,
    id: Uuid,
    correlation: &Correlation,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE executions
        SET status = $1, started_at = COALESCE(started_at, $2), backend = $3, correlation_id = $4
        WHERE id = $5
        "#,
    )
    .bind(ExecutionStatus::Running.as_str())
    .bind(chrono::Utc::now())
    .bind(correlation.backend.as_str())
    .bind(&correlation.id)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Queue-worker entry: flip a still-pending execution to `running`.
/// Duplicate deliveries of an already-running job leave the row untouched.
pub async fn ensure_running(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE executions
        SET status = $1, started_at = COALESCE(started_at, $2)
        WHERE id = $3 AND status = 'pending'
        "#,
    )
    .bind(ExecutionStatus::Running.as_str())
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark an execution cancelled
pub async fn mark_cancelled(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE executions
        SET status = $1, completed_at = $2
        WHERE id = $3
        "#,
    )
    .bind(ExecutionStatus::Cancelled.as_str())
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark an execution failed with the captured error
pub async fn mark_failed(pool: &PgPool, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE executions
        SET status = $1, completed_at = $2, error_message = $3
        WHERE id = $4
        "#,
    )
    .bind(ExecutionStatus::Failed.as_str())
    .bind(chrono::Utc::now())
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Apply a non-terminal remote state observed by the reconciler
pub async fn apply_remote_state(
    pool: &PgPool,
    id: Uuid,
    status: ExecutionStatus,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE executions
        SET status = $1, started_at = COALESCE($2, started_at)
        WHERE id = $3
        "#,
    )
    .bind(status.as_str())
    .bind(started_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Finalize an execution after a terminal remote transition, persisting the
/// duration computed from the remote start/end timestamps
pub async fn finalize_remote(
    pool: &PgPool,
    id: Uuid,
    status: ExecutionStatus,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: chrono::DateTime<chrono::Utc>,
    duration_seconds: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE executions
        SET status = $1, started_at = COALESCE($2, started_at), completed_at = $3,
            duration_seconds = $4
        WHERE id = $5
        "#,
    )
    .bind(status.as_str())
    .bind(started_at)
    .bind(completed_at)
    .bind(duration_seconds)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Finish a locally-run execution, capturing logs, metrics and the outcome.
/// The duration falls out of the stored `started_at`.
pub async fn finish_local(
    pool: &PgPool,
    id: Uuid,
    status: ExecutionStatus,
    error: Option<&str>,
    logs: &[LogEntry],
    metrics: &HashMap<String, serde_json::Value>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE executions
        SET status = $1, completed_at = $2, error_message = $3, logs = $4, metrics = $5,
            duration_seconds = EXTRACT(EPOCH FROM ($2 - started_at))::BIGINT
        WHERE id = $6
        "#,
    )
    .bind(status.as_str())
    .bind(chrono::Utc::now())
    .bind(error)
    .bind(serde_json::to_value(logs).unwrap_or(serde_json::Value::Null))
    .bind(serde_json::to_value(metrics).unwrap_or(serde_json::Value::Null))
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Retention cleanup: delete terminal executions older than the cutoff
pub async fn delete_terminal_older_than(
    pool: &PgPool,
    cutoff: chrono::DateTime<chrono::Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM executions
        WHERE status IN ('success', 'failed', 'cancelled') AND requested_at < $1
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: Uuid,
    pipeline_id: Uuid,
    trigger_kind: String,
    status: String,
    params: serde_json::Value,
    requested_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    duration_seconds: Option<i64>,
    logs: serde_json::Value,
    metrics: serde_json::Value,
    error_message: Option<String>,
    backend: Option<String>,
    correlation_id: Option<String>,
}

impl From<ExecutionRow> for Execution {
    fn from(row: ExecutionRow) -> Self {
        let correlation = match (row.backend.as_deref().and_then(Backend::parse), row.correlation_id) {
            (Some(backend), Some(id)) => Some(Correlation { backend, id }),
            _ => None,
        };

        Execution {
            id: row.id,
            pipeline_id: row.pipeline_id,
            trigger: TriggerKind::parse(&row.trigger_kind),
            status: ExecutionStatus::parse(&row.status),
            params: serde_json::from_value(row.params).unwrap_or_default(),
            requested_at: row.requested_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            duration_seconds: row.duration_seconds,
            logs: serde_json::from_value(row.logs).unwrap_or_default(),
            metrics: serde_json::from_value(row.metrics).unwrap_or_default(),
            error_message: row.error_message,
            correlation,
        }
    }
}
