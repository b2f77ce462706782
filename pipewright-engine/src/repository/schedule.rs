//! Schedule repository

use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use pipewright_core::domain::schedule::{Frequency, RecurrenceConfig, Schedule, ScheduleStatus};

/// Fields needed to create a schedule; the caller has already compiled the
/// cron expression and computed the initial `next_run_at`.
pub struct NewSchedule {
    pub pipeline_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub frequency: Frequency,
    pub cron_expression: Option<String>,
    pub timezone: String,
    pub config: RecurrenceConfig,
    pub params: HashMap<String, serde_json::Value>,
    pub start_date: Option<chrono::DateTime<chrono::Utc>>,
    pub end_date: Option<chrono::DateTime<chrono::Utc>>,
    pub next_run_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Create a new schedule in `active`
pub async fn create(pool: &PgPool, req: NewSchedule) -> Result<Schedule, sqlx::Error> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let schedule = Schedule {
        id,
        pipeline_id: req.pipeline_id,
        name: req.name,
        description: req.description,
        frequency: req.frequency,
        cron_expression: req.cron_expression,
        timezone: req.timezone,
        config: req.config,
        params: req.params,
        status: ScheduleStatus::Active,
        start_date: req.start_date,
        end_date: req.end_date,
        next_run_at: req.next_run_at,
        last_run_at: None,
        total_runs: 0,
        successful_runs: 0,
        failed_runs: 0,
        external_synced: false,
        external_dag_id: None,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO schedules (id, pipeline_id, name, description, frequency, cron_expression,
                               timezone, config, params, status, start_date, end_date,
                               next_run_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(id)
    .bind(schedule.pipeline_id)
    .bind(&schedule.name)
    .bind(&schedule.description)
    .bind(schedule.frequency.as_str())
    .bind(&schedule.cron_expression)
    .bind(&schedule.timezone)
    .bind(serde_json::to_value(&schedule.config).unwrap_or(serde_json::Value::Null))
    .bind(serde_json::to_value(&schedule.params).unwrap_or(serde_json::Value::Null))
    .bind(ScheduleStatus::Active.as_str())
    .bind(schedule.start_date)
    .bind(schedule.end_date)
    .bind(schedule.next_run_at)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(schedule)
}

/// Find a schedule by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Schedule>, sqlx::Error> {
    let row = sqlx::query_as::<_, ScheduleRow>(&select_sql("WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.into()))
}

/// Active schedules whose `next_run_at` is due
pub async fn find_due(
    pool: &PgPool,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<Schedule>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ScheduleRow>(&select_sql(
        "WHERE status = 'active' AND next_run_at IS NOT NULL AND next_run_at <= $1 ORDER BY next_run_at ASC",
    ))
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Record one fire: bump counters, stamp `last_run_at`, advance `next_run_at`.
/// Counters are advisory telemetry; last-writer-wins is acceptable.
pub async fn record_fire(
    pool: &PgPool,
    id: Uuid,
    success: bool,
    next_run_at: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE schedules
        SET total_runs = total_runs + 1,
            successful_runs = successful_runs + CASE WHEN $1 THEN 1 ELSE 0 END,
            failed_runs = failed_runs + CASE WHEN $1 THEN 0 ELSE 1 END,
            last_run_at = $2,
            next_run_at = $3,
            updated_at = $2
        WHERE id = $4
        "#,
    )
    .bind(success)
    .bind(chrono::Utc::now())
    .bind(next_run_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Set a schedule's status; expiring also clears `next_run_at`
pub async fn set_status(
    pool: &PgPool,
    id: Uuid,
    status: ScheduleStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE schedules
        SET status = $1,
            next_run_at = CASE WHEN $1 = 'expired' THEN NULL ELSE next_run_at END,
            updated_at = $2
        WHERE id = $3
        "#,
    )
    .bind(status.as_str())
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Recompute `next_run_at` (config change, reactivation)
pub async fn update_next_run(
    pool: &PgPool,
    id: Uuid,
    next_run_at: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE schedules
        SET next_run_at = $1, updated_at = $2
        WHERE id = $3
        "#,
    )
    .bind(next_run_at)
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record that the schedule's DAG artifact is live at the orchestrator
pub async fn mark_external_synced(
    pool: &PgPool,
    id: Uuid,
    dag_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE schedules
        SET external_synced = TRUE, external_dag_id = $1, updated_at = $2
        WHERE id = $3
        "#,
    )
    .bind(dag_id)
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

fn select_sql(where_clause: &str) -> String {
    format!(
        r#"
        SELECT id, pipeline_id, name, description, frequency, cron_expression, timezone,
               config, params, status, start_date, end_date, next_run_at, last_run_at,
               total_runs, successful_runs, failed_runs, external_synced, external_dag_id,
               created_at, updated_at
        FROM schedules
        {where_clause}
        "#
    )
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: Uuid,
    pipeline_id: Uuid,
    name: String,
    description: Option<String>,
    frequency: String,
    cron_expression: Option<String>,
    timezone: String,
    config: serde_json::Value,
    params: serde_json::Value,
    status: String,
    start_date: Option<chrono::DateTime<chrono::Utc>>,
    end_date: Option<chrono::DateTime<chrono::Utc>>,
    next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    total_runs: i32,
    successful_runs: i32,
    failed_runs: i32,
    external_synced: bool,
    external_dag_id: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<ScheduleRow> for Schedule {
    fn from(row: ScheduleRow) -> Self {
        Schedule {
            id: row.id,
            pipeline_id: row.pipeline_id,
            name: row.name,
            description: row.description,
            frequency: Frequency::parse(&row.frequency),
            cron_expression: row.cron_expression,
            timezone: row.timezone,
            config: serde_json::from_value(row.config).unwrap_or_default(),
            params: serde_json::from_value(row.params).unwrap_or_default(),
            status: ScheduleStatus::parse(&row.status),
            start_date: row.start_date,
            end_date: row.end_date,
            next_run_at: row.next_run_at,
            last_run_at: row.last_run_at,
            total_runs: row.total_runs,
            successful_runs: row.successful_runs,
            failed_runs: row.failed_runs,
            external_synced: row.external_synced,
            external_dag_id: row.external_dag_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
