//! Task queue
//!
//! The fallback execution backend and the transport for fire-and-forget
//! jobs. Delivery is at-least-once: handlers must tolerate duplicates,
//! which the pipeline handler does by re-checking Execution state before
//! running.
//!
//! The shipped implementation is a Postgres-backed queue claimed with
//! `FOR UPDATE SKIP LOCKED`, so any number of workers can drain it without
//! double-claiming.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pipewright_core::domain::execution::ExecutionStatus;

use crate::repository;
use crate::runner::LocalRunner;

/// Job names understood by the worker
pub mod jobs {
    /// Run a pipeline locally; args: `{pipeline_id, execution_id}`
    pub const EXECUTE_PIPELINE: &str = "execute_pipeline";
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Fire-and-forget job submission
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a job, returning its task id.
    async fn enqueue(&self, job_name: &str, args: serde_json::Value) -> Result<String, QueueError>;
}

/// Postgres-backed task queue
pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, job_name: &str, args: serde_json::Value) -> Result<String, QueueError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO queue_jobs (id, job_name, args, status, requested_at)
            VALUES ($1, $2, $3, 'queued', $4)
            "#,
        )
        .bind(id)
        .bind(job_name)
        .bind(&args)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        debug!("Enqueued job {job_name} as {id}");
        Ok(id.to_string())
    }
}

/// A claimed queue job
#[derive(Debug, sqlx::FromRow)]
pub struct QueuedJob {
    pub id: Uuid,
    pub job_name: String,
    pub args: serde_json::Value,
}

/// Claim the oldest queued job, if any. `SKIP LOCKED` keeps concurrent
/// workers from blocking on each other.
pub async fn claim_next(pool: &PgPool) -> Result<Option<QueuedJob>, sqlx::Error> {
    sqlx::query_as::<_, QueuedJob>(
        r#"
        UPDATE queue_jobs
        SET status = 'running', started_at = $1
        WHERE id = (
            SELECT id FROM queue_jobs
            WHERE status = 'queued'
            ORDER BY requested_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, job_name, args
        "#,
    )
    .bind(chrono::Utc::now())
    .fetch_optional(pool)
    .await
}

/// Mark a claimed job finished
pub async fn complete(pool: &PgPool, id: Uuid, error: Option<&str>) -> Result<(), sqlx::Error> {
    let status = if error.is_some() { "failed" } else { "done" };

    sqlx::query(
        r#"
        UPDATE queue_jobs
        SET status = $1, completed_at = $2, error = $3
        WHERE id = $4
        "#,
    )
    .bind(status)
    .bind(chrono::Utc::now())
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Worker loop draining the queue under a parallelism bound
pub struct QueueWorker {
    pool: PgPool,
    runner: Arc<LocalRunner>,
    poll_interval: Duration,
    semaphore: Arc<Semaphore>,
}

impl QueueWorker {
    pub fn new(
        pool: PgPool,
        runner: Arc<LocalRunner>,
        poll_interval: Duration,
        max_parallel_jobs: usize,
    ) -> Self {
        Self {
            pool,
            runner,
            poll_interval,
            semaphore: Arc::new(Semaphore::new(max_parallel_jobs)),
        }
    }

    /// Starts the polling loop
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("Starting queue worker (interval: {:?})", self.poll_interval);

        let mut interval = time::interval(self.poll_interval);

        loop {
            interval.tick().await;

            loop {
                // Respect the parallelism bound before claiming.
                let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                    debug!("Max parallel jobs reached, pausing claims");
                    break;
                };

                let job = match claim_next(&self.pool).await {
                    Ok(Some(job)) => job,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to claim queue job: {e}");
                        break;
                    }
                };

                let pool = self.pool.clone();
                let runner = Arc::clone(&self.runner);
                tokio::spawn(async move {
                    let job_id = job.id;
                    let outcome = handle_job(&pool, &runner, job).await;

                    let error_text = outcome.as_ref().err().map(|e| format!("{e:#}"));
                    if let Err(e) = complete(&pool, job_id, error_text.as_deref()).await {
                        warn!("Failed to finalize queue job {job_id}: {e}");
                    }
                    drop(permit);
                });
            }
        }
    }
}

async fn handle_job(pool: &PgPool, runner: &LocalRunner, job: QueuedJob) -> anyhow::Result<()> {
    match job.job_name.as_str() {
        jobs::EXECUTE_PIPELINE => execute_pipeline_job(pool, runner, &job.args).await,
        other => {
            warn!("Unknown queue job `{other}`, dropping");
            Ok(())
        }
    }
}

/// Fallback execution path: run the pipeline in-process and finish the
/// Execution record.
pub async fn execute_pipeline_job(
    pool: &PgPool,
    runner: &LocalRunner,
    args: &serde_json::Value,
) -> anyhow::Result<()> {
    let pipeline_id: Uuid = parse_arg(args, "pipeline_id")?;
    let execution_id: Uuid = parse_arg(args, "execution_id")?;

    let Some(execution) = repository::execution::find_by_id(pool, execution_id).await? else {
        warn!("Execution {execution_id} vanished, dropping job");
        return Ok(());
    };

    // At-least-once delivery: a redelivered job for a finished run is a no-op.
    if execution.status.is_terminal() {
        info!(
            "Execution {execution_id} already {}, skipping duplicate delivery",
            execution.status.as_str()
        );
        return Ok(());
    }

    let Some(pipeline) = repository::pipeline::find_by_id(pool, pipeline_id).await? else {
        repository::execution::mark_failed(pool, execution_id, "pipeline no longer exists")
            .await?;
        return Ok(());
    };

    repository::execution::ensure_running(pool, execution_id).await?;

    info!("Running pipeline {pipeline_id} locally for execution {execution_id}");
    let report = runner.execute(&pipeline.graph).await;

    let status = if report.success {
        ExecutionStatus::Success
    } else {
        ExecutionStatus::Failed
    };
    repository::execution::finish_local(
        pool,
        execution_id,
        status,
        report.error.as_deref(),
        &report.logs,
        &report.metrics,
    )
    .await?;

    info!(
        "Execution {execution_id} finished locally: {}",
        status.as_str()
    );
    Ok(())
}

fn parse_arg(args: &serde_json::Value, field: &str) -> anyhow::Result<Uuid> {
    args.get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| anyhow::anyhow!("queue job args missing `{field}`"))
}
