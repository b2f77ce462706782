use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create pipelines table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            description TEXT,
            version VARCHAR(20) NOT NULL DEFAULT '1.0.0',
            graph JSONB NOT NULL,
            default_params JSONB NOT NULL DEFAULT '{}',
            tags TEXT[] NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create executions table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS executions (
            id UUID PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            trigger_kind VARCHAR(50) NOT NULL,
            status VARCHAR(50) NOT NULL,
            params JSONB NOT NULL DEFAULT '{}',
            requested_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            duration_seconds BIGINT,
            logs JSONB NOT NULL DEFAULT '[]',
            metrics JSONB NOT NULL DEFAULT '{}',
            error_message TEXT,
            backend VARCHAR(50),
            correlation_id VARCHAR(255)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_status ON executions (status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_pipeline ON executions (pipeline_id)")
        .execute(pool)
        .await?;

    // Create schedules table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedules (
            id UUID PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            description TEXT,
            frequency VARCHAR(50) NOT NULL,
            cron_expression VARCHAR(100),
            timezone VARCHAR(100) NOT NULL DEFAULT 'UTC',
            config JSONB NOT NULL DEFAULT '{}',
            params JSONB NOT NULL DEFAULT '{}',
            status VARCHAR(50) NOT NULL DEFAULT 'active',
            start_date TIMESTAMPTZ,
            end_date TIMESTAMPTZ,
            next_run_at TIMESTAMPTZ,
            last_run_at TIMESTAMPTZ,
            total_runs INTEGER NOT NULL DEFAULT 0,
            successful_runs INTEGER NOT NULL DEFAULT 0,
            failed_runs INTEGER NOT NULL DEFAULT 0,
            external_synced BOOLEAN NOT NULL DEFAULT FALSE,
            external_dag_id VARCHAR(255),
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules (status, next_run_at)",
    )
    .execute(pool)
    .await?;

    // Create module registry table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS modules (
            name VARCHAR(100) PRIMARY KEY,
            display_name VARCHAR(255) NOT NULL,
            description TEXT,
            kind VARCHAR(50) NOT NULL,
            category VARCHAR(100) NOT NULL,
            config_schema JSONB NOT NULL,
            tags TEXT[] NOT NULL DEFAULT '{}',
            active BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create queue jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_jobs (
            id UUID PRIMARY KEY,
            job_name VARCHAR(100) NOT NULL,
            args JSONB NOT NULL DEFAULT '{}',
            status VARCHAR(50) NOT NULL DEFAULT 'queued',
            requested_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_jobs_status ON queue_jobs (status, requested_at)")
        .execute(pool)
        .await?;

    Ok(())
}
