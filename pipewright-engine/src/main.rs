//! Pipewright Worker
//!
//! Long-running process hosting the engine's periodic loops:
//! - Execution poller: reconciles orchestrator run state
//! - Schedule checker: fires due schedules
//! - Queue worker: executes fallback pipeline runs
//! - Retention cleanup: prunes old terminal executions
//!
//! All handles are constructed here and injected; nothing is a global.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipewright_client::{Orchestrator, OrchestratorClient};
use pipewright_engine::config::Config;
use pipewright_engine::connections::{ConnectionResolver, StaticResolver};
use pipewright_engine::dispatch::Dispatcher;
use pipewright_engine::modules::{ModuleContext, builtin_catalog};
use pipewright_engine::queue::{PgTaskQueue, QueueWorker, TaskQueue};
use pipewright_engine::reconcile::{ExecutionPoller, ScheduleChecker};
use pipewright_engine::runner::LocalRunner;
use pipewright_engine::{db, repository};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipewright_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Pipewright worker");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        "Loaded configuration: orchestrator_url={}",
        config.orchestrator_url
    );

    info!("Connecting to database");
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database ready");

    // Build the module catalog and mirror its descriptors into the registry
    // table for the CRUD surface.
    let catalog = Arc::new(builtin_catalog());
    for descriptor in catalog.descriptors() {
        if let Err(e) = repository::module::upsert(&pool, descriptor).await {
            warn!("Failed to seed module `{}`: {e}", descriptor.name);
        }
    }
    info!("Module catalog ready ({} modules)", catalog.len());

    // Connection resolution is injected; the worker reads a static map from
    // the environment when one is provided.
    let resolver: Arc<dyn ConnectionResolver> = match std::env::var("CONNECTIONS_JSON") {
        Ok(raw) => Arc::new(
            StaticResolver::from_json(&raw).context("CONNECTIONS_JSON is not valid JSON")?,
        ),
        Err(_) => Arc::new(StaticResolver::new(HashMap::new())),
    };

    let orchestrator: Arc<dyn Orchestrator> = Arc::new(
        OrchestratorClient::new(config.orchestrator_url.clone()).with_basic_auth(
            config.orchestrator_username.clone(),
            config.orchestrator_password.clone(),
        ),
    );
    let queue: Arc<dyn TaskQueue> = Arc::new(PgTaskQueue::new(pool.clone()));

    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        Arc::clone(&orchestrator),
        Arc::clone(&queue),
        Arc::clone(&catalog),
    ));

    let runner = Arc::new(LocalRunner::new(
        Arc::clone(&catalog),
        ModuleContext::new(Arc::clone(&resolver), config.sandbox_timeout),
    ));

    let poller = ExecutionPoller::new(
        pool.clone(),
        Arc::clone(&orchestrator),
        config.execution_poll_interval,
    );
    let checker = ScheduleChecker::new(
        pool.clone(),
        Arc::clone(&dispatcher),
        config.schedule_check_interval,
    );
    let worker = QueueWorker::new(
        pool.clone(),
        runner,
        config.queue_poll_interval,
        config.max_parallel_jobs,
    );

    let cleanup_pool = pool.clone();
    let cleanup_interval = config.cleanup_interval;
    let retention_days = config.retention_days;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);
            match repository::execution::delete_terminal_older_than(&cleanup_pool, cutoff).await {
                Ok(0) => {}
                Ok(deleted) => info!("Retention cleanup deleted {deleted} execution(s)"),
                Err(e) => error!("Retention cleanup failed: {e}"),
            }
        }
    });

    info!("Worker initialized, starting loops");

    tokio::select! {
        result = poller.run() => result.context("execution poller exited")?,
        result = checker.run() => result.context("schedule checker exited")?,
        result = worker.run() => result.context("queue worker exited")?,
    }

    Ok(())
}
