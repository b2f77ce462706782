//! Due-schedule scanning and schedule lifecycle
//!
//! Scans active schedules whose `next_run_at` has passed: skips those whose
//! start date has not arrived, expires those past their end date, and
//! dispatches the rest. One-shot schedules expire after firing and never
//! recompute `next_run_at`. Every schedule is processed independently.

use sqlx::PgPool;
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pipewright_client::Orchestrator;
use pipewright_core::artifact;
use pipewright_core::domain::execution::TriggerKind;
use pipewright_core::domain::schedule::{Frequency, RecurrenceConfig, Schedule, ScheduleStatus};
use pipewright_core::recurrence;

use crate::dispatch::Dispatcher;
use crate::error::DispatchError;
use crate::repository;

/// What the due-scan decides for one schedule
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DueAction {
    /// Start date not reached yet.
    Skip,
    /// End date has passed; the schedule is done.
    Expire,
    Fire,
}

/// Periodically fires due schedules
pub struct ScheduleChecker {
    pool: PgPool,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
}

impl ScheduleChecker {
    pub fn new(pool: PgPool, dispatcher: Arc<Dispatcher>, interval: Duration) -> Self {
        Self {
            pool,
            dispatcher,
            interval,
        }
    }

    /// Starts the scan loop
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("Starting schedule checker (interval: {:?})", self.interval);

        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            match self.check_once().await {
                Ok(fired) => {
                    if fired > 0 {
                        info!("Fired {fired} schedule(s) this cycle");
                    }
                }
                Err(e) => {
                    error!("Error during schedule scan: {e:#}");
                }
            }
        }
    }

    /// Scan due schedules once. One item's failure never aborts the others.
    pub async fn check_once(&self) -> anyhow::Result<usize> {
        let due = repository::schedule::find_due(&self.pool, chrono::Utc::now()).await?;

        if due.is_empty() {
            debug!("No due schedules");
            return Ok(0);
        }

        info!("Found {} due schedule(s)", due.len());

        let mut fired = 0;
        for schedule in due {
            let id = schedule.id;
            match self.process(schedule).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to process schedule {id}: {e:#}");
                }
            }
        }

        Ok(fired)
    }

    async fn process(&self, schedule: Schedule) -> anyhow::Result<bool> {
        let now = chrono::Utc::now();

        match evaluate_due(&schedule, now) {
            DueAction::Skip => {
                debug!("Schedule {}: start date not reached", schedule.id);
                Ok(false)
            }
            DueAction::Expire => {
                info!("Schedule {} passed its end date, expiring", schedule.id);
                repository::schedule::set_status(&self.pool, schedule.id, ScheduleStatus::Expired)
                    .await?;
                Ok(false)
            }
            DueAction::Fire => {
                let dispatched = self
                    .dispatcher
                    .dispatch(
                        schedule.pipeline_id,
                        schedule.params.clone(),
                        TriggerKind::Scheduled,
                    )
                    .await;

                let success = dispatched.is_ok();
                if let Err(e) = &dispatched {
                    // Recorded on the counters; the scan itself moves on.
                    warn!("Schedule {} dispatch failed: {e}", schedule.id);
                }

                let next = next_fire(&schedule, now);
                repository::schedule::record_fire(&self.pool, schedule.id, success, next).await?;

                if schedule.frequency == Frequency::Once {
                    info!("One-shot schedule {} fired, expiring", schedule.id);
                    repository::schedule::set_status(
                        &self.pool,
                        schedule.id,
                        ScheduleStatus::Expired,
                    )
                    .await?;
                }

                Ok(success)
            }
        }
    }
}

/// Pure due decision for one schedule at `now`.
pub(crate) fn evaluate_due(schedule: &Schedule, now: chrono::DateTime<chrono::Utc>) -> DueAction {
    if let Some(start) = schedule.start_date {
        if now < start {
            return DueAction::Skip;
        }
    }
    if let Some(end) = schedule.end_date {
        if now > end {
            return DueAction::Expire;
        }
    }
    DueAction::Fire
}

/// Next fire time after `now`; `None` for one-shot schedules, which never
/// recompute.
pub(crate) fn next_fire(
    schedule: &Schedule,
    now: chrono::DateTime<chrono::Utc>,
) -> Option<chrono::DateTime<chrono::Utc>> {
    if schedule.frequency == Frequency::Once {
        return None;
    }
    let cron = schedule.cron_expression.as_deref()?;
    recurrence::next_run(cron, &schedule.timezone, now)
}

/// Compile a recurrence into its cron expression and initial `next_run_at`.
/// Called on creation and on every config/frequency change.
pub fn prepare_recurrence(
    frequency: Frequency,
    config: &RecurrenceConfig,
    timezone: &str,
    start_date: Option<chrono::DateTime<chrono::Utc>>,
    now: chrono::DateTime<chrono::Utc>,
) -> (Option<String>, Option<chrono::DateTime<chrono::Utc>>) {
    let cron = recurrence::compile(frequency, config);

    let next_run_at = match frequency {
        // A one-shot fires at its start instant (or immediately).
        Frequency::Once => Some(start_date.unwrap_or(now)),
        _ => cron
            .as_deref()
            .and_then(|expr| recurrence::next_run(expr, timezone, now)),
    };

    (cron, next_run_at)
}

/// Toggle a schedule between active and paused. Reactivation recomputes
/// `next_run_at`; a synced schedule also pauses/unpauses its external DAG.
pub async fn toggle_schedule(
    pool: &PgPool,
    orchestrator: &dyn Orchestrator,
    schedule_id: Uuid,
    target: ScheduleStatus,
) -> Result<(), DispatchError> {
    let schedule = repository::schedule::find_by_id(pool, schedule_id)
        .await?
        .ok_or(DispatchError::ScheduleNotFound(schedule_id))?;

    if !schedule.status.can_toggle() || target == ScheduleStatus::Expired {
        return Err(DispatchError::ScheduleExpired(schedule_id));
    }

    repository::schedule::set_status(pool, schedule_id, target).await?;

    if target == ScheduleStatus::Active {
        let next = next_fire(&schedule, chrono::Utc::now());
        repository::schedule::update_next_run(pool, schedule_id, next).await?;
    }

    if schedule.external_synced {
        if let Some(dag_id) = &schedule.external_dag_id {
            let pause = target == ScheduleStatus::Paused;
            if let Err(e) = orchestrator.set_paused(dag_id, pause).await {
                warn!("Failed to sync pause state of DAG {dag_id}: {e}");
            }
        }
    }

    info!("Schedule {schedule_id} toggled to {}", target.as_str());
    Ok(())
}

/// Push a schedule's DAG artifact (with its cron) to the orchestrator and
/// mark the schedule synced.
pub async fn sync_external(
    pool: &PgPool,
    orchestrator: &dyn Orchestrator,
    schedule_id: Uuid,
) -> Result<String, DispatchError> {
    let schedule = repository::schedule::find_by_id(pool, schedule_id)
        .await?
        .ok_or(DispatchError::ScheduleNotFound(schedule_id))?;

    let pipeline = repository::pipeline::find_by_id(pool, schedule.pipeline_id)
        .await?
        .ok_or(DispatchError::PipelineNotFound(schedule.pipeline_id))?;

    let artifact = artifact::build(
        pipeline.id,
        &pipeline.graph,
        &pipeline.default_params,
        schedule.cron_expression.as_deref(),
    )?;

    orchestrator
        .submit_artifact(&artifact)
        .await
        .map_err(|e| DispatchError::Orchestrator(e.to_string()))?;

    repository::schedule::mark_external_synced(pool, schedule_id, &artifact.dag_id).await?;

    info!(
        "Schedule {schedule_id} synced to orchestrator as {}",
        artifact.dag_id
    );
    Ok(artifact.dag_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn schedule(frequency: Frequency, cron: Option<&str>) -> Schedule {
        let now = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Schedule {
            id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            name: "nightly".to_string(),
            description: None,
            frequency,
            cron_expression: cron.map(String::from),
            timezone: "UTC".to_string(),
            config: RecurrenceConfig::default(),
            params: HashMap::new(),
            status: ScheduleStatus::Active,
            start_date: None,
            end_date: None,
            next_run_at: Some(now),
            last_run_at: None,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            external_synced: false,
            external_dag_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_evaluate_due_window() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let mut s = schedule(Frequency::Daily, Some("0 0 * * *"));

        assert_eq!(evaluate_due(&s, now), DueAction::Fire);

        s.start_date = Some(chrono::Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
        assert_eq!(evaluate_due(&s, now), DueAction::Skip);

        s.start_date = None;
        s.end_date = Some(chrono::Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(evaluate_due(&s, now), DueAction::Expire);
    }

    #[test]
    fn test_next_fire_weekly_advances_a_week() {
        // Wednesday 02:01 with a Wednesday-02:00 cron: next fire is the
        // following Wednesday.
        let now = chrono::Utc.with_ymd_and_hms(2024, 1, 3, 2, 1, 0).unwrap();
        let s = schedule(Frequency::Weekly, Some("0 2 * * 3"));

        let next = next_fire(&s, now).unwrap();
        assert_eq!(
            next,
            chrono::Utc.with_ymd_and_hms(2024, 1, 10, 2, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_fire_once_is_none() {
        let s = schedule(Frequency::Once, None);
        let now = chrono::Utc.with_ymd_and_hms(2024, 1, 3, 2, 1, 0).unwrap();
        assert_eq!(next_fire(&s, now), None);
    }

    #[test]
    fn test_next_fire_malformed_cron_goes_dormant() {
        let s = schedule(Frequency::Custom, Some("completely wrong"));
        let now = chrono::Utc.with_ymd_and_hms(2024, 1, 3, 2, 1, 0).unwrap();
        assert_eq!(next_fire(&s, now), None);
    }

    #[test]
    fn test_prepare_recurrence_daily() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let config = RecurrenceConfig {
            minute: 30,
            hour: 9,
            ..Default::default()
        };

        let (cron, next) = prepare_recurrence(Frequency::Daily, &config, "UTC", None, now);
        assert_eq!(cron.as_deref(), Some("30 9 * * *"));
        assert_eq!(
            next,
            Some(chrono::Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_prepare_recurrence_once() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let start = chrono::Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();

        let (cron, next) = prepare_recurrence(
            Frequency::Once,
            &RecurrenceConfig::default(),
            "UTC",
            Some(start),
            now,
        );
        // No recurring expression; it fires at its start instant.
        assert_eq!(cron, None);
        assert_eq!(next, Some(start));

        let (_, next) =
            prepare_recurrence(Frequency::Once, &RecurrenceConfig::default(), "UTC", None, now);
        assert_eq!(next, Some(now));
    }
}
