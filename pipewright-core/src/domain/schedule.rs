//! Schedule domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Recurrence policy bound to one pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub frequency: Frequency,
    /// Canonical five-field cron, compiled from `config`; `None` for `once`.
    pub cron_expression: Option<String>,
    pub timezone: String,
    pub config: RecurrenceConfig,
    /// Parameters passed to every dispatch this schedule triggers.
    pub params: HashMap<String, serde_json::Value>,
    pub status: ScheduleStatus,
    pub start_date: Option<chrono::DateTime<chrono::Utc>>,
    pub end_date: Option<chrono::DateTime<chrono::Utc>>,
    pub next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    pub total_runs: i32,
    pub successful_runs: i32,
    pub failed_runs: i32,
    /// Whether the compiled DAG artifact has been pushed to the orchestrator.
    pub external_synced: bool,
    pub external_dag_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Raw recurrence description as authored in the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceConfig {
    #[serde(default)]
    pub minute: u32,
    #[serde(default)]
    pub hour: u32,
    /// Day of month for `monthly`; 1 when unset.
    #[serde(default = "default_day_of_month")]
    pub day_of_month: u32,
    /// Lowercase day names for `weekly` ("monday".."sunday").
    #[serde(default)]
    pub days_of_week: Vec<String>,
    /// Verbatim user expression for `custom`.
    #[serde(default)]
    pub cron_expression: Option<String>,
}

impl Default for RecurrenceConfig {
    fn default() -> Self {
        Self {
            minute: 0,
            hour: 0,
            day_of_month: 1,
            days_of_week: Vec::new(),
            cron_expression: None,
        }
    }
}

fn default_day_of_month() -> u32 {
    1
}

/// How often a schedule fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Once,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Once => "once",
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Frequency {
        match s {
            "once" => Frequency::Once,
            "hourly" => Frequency::Hourly,
            "weekly" => Frequency::Weekly,
            "monthly" => Frequency::Monthly,
            "custom" => Frequency::Custom,
            _ => Frequency::Daily,
        }
    }
}

/// Schedule status state machine
///
/// `active <-> paused` via toggle; `active -> expired` automatically on
/// one-shot fire or end-date closure. `expired` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Expired,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Active => "active",
            ScheduleStatus::Paused => "paused",
            ScheduleStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> ScheduleStatus {
        match s {
            "paused" => ScheduleStatus::Paused,
            "expired" => ScheduleStatus::Expired,
            _ => ScheduleStatus::Active,
        }
    }

    /// Toggling only ever moves between active and paused; expired schedules
    /// stay expired.
    pub fn can_toggle(&self) -> bool {
        !matches!(self, ScheduleStatus::Expired)
    }
}
