//! State reconciliation
//!
//! Two periodic loops advance persisted records against the outside world:
//! the execution poller maps remote orchestrator run states onto local
//! Executions, and the schedule checker fires due schedules. Every item is
//! processed independently: one stuck or failing item never blocks its
//! siblings, and remote-fetch failures are simply retried next cycle.

pub mod executions;
pub mod schedules;

pub use executions::ExecutionPoller;
pub use schedules::ScheduleChecker;
