//! Pipewright Core
//!
//! Pure domain layer for the Pipewright pipeline orchestration core.
//!
//! This crate contains:
//! - Domain types: Pipeline graphs, executions, schedules, module descriptors
//! - GraphPlanner: validation and deterministic execution ordering
//! - ScheduleCompiler: recurrence-to-cron compilation and next-fire computation
//! - Artifact builder: deterministic orchestrator DAG definitions
//!
//! No I/O happens here. Persistence lives in the engine, remote calls in the
//! client, and user-code execution in the sandbox crate.

pub mod artifact;
pub mod domain;
pub mod error;
pub mod graph;
pub mod recurrence;
