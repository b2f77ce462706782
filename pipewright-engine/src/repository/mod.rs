//! Persistence layer
//!
//! Free functions over a `PgPool`, one module per aggregate. Status columns
//! are stored as strings and parsed back through the domain enums; JSON
//! blobs (graphs, params, logs, metrics) live in JSONB columns.

pub mod execution;
pub mod module;
pub mod pipeline;
pub mod schedule;
