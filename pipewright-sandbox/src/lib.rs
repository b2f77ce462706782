//! Pipewright Sandbox
//!
//! Runs user-supplied transformation code against an in-memory dataset under
//! a hard wall-clock bound. Two modes:
//!
//! - Script: a restricted Lua VM exposing only pure standard libraries. The
//!   chunk must define `transform(rows)` taking and returning an array of
//!   records.
//! - Query: a SQL statement executed against the dataset registered as the
//!   single relation `input`; no other relation is readable.
//!
//! Every call operates on a private copy of the input (the caller's data is
//! never mutated) and releases its VM/session on every exit path, including
//! timeout. Validation-only entry points check syntax without executing.

pub mod error;
pub mod query;
pub mod script;
pub mod validate;
mod vm;

pub use error::SandboxError;
pub use query::run_query;
pub use script::run_script;
pub use validate::{check_query, check_script};
