//! Core domain types
//!
//! These types represent the fundamental business entities and are shared
//! between the engine (persistence, dispatch) and the sandbox/client crates.

pub mod dataset;
pub mod execution;
pub mod log;
pub mod module;
pub mod pipeline;
pub mod schedule;
