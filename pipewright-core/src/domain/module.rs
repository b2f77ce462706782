//! Module catalog descriptor

use serde::{Deserialize, Serialize};

use crate::domain::pipeline::ModuleKind;

/// Immutable catalog entry for a pluggable data-movement module
///
/// Created at seed/registration time and referenced by graph nodes via
/// `name`. Descriptors are deactivated, never hard-deleted, while any graph
/// still references them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Stable unique identifier, e.g. "script-transform".
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub kind: ModuleKind,
    /// Coarse grouping for the UI palette: "file", "api", "custom", ...
    pub category: String,
    /// JSON-Schema describing valid node configs for this module.
    pub config_schema: serde_json::Value,
    pub tags: Vec<String>,
    pub active: bool,
}
