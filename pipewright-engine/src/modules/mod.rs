//! Built-in data-movement modules
//!
//! Extractors, transformers and loaders shipped with the engine, plus the
//! seed descriptors upserted into the module registry at startup.

pub mod extract;
pub mod load;
pub mod transform;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use pipewright_core::domain::module::ModuleDescriptor;
use pipewright_core::domain::pipeline::ModuleKind;
use pipewright_sandbox::SandboxError;
use serde_json::json;

use crate::catalog::{Catalog, Handler};
use crate::connections::{ConnectionResolver, StaticResolver};

/// Errors from executing a single module against one node
///
/// Local to that node: the runner captures them on the execution and moves
/// on to failing the run, nothing here crashes a worker.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("invalid module config: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("bad input data: {0}")]
    Data(String),
}

/// Shared handles every module execution receives
#[derive(Clone)]
pub struct ModuleContext {
    pub http: reqwest::Client,
    pub resolver: Arc<dyn ConnectionResolver>,
    /// Default wall-clock budget for sandboxed transforms; node configs may
    /// shorten it.
    pub sandbox_timeout: Duration,
}

impl ModuleContext {
    pub fn new(resolver: Arc<dyn ConnectionResolver>, sandbox_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            resolver,
            sandbox_timeout,
        }
    }
}

impl Default for ModuleContext {
    fn default() -> Self {
        Self::new(
            Arc::new(StaticResolver::new(HashMap::new())),
            Duration::from_secs(30),
        )
    }
}

/// Build the catalog of built-in modules.
pub fn builtin_catalog() -> Catalog {
    let mut catalog = Catalog::new();

    catalog.register(
        inline_extractor_descriptor(),
        Handler::Extract(Arc::new(extract::InlineExtract)),
    );
    catalog.register(
        http_extractor_descriptor(),
        Handler::Extract(Arc::new(extract::HttpExtract)),
    );
    catalog.register(
        script_transform_descriptor(),
        Handler::Transform(Arc::new(transform::ScriptTransform)),
    );
    catalog.register(
        sql_transform_descriptor(),
        Handler::Transform(Arc::new(transform::SqlTransform)),
    );
    catalog.register(
        clean_transform_descriptor(),
        Handler::Transform(Arc::new(transform::CleanTransform)),
    );
    catalog.register(
        memory_loader_descriptor(),
        Handler::Load(Arc::new(load::MemoryLoad::new())),
    );
    catalog.register(
        http_loader_descriptor(),
        Handler::Load(Arc::new(load::HttpLoad)),
    );

    catalog
}

// =============================================================================
// Seed Descriptors
// =============================================================================

fn inline_extractor_descriptor() -> ModuleDescriptor {
    ModuleDescriptor {
        name: "inline-extractor".to_string(),
        display_name: "Inline Rows".to_string(),
        description: Some("Produce rows embedded directly in the node config".to_string()),
        kind: ModuleKind::Extractor,
        category: "file".to_string(),
        config_schema: json!({
            "type": "object",
            "properties": {
                "rows": {
                    "type": "array",
                    "title": "Rows",
                    "description": "Records to emit as the dataset",
                    "items": {"type": "object"}
                }
            },
            "required": ["rows"]
        }),
        tags: vec!["inline".to_string(), "testing".to_string()],
        active: true,
    }
}

fn http_extractor_descriptor() -> ModuleDescriptor {
    ModuleDescriptor {
        name: "http-extractor".to_string(),
        display_name: "REST API".to_string(),
        description: Some("Extract rows from a REST API endpoint".to_string()),
        kind: ModuleKind::Extractor,
        category: "api".to_string(),
        config_schema: json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "title": "URL",
                    "description": "Endpoint URL; omit when using a connection reference"
                },
                "connection": {
                    "type": "string",
                    "title": "Connection",
                    "description": "Opaque connection reference resolved by the credential service"
                },
                "path": {
                    "type": "string",
                    "title": "Path",
                    "description": "Path appended to the connection base URL"
                },
                "method": {
                    "type": "string",
                    "title": "HTTP Method",
                    "enum": ["GET", "POST"],
                    "default": "GET"
                },
                "headers": {
                    "type": "object",
                    "title": "Headers",
                    "additionalProperties": {"type": "string"}
                },
                "data_path": {
                    "type": "string",
                    "title": "Data Path",
                    "description": "Top-level field holding the record array"
                },
                "timeout_seconds": {
                    "type": "integer",
                    "title": "Timeout (seconds)",
                    "default": 30,
                    "minimum": 1
                }
            }
        }),
        tags: vec!["api".to_string(), "rest".to_string(), "http".to_string()],
        active: true,
    }
}

fn script_transform_descriptor() -> ModuleDescriptor {
    ModuleDescriptor {
        name: "script-transform".to_string(),
        display_name: "Script Transform".to_string(),
        description: Some("Transform rows with a sandboxed script".to_string()),
        kind: ModuleKind::Transformer,
        category: "custom".to_string(),
        config_schema: json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "title": "Script",
                    "description": "Must define transform(rows) returning the new rows",
                    "default": "function transform(rows)\n    return rows\nend"
                },
                "timeout_seconds": {
                    "type": "integer",
                    "title": "Timeout (seconds)",
                    "default": 30,
                    "minimum": 1,
                    "maximum": 300
                }
            },
            "required": ["code"]
        }),
        tags: vec!["script".to_string(), "custom".to_string()],
        active: true,
    }
}

fn sql_transform_descriptor() -> ModuleDescriptor {
    ModuleDescriptor {
        name: "sql-transform".to_string(),
        display_name: "SQL Transform".to_string(),
        description: Some("Transform rows with a SQL query over the `input` relation".to_string()),
        kind: ModuleKind::Transformer,
        category: "custom".to_string(),
        config_schema: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "title": "SQL Query",
                    "description": "Query the upstream dataset as the table `input`",
                    "format": "sql",
                    "default": "SELECT * FROM input LIMIT 1000"
                },
                "timeout_seconds": {
                    "type": "integer",
                    "title": "Timeout (seconds)",
                    "default": 30,
                    "minimum": 1,
                    "maximum": 300
                }
            },
            "required": ["query"]
        }),
        tags: vec!["sql".to_string(), "query".to_string(), "custom".to_string()],
        active: true,
    }
}

fn clean_transform_descriptor() -> ModuleDescriptor {
    ModuleDescriptor {
        name: "clean-transform".to_string(),
        display_name: "Clean Data".to_string(),
        description: Some("Common cleaning operations: trim, drop nulls, lowercase keys".to_string()),
        kind: ModuleKind::Transformer,
        category: "quality".to_string(),
        config_schema: json!({
            "type": "object",
            "properties": {
                "trim_whitespace": {
                    "type": "boolean",
                    "title": "Trim Whitespace",
                    "default": true
                },
                "remove_nulls": {
                    "type": "boolean",
                    "title": "Remove Null Rows",
                    "default": false
                },
                "lowercase_columns": {
                    "type": "boolean",
                    "title": "Lowercase Column Names",
                    "default": false
                }
            }
        }),
        tags: vec!["clean".to_string(), "quality".to_string()],
        active: true,
    }
}

fn memory_loader_descriptor() -> ModuleDescriptor {
    ModuleDescriptor {
        name: "memory-loader".to_string(),
        display_name: "In-Memory Sink".to_string(),
        description: Some("Collect rows into an in-process sink".to_string()),
        kind: ModuleKind::Loader,
        category: "file".to_string(),
        config_schema: json!({
            "type": "object",
            "properties": {
                "label": {
                    "type": "string",
                    "title": "Label",
                    "description": "Name reported in the load summary",
                    "default": "memory"
                }
            }
        }),
        tags: vec!["memory".to_string(), "testing".to_string()],
        active: true,
    }
}

fn http_loader_descriptor() -> ModuleDescriptor {
    ModuleDescriptor {
        name: "http-loader".to_string(),
        display_name: "HTTP Sink".to_string(),
        description: Some("POST rows to an HTTP endpoint".to_string()),
        kind: ModuleKind::Loader,
        category: "api".to_string(),
        config_schema: json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "title": "URL"
                },
                "connection": {
                    "type": "string",
                    "title": "Connection"
                },
                "path": {
                    "type": "string",
                    "title": "Path"
                },
                "headers": {
                    "type": "object",
                    "title": "Headers",
                    "additionalProperties": {"type": "string"}
                },
                "timeout_seconds": {
                    "type": "integer",
                    "title": "Timeout (seconds)",
                    "default": 30,
                    "minimum": 1
                }
            }
        }),
        tags: vec!["api".to_string(), "http".to_string()],
        active: true,
    }
}
