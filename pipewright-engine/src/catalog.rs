//! Module catalog
//!
//! Registry mapping a stable module name to its descriptor and handler. The
//! handler is a tagged variant per module kind; dispatch resolves purely
//! from this registry, so new kinds register here without touching the
//! planner or dispatcher. Populated at startup, never via reflection.

use async_trait::async_trait;
use jsonschema::JSONSchema;
use std::collections::HashMap;
use std::sync::Arc;

use pipewright_core::domain::dataset::{Dataset, LoadSummary};
use pipewright_core::domain::module::ModuleDescriptor;
use pipewright_core::domain::pipeline::{ModuleKind, PipelineGraph};

use crate::error::DispatchError;
use crate::modules::{ModuleContext, ModuleError};

/// Extractors take no input and produce a dataset.
#[async_trait]
pub trait Extract: Send + Sync {
    async fn extract(
        &self,
        ctx: &ModuleContext,
        config: &serde_json::Value,
    ) -> Result<Dataset, ModuleError>;
}

/// Transformers take the (concatenated) upstream dataset and return a new one.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn transform(
        &self,
        ctx: &ModuleContext,
        config: &serde_json::Value,
        input: Dataset,
    ) -> Result<Dataset, ModuleError>;
}

/// Loaders take the upstream dataset and return a side-effect summary.
#[async_trait]
pub trait Load: Send + Sync {
    async fn load(
        &self,
        ctx: &ModuleContext,
        config: &serde_json::Value,
        input: Dataset,
    ) -> Result<LoadSummary, ModuleError>;
}

/// Tagged handler variant, one per module kind
#[derive(Clone)]
pub enum Handler {
    Extract(Arc<dyn Extract>),
    Transform(Arc<dyn Transform>),
    Load(Arc<dyn Load>),
}

impl Handler {
    pub fn kind(&self) -> ModuleKind {
        match self {
            Handler::Extract(_) => ModuleKind::Extractor,
            Handler::Transform(_) => ModuleKind::Transformer,
            Handler::Load(_) => ModuleKind::Loader,
        }
    }
}

/// A catalog entry: descriptor plus executable handler
pub struct Registered {
    pub descriptor: ModuleDescriptor,
    pub handler: Handler,
    /// Compiled once at registration; `None` when the descriptor carries no
    /// usable schema.
    compiled_schema: Option<JSONSchema>,
}

impl Registered {
    /// Validate a node config blob against the module's config schema.
    pub fn validate_config(&self, config: &serde_json::Value) -> Result<(), String> {
        let Some(schema) = &self.compiled_schema else {
            return Ok(());
        };
        // Treat an omitted config as an empty object.
        let empty = serde_json::json!({});
        let instance = if config.is_null() { &empty } else { config };

        match schema.validate(instance) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let joined = errors
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(joined)
            }
        }
    }
}

/// Name-keyed module registry
#[derive(Default)]
pub struct Catalog {
    modules: HashMap<String, Registered>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. The handler kind must match the descriptor kind;
    /// a mismatch is a programming error in the seed list.
    pub fn register(&mut self, descriptor: ModuleDescriptor, handler: Handler) {
        debug_assert_eq!(descriptor.kind, handler.kind());

        let compiled_schema = JSONSchema::compile(&descriptor.config_schema).ok();
        self.modules.insert(
            descriptor.name.clone(),
            Registered {
                descriptor,
                handler,
                compiled_schema,
            },
        );
    }

    /// Resolve a module by name. Unknown names fail before any I/O happens.
    pub fn resolve(&self, name: &str) -> Result<&Registered, DispatchError> {
        self.modules
            .get(name)
            .ok_or_else(|| DispatchError::ModuleNotFound(name.to_string()))
    }

    /// Check every node of a graph against the catalog: the module exists,
    /// is active, matches the node's declared kind, and the node config
    /// passes the module's schema. Runs before any dispatch.
    pub fn validate_nodes(&self, graph: &PipelineGraph) -> Result<(), DispatchError> {
        for node in &graph.nodes {
            let registered = self.resolve(&node.module)?;

            if !registered.descriptor.active {
                return Err(DispatchError::InvalidConfig {
                    node: node.id.clone(),
                    reason: format!("module `{}` is deactivated", node.module),
                });
            }

            if registered.descriptor.kind != node.kind {
                return Err(DispatchError::InvalidConfig {
                    node: node.id.clone(),
                    reason: format!(
                        "module `{}` is a {}, node declares {}",
                        node.module, registered.descriptor.kind, node.kind
                    ),
                });
            }

            if let Err(reason) = registered.validate_config(&node.config) {
                return Err(DispatchError::InvalidConfig {
                    node: node.id.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.values().map(|r| &r.descriptor)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
