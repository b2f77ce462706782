//! Local pipeline runner
//!
//! The fallback execution path: runs a pipeline graph in-process when the
//! orchestrator is unavailable. Plans the graph, resolves every module up
//! front (unknown modules fail before any I/O), then executes nodes in
//! order, concatenating upstream datasets for fan-in nodes.
//!
//! Node failures, sandbox errors included, are captured in the run report,
//! never propagated as panics or crashes.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use pipewright_core::domain::dataset::{Dataset, LoadSummary};
use pipewright_core::domain::log::LogEntry;
use pipewright_core::domain::pipeline::PipelineGraph;
use pipewright_core::graph;

use crate::catalog::{Catalog, Handler};
use crate::modules::ModuleContext;

/// Outcome of a local run, persisted onto the Execution by the caller
#[derive(Debug, Default)]
pub struct RunReport {
    pub success: bool,
    pub error: Option<String>,
    pub logs: Vec<LogEntry>,
    /// Per-node row counts: `{node_id: {"rows_out": n}}`.
    pub metrics: HashMap<String, serde_json::Value>,
    pub summaries: Vec<LoadSummary>,
}

impl RunReport {
    fn failed(mut self, message: String) -> Self {
        self.logs.push(LogEntry::error(message.clone()));
        self.error = Some(message);
        self.success = false;
        self
    }
}

/// Executes pipeline graphs against the module catalog
pub struct LocalRunner {
    catalog: Arc<Catalog>,
    context: ModuleContext,
}

impl LocalRunner {
    pub fn new(catalog: Arc<Catalog>, context: ModuleContext) -> Self {
        Self { catalog, context }
    }

    /// Run the full graph and report the outcome.
    pub async fn execute(&self, graph_def: &PipelineGraph) -> RunReport {
        let mut report = RunReport::default();

        let plan = match graph::plan(graph_def, None) {
            Ok(plan) => plan,
            Err(e) => return report.failed(format!("graph planning failed: {e}")),
        };
        if let Err(e) = graph::validate_executable(graph_def) {
            return report.failed(format!("graph is not executable: {e}"));
        }

        for warning in &plan.warnings {
            report.logs.push(LogEntry::warning(warning.to_string()));
        }

        // Resolve everything before running anything.
        for node_id in &plan.order {
            let Some(node) = graph_def.node(node_id) else {
                return report.failed(format!("planned node `{node_id}` missing from graph"));
            };
            if let Err(e) = self.catalog.resolve(&node.module) {
                return report.failed(e.to_string());
            }
        }

        report
            .logs
            .push(LogEntry::info(format!("executing {} nodes", plan.order.len())));

        let mut outputs: HashMap<&str, Dataset> = HashMap::new();

        for node_id in &plan.order {
            // Both lookups were checked above.
            let Some(node) = graph_def.node(node_id) else {
                return report.failed(format!("planned node `{node_id}` missing from graph"));
            };
            let Ok(registered) = self.catalog.resolve(&node.module) else {
                return report.failed(format!("module `{}` vanished mid-run", node.module));
            };

            let input = upstream_input(graph_def, &plan.order, &outputs, node_id);

            info!(
                "Executing {} node `{}` via {}",
                node.kind, node.id, node.module
            );
            report.logs.push(LogEntry::info(format!(
                "starting {} node `{}`",
                node.kind, node.id
            )));

            let result = match &registered.handler {
                Handler::Extract(extractor) => extractor
                    .extract(&self.context, &node.config)
                    .await
                    .map(Some),
                Handler::Transform(transformer) => transformer
                    .transform(&self.context, &node.config, input)
                    .await
                    .map(Some),
                Handler::Load(loader) => {
                    match loader.load(&self.context, &node.config, input).await {
                        Ok(summary) => {
                            report.logs.push(LogEntry::info(format!(
                                "node `{}` loaded {} rows into {}",
                                node.id, summary.rows_written, summary.destination
                            )));
                            report.metrics.insert(
                                node.id.clone(),
                                serde_json::json!({"rows_out": summary.rows_written}),
                            );
                            report.summaries.push(summary);
                            continue;
                        }
                        Err(e) => Err(e),
                    }
                }
            };

            match result {
                Ok(Some(dataset)) => {
                    report.logs.push(LogEntry::info(format!(
                        "node `{}` produced {} rows",
                        node.id,
                        dataset.len()
                    )));
                    report.metrics.insert(
                        node.id.clone(),
                        serde_json::json!({"rows_out": dataset.len()}),
                    );
                    outputs.insert(node.id.as_str(), dataset);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Node `{}` failed: {e}", node.id);
                    return report.failed(format!("node `{}` failed: {e}", node.id));
                }
            }
        }

        report.logs.push(LogEntry::info("pipeline completed"));
        report.success = true;
        report
    }
}

/// Concatenate the outputs of a node's upstream producers, in plan order.
fn upstream_input(
    graph_def: &PipelineGraph,
    order: &[String],
    outputs: &HashMap<&str, Dataset>,
    node_id: &str,
) -> Dataset {
    let position: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut sources: Vec<&str> = graph_def
        .edges
        .iter()
        .filter(|e| e.target == node_id)
        .map(|e| e.source.as_str())
        .collect();
    sources.sort_by_key(|s| position.get(s).copied().unwrap_or(usize::MAX));
    sources.dedup();

    Dataset::concat(
        sources
            .into_iter()
            .filter_map(|s| outputs.get(s).cloned()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::builtin_catalog;
    use pipewright_core::domain::pipeline::{GraphEdge, GraphNode, ModuleKind};
    use serde_json::json;

    fn runner() -> LocalRunner {
        LocalRunner::new(Arc::new(builtin_catalog()), ModuleContext::default())
    }

    fn node(id: &str, kind: ModuleKind, module: &str, config: serde_json::Value) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            kind,
            module: module.to_string(),
            config,
        }
    }

    fn edge(source: &str, target: &str) -> GraphEdge {
        GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    fn extract_transform_load(script: &str) -> PipelineGraph {
        PipelineGraph {
            nodes: vec![
                node(
                    "pull",
                    ModuleKind::Extractor,
                    "inline-extractor",
                    json!({"rows": [{"value": 1}, {"value": 2}]}),
                ),
                node(
                    "shape",
                    ModuleKind::Transformer,
                    "script-transform",
                    json!({"code": script}),
                ),
                node("store", ModuleKind::Loader, "memory-loader", json!({})),
            ],
            edges: vec![edge("pull", "shape"), edge("shape", "store")],
        }
    }

    #[tokio::test]
    async fn test_full_pipeline_run() {
        let script = "function transform(rows)\n  for _, r in ipairs(rows) do r.value = r.value * 10 end\n  return rows\nend";
        let report = runner().execute(&extract_transform_load(script)).await;

        assert!(report.success, "{:?}", report.error);
        assert_eq!(report.summaries.len(), 1);
        assert_eq!(report.summaries[0].rows_written, 2);
        assert_eq!(report.metrics.get("pull"), Some(&json!({"rows_out": 2})));
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_unknown_module_fails_before_any_node_runs() {
        let mut graph = extract_transform_load("function transform(rows) return rows end");
        graph.nodes[1].module = "ghost-transform".to_string();

        let report = runner().execute(&graph).await;
        assert!(!report.success);
        assert!(report.error.as_deref().unwrap().contains("ghost-transform"));
        // Nothing executed: no metrics were recorded, not even the extractor.
        assert!(report.metrics.is_empty());
    }

    #[tokio::test]
    async fn test_sandbox_error_is_captured_not_propagated() {
        let report = runner()
            .execute(&extract_transform_load(
                "function transform(rows) return 42 end",
            ))
            .await;

        assert!(!report.success);
        assert!(report.error.as_deref().unwrap().contains("shape"));
    }

    #[tokio::test]
    async fn test_fan_in_concatenates_upstream() {
        let graph = PipelineGraph {
            nodes: vec![
                node(
                    "left",
                    ModuleKind::Extractor,
                    "inline-extractor",
                    json!({"rows": [{"value": 1}]}),
                ),
                node(
                    "right",
                    ModuleKind::Extractor,
                    "inline-extractor",
                    json!({"rows": [{"value": 2}]}),
                ),
                node("store", ModuleKind::Loader, "memory-loader", json!({})),
            ],
            edges: vec![edge("left", "store"), edge("right", "store")],
        };

        let report = runner().execute(&graph).await;
        assert!(report.success, "{:?}", report.error);
        assert_eq!(report.summaries[0].rows_written, 2);
    }

    #[tokio::test]
    async fn test_unexecutable_graph_is_rejected() {
        let graph = PipelineGraph {
            nodes: vec![node(
                "pull",
                ModuleKind::Extractor,
                "inline-extractor",
                json!({"rows": []}),
            )],
            edges: vec![],
        };

        let report = runner().execute(&graph).await;
        assert!(!report.success);
    }
}
