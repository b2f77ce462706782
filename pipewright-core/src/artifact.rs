//! Orchestrator DAG artifacts
//!
//! The dispatcher regenerates the artifact on every run. Generation is
//! deterministic: identical graph + params always produce identical content,
//! so concurrent regenerations for the same pipeline converge and redundant
//! submission is harmless.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::domain::pipeline::{ModuleKind, PipelineGraph};
use crate::error::GraphError;
use crate::graph;

/// Executable DAG definition submitted to the external orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagArtifact {
    pub dag_id: String,
    pub pipeline_id: Uuid,
    /// Cron expression when the pipeline is schedule-synced.
    pub schedule: Option<String>,
    /// Sorted so param insertion order never leaks into the artifact.
    pub default_args: BTreeMap<String, serde_json::Value>,
    /// Tasks in execution order; upstream lists are sorted.
    pub tasks: Vec<ArtifactTask>,
}

/// One task in the generated DAG
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactTask {
    pub task_id: String,
    pub kind: ModuleKind,
    pub module: String,
    pub config: serde_json::Value,
    pub upstream: Vec<String>,
}

/// Stable DAG identifier for a pipeline.
pub fn dag_id_for(pipeline_id: Uuid) -> String {
    format!("pipeline_{}", pipeline_id.simple())
}

/// Build the orchestrator artifact for a pipeline graph.
pub fn build(
    pipeline_id: Uuid,
    graph_def: &PipelineGraph,
    params: &HashMap<String, serde_json::Value>,
    schedule: Option<&str>,
) -> Result<DagArtifact, GraphError> {
    let plan = graph::plan(graph_def, None)?;

    let mut tasks = Vec::with_capacity(plan.order.len());
    for node_id in &plan.order {
        // Planned ids always resolve; the plan was built from this graph.
        let node = graph_def
            .node(node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.clone()))?;

        let mut upstream: Vec<String> = graph_def
            .edges
            .iter()
            .filter(|e| e.target == *node_id)
            .map(|e| e.source.clone())
            .collect();
        upstream.sort();
        upstream.dedup();

        tasks.push(ArtifactTask {
            task_id: node.id.clone(),
            kind: node.kind,
            module: node.module.clone(),
            config: node.config.clone(),
            upstream,
        });
    }

    Ok(DagArtifact {
        dag_id: dag_id_for(pipeline_id),
        pipeline_id,
        schedule: schedule.map(|s| s.to_string()),
        default_args: params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        tasks,
    })
}
