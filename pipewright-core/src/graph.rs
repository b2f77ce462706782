//! Graph planning
//!
//! Turns a user-authored node/edge graph into a deterministic execution
//! order. Ordering walks incoming edges backward from the target (or from
//! every loader) with an explicit stack, so every node appears strictly
//! after all of its transitive dependencies and recursion depth never limits
//! graph size.
//!
//! Validation is split in two: structural checks (`validate_structure`) and
//! executability checks (`validate_executable`). Only the latter blocks
//! dispatch; a structurally sound graph without a reachable loader can still
//! be planned for preview.

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::pipeline::{ModuleKind, PipelineGraph};
use crate::error::GraphError;

/// Deterministic execution order plus non-fatal findings
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Node ids, each strictly after all of its transitive dependencies.
    pub order: Vec<String>,
    pub warnings: Vec<PlanWarning>,
}

/// Non-fatal graph findings surfaced alongside a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanWarning {
    /// Node touched by no edge in a multi-node graph.
    OrphanNode { id: String },
}

impl std::fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanWarning::OrphanNode { id } => {
                write!(f, "node `{id}` is not connected to any edge")
            }
        }
    }
}

/// Full validation report for inline diagnostics
///
/// Collects every finding instead of stopping at the first, so the UI can
/// show all problems at once.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<GraphError>,
    pub warnings: Vec<PlanWarning>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Compute the execution order for `graph`.
///
/// With a target node id, only the target and its transitive dependencies
/// are planned (partial execution / preview). Without one, planning starts
/// from every loader node.
///
/// Fails with `Cycle` on any cyclic input (never a partial order) and with
/// `UnreachableTarget` when the requested target id does not exist.
pub fn plan(graph: &PipelineGraph, target: Option<&str>) -> Result<Plan, GraphError> {
    validate_structure(graph)?;

    let arena = Arena::build(graph)?;

    let roots: Vec<NodeIndex> = match target {
        Some(id) => {
            let idx = arena
                .index_of(id)
                .ok_or_else(|| GraphError::UnreachableTarget(id.to_string()))?;
            vec![idx]
        }
        None => arena.loaders(),
    };

    let mut order = Vec::with_capacity(graph.nodes.len());
    let mut visited: HashSet<NodeIndex> = HashSet::new();

    // Two-phase stack: the first pop of a node schedules its dependencies,
    // the second pop emits it. Dependencies are pushed in reverse declaration
    // order so the emitted order is stable across runs.
    let mut stack: Vec<(NodeIndex, bool)> = Vec::new();
    for root in roots.iter().rev() {
        stack.push((*root, false));
    }

    while let Some((idx, expanded)) = stack.pop() {
        if expanded {
            order.push(arena.id_of(idx).to_string());
            continue;
        }
        if !visited.insert(idx) {
            continue;
        }
        stack.push((idx, true));

        let mut upstream: Vec<NodeIndex> = arena
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        upstream.sort();
        for up in upstream.into_iter().rev() {
            if !visited.contains(&up) {
                stack.push((up, false));
            }
        }
    }

    Ok(Plan {
        order,
        warnings: orphan_warnings(graph),
    })
}

/// Structural validity: the graph is non-empty, edges reference existing
/// nodes, no node feeds itself, and the graph is acyclic.
pub fn validate_structure(graph: &PipelineGraph) -> Result<(), GraphError> {
    if graph.nodes.is_empty() {
        return Err(GraphError::EmptyGraph);
    }

    let ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in &graph.edges {
        if edge.source == edge.target {
            return Err(GraphError::SelfEdge(edge.source.clone()));
        }
        if !ids.contains(edge.source.as_str()) {
            return Err(GraphError::UnknownNode(edge.source.clone()));
        }
        if !ids.contains(edge.target.as_str()) {
            return Err(GraphError::UnknownNode(edge.target.clone()));
        }
    }

    let arena = Arena::build(graph)?;
    toposort(&arena.graph, None).map_err(|_| GraphError::Cycle)?;

    Ok(())
}

/// Executability: at least one extractor exists and at least one loader is
/// reachable from an extractor. This is the check that gates dispatch.
pub fn validate_executable(graph: &PipelineGraph) -> Result<(), GraphError> {
    if !graph
        .nodes
        .iter()
        .any(|n| n.kind == ModuleKind::Extractor)
    {
        return Err(GraphError::MissingExtractor);
    }

    let arena = Arena::build(graph)?;

    // Forward BFS from every extractor.
    let mut reachable: HashSet<NodeIndex> = HashSet::new();
    let mut queue: VecDeque<NodeIndex> = arena
        .graph
        .node_indices()
        .filter(|&i| arena.kind_of(i) == ModuleKind::Extractor)
        .collect();
    for idx in &queue {
        reachable.insert(*idx);
    }
    while let Some(idx) = queue.pop_front() {
        for next in arena.graph.neighbors_directed(idx, Direction::Outgoing) {
            if reachable.insert(next) {
                queue.push_back(next);
            }
        }
    }

    let loader_reachable = reachable
        .iter()
        .any(|&i| arena.kind_of(i) == ModuleKind::Loader);
    if !loader_reachable {
        return Err(GraphError::MissingLoader);
    }

    Ok(())
}

/// Run both validations and collect everything into one report.
pub fn validate(graph: &PipelineGraph) -> ValidationReport {
    let mut report = ValidationReport::default();

    match validate_structure(graph) {
        Ok(()) => {
            // Reachability only means something on a structurally sound graph.
            if let Err(e) = validate_executable(graph) {
                report.errors.push(e);
            }
        }
        Err(e) => report.errors.push(e),
    }
    report.warnings = orphan_warnings(graph);

    report
}

fn orphan_warnings(graph: &PipelineGraph) -> Vec<PlanWarning> {
    if graph.nodes.len() <= 1 {
        return Vec::new();
    }

    let mut connected: HashSet<&str> = HashSet::new();
    for edge in &graph.edges {
        connected.insert(edge.source.as_str());
        connected.insert(edge.target.as_str());
    }

    graph
        .nodes
        .iter()
        .filter(|n| !connected.contains(n.id.as_str()))
        .map(|n| PlanWarning::OrphanNode { id: n.id.clone() })
        .collect()
}

/// Arena of nodes indexed by id over a petgraph `DiGraph`
///
/// Node indices follow declaration order, which is what makes the planner's
/// output deterministic.
struct Arena<'a> {
    graph: DiGraph<&'a str, ()>,
    by_id: HashMap<&'a str, NodeIndex>,
    kinds: HashMap<NodeIndex, ModuleKind>,
}

impl<'a> Arena<'a> {
    fn build(source: &'a PipelineGraph) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut by_id = HashMap::new();
        let mut kinds = HashMap::new();

        for node in &source.nodes {
            let idx = graph.add_node(node.id.as_str());
            by_id.insert(node.id.as_str(), idx);
            kinds.insert(idx, node.kind);
        }
        for edge in &source.edges {
            let (Some(&s), Some(&t)) = (
                by_id.get(edge.source.as_str()),
                by_id.get(edge.target.as_str()),
            ) else {
                let missing = if by_id.contains_key(edge.source.as_str()) {
                    edge.target.clone()
                } else {
                    edge.source.clone()
                };
                return Err(GraphError::UnknownNode(missing));
            };
            graph.add_edge(s, t, ());
        }

        Ok(Self {
            graph,
            by_id,
            kinds,
        })
    }

    fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.by_id.get(id).copied()
    }

    fn id_of(&self, idx: NodeIndex) -> &'a str {
        self.graph[idx]
    }

    fn kind_of(&self, idx: NodeIndex) -> ModuleKind {
        self.kinds[&idx]
    }

    fn loaders(&self) -> Vec<NodeIndex> {
        let mut loaders: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&i| self.kind_of(i) == ModuleKind::Loader)
            .collect();
        loaders.sort();
        loaders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::{GraphEdge, GraphNode};

    fn node(id: &str, kind: ModuleKind) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            kind,
            module: format!("{id}-module"),
            config: serde_json::Value::Null,
        }
    }

    fn edge(source: &str, target: &str) -> GraphEdge {
        GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    fn linear_graph() -> PipelineGraph {
        PipelineGraph {
            nodes: vec![
                node("a", ModuleKind::Extractor),
                node("b", ModuleKind::Transformer),
                node("c", ModuleKind::Loader),
            ],
            edges: vec![edge("a", "b"), edge("b", "c")],
        }
    }

    #[test]
    fn test_linear_order() {
        let plan = plan(&linear_graph(), None).unwrap();
        assert_eq!(plan.order, vec!["a", "b", "c"]);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        // Diamond: a -> b -> d, a -> c -> d, plus loader e off d.
        let graph = PipelineGraph {
            nodes: vec![
                node("a", ModuleKind::Extractor),
                node("b", ModuleKind::Transformer),
                node("c", ModuleKind::Transformer),
                node("d", ModuleKind::Transformer),
                node("e", ModuleKind::Loader),
            ],
            edges: vec![
                edge("a", "b"),
                edge("a", "c"),
                edge("b", "d"),
                edge("c", "d"),
                edge("d", "e"),
            ],
        };

        let plan = plan(&graph, None).unwrap();
        let pos = |id: &str| plan.order.iter().position(|n| n == id).unwrap();
        for (source, target) in [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d"), ("d", "e")] {
            assert!(pos(source) < pos(target), "{source} must precede {target}");
        }
        // Every node exactly once.
        assert_eq!(plan.order.len(), 5);
    }

    #[test]
    fn test_order_is_deterministic() {
        let graph = linear_graph();
        let first = plan(&graph, None).unwrap();
        for _ in 0..10 {
            assert_eq!(plan(&graph, None).unwrap(), first);
        }
    }

    #[test]
    fn test_target_limits_scope() {
        let plan = plan(&linear_graph(), Some("b")).unwrap();
        assert_eq!(plan.order, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_target() {
        let err = plan(&linear_graph(), Some("zz")).unwrap_err();
        assert_eq!(err, GraphError::UnreachableTarget("zz".to_string()));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut graph = linear_graph();
        graph.edges.push(edge("c", "a"));
        assert_eq!(plan(&graph, None).unwrap_err(), GraphError::Cycle);
    }

    #[test]
    fn test_cycle_never_yields_partial_order() {
        // Cycle off to the side of an otherwise plannable chain.
        let mut graph = linear_graph();
        graph.nodes.push(node("x", ModuleKind::Transformer));
        graph.nodes.push(node("y", ModuleKind::Transformer));
        graph.edges.push(edge("x", "y"));
        graph.edges.push(edge("y", "x"));
        assert_eq!(plan(&graph, None).unwrap_err(), GraphError::Cycle);
    }

    #[test]
    fn test_empty_graph() {
        let graph = PipelineGraph::default();
        assert_eq!(plan(&graph, None).unwrap_err(), GraphError::EmptyGraph);
    }

    #[test]
    fn test_self_edge() {
        let mut graph = linear_graph();
        graph.edges.push(edge("b", "b"));
        assert_eq!(
            plan(&graph, None).unwrap_err(),
            GraphError::SelfEdge("b".to_string())
        );
    }

    #[test]
    fn test_unknown_edge_endpoint() {
        let mut graph = linear_graph();
        graph.edges.push(edge("b", "ghost"));
        assert_eq!(
            plan(&graph, None).unwrap_err(),
            GraphError::UnknownNode("ghost".to_string())
        );
    }

    #[test]
    fn test_executable_checks() {
        assert!(validate_executable(&linear_graph()).is_ok());

        let no_extractor = PipelineGraph {
            nodes: vec![
                node("b", ModuleKind::Transformer),
                node("c", ModuleKind::Loader),
            ],
            edges: vec![edge("b", "c")],
        };
        assert_eq!(
            validate_executable(&no_extractor).unwrap_err(),
            GraphError::MissingExtractor
        );
    }

    #[test]
    fn test_disconnected_loader_is_missing_plus_orphan() {
        // a -> b with c dangling: the loader exists but is unreachable, and
        // it is also flagged as an orphan.
        let graph = PipelineGraph {
            nodes: vec![
                node("a", ModuleKind::Extractor),
                node("b", ModuleKind::Transformer),
                node("c", ModuleKind::Loader),
            ],
            edges: vec![edge("a", "b")],
        };

        let report = validate(&graph);
        assert_eq!(report.errors, vec![GraphError::MissingLoader]);
        assert_eq!(
            report.warnings,
            vec![PlanWarning::OrphanNode {
                id: "c".to_string()
            }]
        );
    }

    #[test]
    fn test_single_node_is_never_orphan() {
        let graph = PipelineGraph {
            nodes: vec![node("a", ModuleKind::Extractor)],
            edges: vec![],
        };
        assert!(orphan_warnings(&graph).is_empty());
    }

    #[test]
    fn test_validation_report_collects_everything() {
        let report = validate(&PipelineGraph::default());
        assert_eq!(report.errors, vec![GraphError::EmptyGraph]);
        assert!(!report.is_valid());
    }
}
