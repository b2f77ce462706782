//! Structural graph errors
//!
//! These fail validation before any dispatch happens. Everything here is a
//! contract violation in the user-authored graph, never a transient fault.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("pipeline graph has no nodes")]
    EmptyGraph,

    #[error("pipeline graph contains a cycle")]
    Cycle,

    #[error("edge references unknown node `{0}`")]
    UnknownNode(String),

    #[error("node `{0}` has an edge to itself")]
    SelfEdge(String),

    #[error("pipeline has no extractor node")]
    MissingExtractor,

    #[error("pipeline has no loader reachable from an extractor")]
    MissingLoader,

    #[error("target node `{0}` does not exist in the graph")]
    UnreachableTarget(String),
}
