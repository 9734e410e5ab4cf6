use fixedbitset::FixedBitSet;
use log::debug;
use serde::{Deserialize, Serialize};

use super::dijkstra::{ShortestPath, WeightKind, shortest_path};
use crate::model::{EdgeView, ModeGraph};
use crate::store::GraphStore;
use crate::{Error, Weight};

/// Edge traversed by a path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEdge {
    #[serde(flatten)]
    pub edge: EdgeView,
    /// Current weight differs from the default weight
    pub impacted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathResult {
    pub nodes: Vec<String>,
    pub edges: Vec<PathEdge>,
    pub total_default_weight: Weight,
    pub total_current_weight: Weight,
}

impl PathResult {
    fn from_path(graph: &ModeGraph, path: &ShortestPath) -> Self {
        let edges: Vec<PathEdge> = path
            .edges
            .iter()
            .map(|&idx| {
                let edge = EdgeView::capture(graph, idx);
                PathEdge {
                    impacted: edge.is_impacted(),
                    edge,
                }
            })
            .collect();
        Self {
            nodes: path.nodes.iter().map(|&n| graph.node(n).id.clone()).collect(),
            total_default_weight: edges.iter().map(|e| e.edge.default_weight).sum(),
            total_current_weight: edges.iter().map(|e| e.edge.current_weight).sum(),
            edges,
        }
    }

    pub fn is_impacted(&self) -> bool {
        self.edges.iter().any(|e| e.impacted)
    }
}

/// Answer of a route query within one mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub mode: String,
    pub source: String,
    pub target: String,
    /// At least one edge of the nominal path is impacted
    pub incident_detected: bool,
    /// Shortest path under default weights
    pub default_path: PathResult,
    /// Shortest path under current weights
    pub current_path: PathResult,
    /// Shortest path under current weights avoiding every impacted edge of the mode
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub suggested_path: Option<PathResult>,
}

/// Plans a route between two nodes of one mode.
///
/// # Errors
///
/// `NotFound` for an unknown mode or node, `NoPathFound` when the target is
/// unreachable under default weights.
pub fn plan(store: &GraphStore, mode: &str, source: &str, target: &str) -> Result<RoutePlan, Error> {
    store.read_mode(mode, |graph| plan_in_graph(graph, source, target))?
}

/// [`plan`] over a graph the caller already holds
///
/// # Errors
///
/// See [`plan`]
pub fn plan_in_graph(graph: &ModeGraph, source: &str, target: &str) -> Result<RoutePlan, Error> {
    let start = graph.node_index(source)?;
    let end = graph.node_index(target)?;
    let no_path = || Error::NoPathFound {
        mode: graph.mode().to_string(),
        source_node: source.to_string(),
        target_node: target.to_string(),
    };

    let nominal = shortest_path(graph, start, end, WeightKind::Default, None).ok_or_else(no_path)?;
    let current = shortest_path(graph, start, end, WeightKind::Current, None).ok_or_else(no_path)?;

    let default_path = PathResult::from_path(graph, &nominal);
    let current_path = PathResult::from_path(graph, &current);
    let incident_detected = default_path.is_impacted();

    let suggested_path = if incident_detected {
        let mut impacted = FixedBitSet::with_capacity(graph.edge_count());
        for idx in graph.edge_indices() {
            if graph.edge(idx).is_impacted() {
                impacted.insert(idx.index());
            }
        }
        let alternate = shortest_path(graph, start, end, WeightKind::Current, Some(&impacted));
        if alternate.is_none() {
            debug!(
                "No alternate path from '{source}' to '{target}' in {} avoids {} impacted edges",
                graph.mode(),
                impacted.count_ones(..)
            );
        }
        alternate.map(|path| PathResult::from_path(graph, &path))
    } else {
        None
    };

    Ok(RoutePlan {
        mode: graph.mode().to_string(),
        source: source.to_string(),
        target: target.to_string(),
        incident_detected,
        default_path,
        current_path,
        suggested_path,
    })
}
