//! Serializable copies of graph state handed to observers

use std::collections::BTreeMap;

use petgraph::graph::EdgeIndex;
use serde::{Deserialize, Serialize};

use super::graph::{Connector, ModeGraph, Node, TripMetadata};
use crate::Weight;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub bike_accessible: bool,
}

impl From<&Node> for NodeView {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            latitude: node.latitude(),
            longitude: node.longitude(),
            bike_accessible: node.bike_accessible,
        }
    }
}

/// Full edge record as seen by callers, snapshots and change events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeView {
    pub mode: String,
    pub source: String,
    pub target: String,
    pub key: String,
    pub default_weight: Weight,
    pub current_weight: Weight,
    pub distance_km: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub speed_kmh: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub connector: Option<Connector>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<TripMetadata>,
}

impl EdgeView {
    pub(crate) fn capture(graph: &ModeGraph, idx: EdgeIndex) -> Self {
        let edge = graph.edge(idx);
        let (source, target) = graph.edge_endpoints(idx);
        Self {
            mode: graph.mode().to_string(),
            source: graph.node(source).id.clone(),
            target: graph.node(target).id.clone(),
            key: edge.key.clone(),
            default_weight: edge.default_weight,
            current_weight: edge.current_weight,
            distance_km: edge.distance_km,
            speed_kmh: edge.speed_kmh,
            connector: edge.connector.clone(),
            metadata: edge.metadata.clone(),
        }
    }

    #[allow(clippy::float_cmp)]
    pub fn is_impacted(&self) -> bool {
        self.current_weight != self.default_weight
    }
}

/// Copy of one mode graph taken under its read lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub mode: String,
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
}

impl GraphSnapshot {
    pub(crate) fn capture(graph: &ModeGraph) -> Self {
        Self {
            mode: graph.mode().to_string(),
            nodes: graph.nodes().map(NodeView::from).collect(),
            edges: graph
                .edge_indices()
                .map(|idx| EdgeView::capture(graph, idx))
                .collect(),
        }
    }

    pub fn find_edge(&self, source: &str, target: &str, key: &str) -> Option<&EdgeView> {
        self.edges
            .iter()
            .find(|e| e.source == source && e.target == target && e.key == key)
    }
}

/// Snapshot of several modes at one point of the change sequence.
///
/// Every change event with a sequence number above `sequence` happened after
/// the snapshot was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub sequence: u64,
    pub graphs: BTreeMap<String, GraphSnapshot>,
}
