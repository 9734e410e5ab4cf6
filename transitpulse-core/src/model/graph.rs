//! Per-mode graph components - nodes, edges and the multigraph holding them

use std::fmt;

use geo::Point;
use hashbrown::HashMap;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef as _;
use serde::{Deserialize, Serialize};

use crate::{Error, Weight};

/// Transport network node (a physical stop)
#[derive(Debug, Clone)]
pub struct Node {
    /// Feed stop id, shared by every mode serving the same stop
    pub id: String,
    /// Node coordinates (x = longitude, y = latitude)
    pub geometry: Point<f64>,
    /// Within the configured radius of a bike parking
    pub bike_accessible: bool,
}

impl Node {
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            id: id.into(),
            geometry: Point::new(longitude, latitude),
            bike_accessible: false,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.geometry.y()
    }

    pub fn longitude(&self) -> f64 {
        self.geometry.x()
    }
}

/// Marker for edges that do not come from the feed's own travel records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Connector {
    /// Transfer between two modes at the same physical stop
    Transfer { to_mode: String },
    /// Link injected to make a walking or bike graph weakly connected
    Bridge,
}

/// Trip attributes carried by scheduled transit edges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripMetadata {
    pub trip_id: String,
    pub route_id: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub route_short_name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub route_long_name: String,
}

/// Directed edge of a mode graph
#[derive(Debug, Clone)]
pub struct Edge {
    /// Distinguishes parallel edges between the same node pair
    pub key: String,
    /// Nominal traversal time in seconds
    pub default_weight: Weight,
    /// Traversal time after incident influence or manual patches
    pub current_weight: Weight,
    pub distance_km: f64,
    pub speed_kmh: Option<f64>,
    pub connector: Option<Connector>,
    pub metadata: Option<TripMetadata>,
}

impl Edge {
    pub fn new(key: impl Into<String>, weight: Weight, distance_km: f64) -> Self {
        Self {
            key: key.into(),
            default_weight: weight,
            current_weight: weight,
            distance_km,
            speed_kmh: None,
            connector: None,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_speed(mut self, speed_kmh: f64) -> Self {
        self.speed_kmh = Some(speed_kmh);
        self
    }

    #[must_use]
    pub fn with_connector(mut self, connector: Connector) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: TripMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[allow(clippy::float_cmp)]
    pub fn is_impacted(&self) -> bool {
        self.current_weight != self.default_weight
    }
}

/// Stable identity of an edge across the whole network
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeRef {
    pub mode: String,
    pub source: String,
    pub target: String,
    pub key: String,
}

impl EdgeRef {
    pub fn new(
        mode: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            mode: mode.into(),
            source: source.into(),
            target: target.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for EdgeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}[{}]",
            self.mode, self.source, self.target, self.key
        )
    }
}

/// Directed multigraph of a single transport mode
#[derive(Debug, Clone)]
pub struct ModeGraph {
    mode: String,
    pub(crate) graph: DiGraph<Node, Edge>,
    node_lookup: HashMap<String, NodeIndex>,
}

impl ModeGraph {
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            graph: DiGraph::new(),
            node_lookup: HashMap::new(),
        }
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Adds a node, or returns the index of the node already registered under the same id
    pub fn add_node(&mut self, node: Node) -> NodeIndex {
        if let Some(&idx) = self.node_lookup.get(&node.id) {
            return idx;
        }
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.node_lookup.insert(id, idx);
        idx
    }

    /// Adds an edge between two registered nodes.
    ///
    /// # Errors
    ///
    /// `NotFound` if an endpoint is unknown, `InvalidArgument` if the
    /// `(source, target, key)` triple already exists or the weight is negative.
    pub fn add_edge(&mut self, source: &str, target: &str, edge: Edge) -> Result<EdgeIndex, Error> {
        let source_idx = self.node_index(source)?;
        let target_idx = self.node_index(target)?;
        if !(edge.default_weight >= 0.0) {
            return Err(Error::InvalidArgument(format!(
                "edge {source}->{target}[{}] has negative weight {}",
                edge.key, edge.default_weight
            )));
        }
        if self
            .graph
            .edges_connecting(source_idx, target_idx)
            .any(|e| e.weight().key == edge.key)
        {
            return Err(Error::InvalidArgument(format!(
                "edge {source}->{target}[{}] already exists in mode '{}'",
                edge.key, self.mode
            )));
        }
        Ok(self.graph.add_edge(source_idx, target_idx, edge))
    }

    pub fn node_index(&self, id: &str) -> Result<NodeIndex, Error> {
        self.node_lookup.get(id).copied().ok_or_else(|| {
            Error::NotFound(format!("node '{id}' not present in mode '{}'", self.mode))
        })
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node_lookup.contains_key(id)
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.graph[idx]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.graph.node_weights_mut()
    }

    pub fn edge(&self, idx: EdgeIndex) -> &Edge {
        &self.graph[idx]
    }

    pub(crate) fn edge_mut(&mut self, idx: EdgeIndex) -> &mut Edge {
        &mut self.graph[idx]
    }

    pub fn edge_endpoints(&self, idx: EdgeIndex) -> (NodeIndex, NodeIndex) {
        // Edge indices handed out by this graph are always valid; edges are never removed.
        self.graph
            .edge_endpoints(idx)
            .unwrap_or((NodeIndex::end(), NodeIndex::end()))
    }

    /// Resolves an edge triple. Without a key the lowest key between the pair is used.
    pub fn find_edge(&self, source: &str, target: &str, key: Option<&str>) -> Result<EdgeIndex, Error> {
        let source_idx = self.node_index(source)?;
        let target_idx = self.node_index(target)?;
        let mut candidates = self.graph.edges_connecting(source_idx, target_idx).peekable();
        if candidates.peek().is_none() {
            return Err(Error::NotFound(format!(
                "edge {source}->{target} not found in mode '{}'",
                self.mode
            )));
        }
        match key {
            Some(key) => candidates
                .find(|e| e.weight().key == key)
                .map(|e| e.id())
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "edge key '{key}' does not exist for {source}->{target} in mode '{}'",
                        self.mode
                    ))
                }),
            None => candidates
                .min_by(|a, b| a.weight().key.cmp(&b.weight().key))
                .map(|e| e.id())
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "edge {source}->{target} not found in mode '{}'",
                        self.mode
                    ))
                }),
        }
    }

    pub fn edge_ref(&self, idx: EdgeIndex) -> EdgeRef {
        let (source, target) = self.edge_endpoints(idx);
        EdgeRef::new(
            self.mode.clone(),
            self.graph[source].id.clone(),
            self.graph[target].id.clone(),
            self.graph[idx].key.clone(),
        )
    }

    pub fn edge_indices(&self) -> impl Iterator<Item = EdgeIndex> {
        self.graph.edge_indices()
    }
}
