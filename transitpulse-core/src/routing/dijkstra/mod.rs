mod state;

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use fixedbitset::FixedBitSet;
use hashbrown::HashMap;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;

use self::state::State;
use crate::Weight;
use crate::model::{Edge, ModeGraph};

/// Which weight of an edge the search minimises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightKind {
    Default,
    Current,
}

impl WeightKind {
    pub fn of(self, edge: &Edge) -> Weight {
        match self {
            WeightKind::Default => edge.default_weight,
            WeightKind::Current => edge.current_weight,
        }
    }
}

/// Node and edge sequence of a shortest path
#[derive(Debug, Clone, PartialEq)]
pub struct ShortestPath {
    pub nodes: Vec<NodeIndex>,
    pub edges: Vec<EdgeIndex>,
    pub cost: Weight,
}

/// Dijkstra's algorithm between two nodes of a mode graph.
///
/// Edges whose index is set in `excluded` are skipped. Among equally cheap
/// ways to reach a node the edge with the lowest key wins, then the lowest
/// predecessor id. Returns `None` if `target` is unreachable.
pub fn shortest_path(
    graph: &ModeGraph,
    start: NodeIndex,
    target: NodeIndex,
    weight: WeightKind,
    excluded: Option<&FixedBitSet>,
) -> Option<ShortestPath> {
    let estimated_nodes = graph.node_count().min(1000);
    let mut distances: HashMap<NodeIndex, Weight> = HashMap::with_capacity(estimated_nodes);
    let mut predecessors: HashMap<NodeIndex, EdgeIndex> = HashMap::with_capacity(estimated_nodes);
    let mut heap = BinaryHeap::with_capacity(estimated_nodes / 4);
    let mut settled = FixedBitSet::with_capacity(graph.node_count());

    // Start node has distance 0
    heap.push(State {
        cost: 0.0,
        node: start,
    });
    distances.insert(start, 0.0);

    while let Some(State { cost, node }) = heap.pop() {
        // Stale heap entry
        if settled.put(node.index()) {
            continue;
        }
        if node == target {
            break;
        }

        for edge in graph.graph.edges(node) {
            let next = edge.target();
            if next == node
                || settled.contains(next.index())
                || excluded.is_some_and(|set| set.contains(edge.id().index()))
            {
                continue;
            }
            let next_cost = cost + weight.of(edge.weight());

            match distances.entry(next) {
                hashbrown::hash_map::Entry::Vacant(entry) => {
                    entry.insert(next_cost);
                    heap.push(State {
                        cost: next_cost,
                        node: next,
                    });
                    predecessors.insert(next, edge.id());
                }
                hashbrown::hash_map::Entry::Occupied(mut entry) => match next_cost.total_cmp(entry.get()) {
                    Ordering::Less => {
                        *entry.get_mut() = next_cost;
                        heap.push(State {
                            cost: next_cost,
                            node: next,
                        });
                        predecessors.insert(next, edge.id());
                    }
                    // Predecessors only ever point at settled nodes, so a tie
                    // can not close a cycle
                    Ordering::Equal => {
                        let incumbent = predecessors.get(&next).copied();
                        if incumbent.is_none_or(|current| prefer(graph, edge.id(), current)) {
                            predecessors.insert(next, edge.id());
                        }
                    }
                    _ => {}
                },
            }
        }
    }

    let cost = *distances.get(&target)?;

    // Follow predecessors backward from target to start
    let mut nodes = vec![target];
    let mut edges = Vec::new();
    let mut current = target;
    while current != start {
        if edges.len() >= graph.node_count() {
            return None;
        }
        let edge = *predecessors.get(&current)?;
        let (source, _) = graph.edge_endpoints(edge);
        edges.push(edge);
        nodes.push(source);
        current = source;
    }
    nodes.reverse();
    edges.reverse();

    Some(ShortestPath { nodes, edges, cost })
}

/// Tie-break between two equally cheap incoming edges
fn prefer(graph: &ModeGraph, candidate: EdgeIndex, incumbent: EdgeIndex) -> bool {
    let rank = |idx: EdgeIndex| {
        let (source, _) = graph.edge_endpoints(idx);
        (graph.edge(idx).key.as_str(), graph.node(source).id.as_str())
    };
    rank(candidate) < rank(incumbent)
}
