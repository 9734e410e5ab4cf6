//! Shortest paths under default and current weights

pub mod dijkstra;
mod planner;

pub use dijkstra::{ShortestPath, WeightKind, shortest_path};
pub use planner::{PathEdge, PathResult, RoutePlan, plan, plan_in_graph};
