//! Data model for the multimodal transport network
//!
//! Contains node and edge records, per-mode graphs and their serializable snapshots.

pub mod graph;
pub mod mode;
pub mod snapshot;

pub use graph::{Connector, Edge, EdgeRef, ModeGraph, Node, TripMetadata};
pub use mode::{BIKE_MODE, WALKING_MODE, mode_label_for_route_type};
pub use snapshot::{EdgeView, GraphSnapshot, NetworkSnapshot, NodeView};
