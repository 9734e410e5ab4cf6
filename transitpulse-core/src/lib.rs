//! Live multi-modal transport graph engine.
//!
//! Builds one weighted graph per transport mode from a GTFS feed, keeps the
//! current edge weights in line with reported incidents, plans routes under
//! nominal and current weights and streams snapshots and edge changes to
//! subscribers.

pub mod error;
pub mod impact;
pub mod loading;
pub mod measure;
pub mod model;
pub mod prelude;
pub mod routing;
pub mod store;

pub use error::{Error, ErrorKind, Result};
pub use impact::{ImpactConfig, ImpactEngine};
pub use loading::{FeedConfig, create_mode_graphs};
pub use model::{EdgeRef, ModeGraph};
pub use store::GraphStore;

/// Edge traversal cost in seconds
pub type Weight = f64;
