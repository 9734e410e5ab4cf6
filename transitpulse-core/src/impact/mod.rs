//! Incident impact process: matches reported incidents to transit edges and
//! keeps their current weights in line with the category policy table.

mod config;
mod engine;
mod incident;
mod policy;

pub use config::ImpactConfig;
pub use engine::{CycleReport, ImpactEngine, InfluenceRecord};
pub use incident::{InMemoryIncidentSource, IncidentRecord, IncidentSource};
pub use policy::{BLOCKING_MULTIPLIER, CategoryPolicy, Multiplier, PolicyTable};
