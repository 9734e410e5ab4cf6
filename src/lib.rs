//! Async facade over the transport graph engine.
//!
//! [`TransportEngine`] answers queries against the shared graph store, runs the
//! periodic incident impact worker and hands out subscriptions whose messages
//! can be drained by a dedicated delivery task.

pub mod engine;
pub mod sources;
pub mod stream;
pub mod worker;

pub use engine::TransportEngine;
pub use sources::{HttpIncidentSource, JsonFileIncidentSource, parse_incident_payload};
pub use stream::{DeliveryEnd, deliver, spawn_delivery};
pub use worker::ImpactWorker;

pub use transitpulse_core::prelude;
pub use transitpulse_core::{Error, ErrorKind, Result};
