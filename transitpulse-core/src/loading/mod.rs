//! This module is responsible for loading the static feed and auxiliary data
//! and building one graph per transport mode.

mod bike;
mod builder;
mod config;
pub mod gtfs;
mod transfers;
mod walking;

pub use bike::{BikeParking, load_bike_parkings};
pub use builder::create_mode_graphs;
pub use config::FeedConfig;
