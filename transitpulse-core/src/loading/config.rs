use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Deserialize;

/// Configuration of the feed loader
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// GTFS feed, either a `.zip` archive or an extracted directory
    pub feed_path: PathBuf,
    pub walking_speed_kmh: f64,
    pub bike_speed_kmh: f64,
    /// Stops within this distance of a bike parking are bike-accessible
    pub bike_access_radius_m: f64,
    /// Stops closer than this are linked in the walking graph
    pub walking_radius_m: f64,
    /// Cost of switching between a transit mode and walking at the same stop
    pub transfer_cost_s: f64,
    /// Optional JSON list or GeoJSON FeatureCollection of bike parkings
    pub bike_parkings_path: Option<PathBuf>,
    /// Keep only trips running on this date; all trips when absent
    pub service_date: Option<NaiveDate>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            feed_path: PathBuf::from("gtfs.zip"),
            walking_speed_kmh: 5.0,
            bike_speed_kmh: 20.0,
            bike_access_radius_m: 150.0,
            walking_radius_m: 400.0,
            transfer_cost_s: 60.0,
            bike_parkings_path: None,
            service_date: None,
        }
    }
}

impl FeedConfig {
    pub fn new(feed_path: impl Into<PathBuf>) -> Self {
        Self {
            feed_path: feed_path.into(),
            ..Self::default()
        }
    }
}
