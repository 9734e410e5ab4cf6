//! Processing raw GTFS data into per-mode transit graphs

mod parser;
mod processor;
mod raw_types;

pub use parser::{FeedSource, deserialize_gtfs_file, parse_time};
pub use processor::{TransitFeed, transit_graphs_from_gtfs};
pub use raw_types::{FeedInfo, FeedRoute, FeedStop, FeedStopTime, FeedTrip};
