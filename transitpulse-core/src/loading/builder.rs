use hashbrown::HashSet;
use log::info;

use super::bike::{annotate_bike_access, create_bike_graph, load_bike_parkings};
use super::config::FeedConfig;
use super::gtfs::transit_graphs_from_gtfs;
use super::transfers::add_transfer_connectors;
use super::walking::{create_walking_graph, stop_links};
use crate::Error;
use crate::model::ModeGraph;

/// Creates one graph per transport mode based on the provided configuration.
///
/// Transit modes come first in name order, followed by the walking and the
/// bike graph.
///
/// # Errors
///
/// Returns an error if there are problems reading or processing data
pub fn create_mode_graphs(config: &FeedConfig) -> Result<Vec<ModeGraph>, Error> {
    validate_config(config)?;

    info!(
        "Processing public transit data (GTFS): {}",
        config.feed_path.display()
    );
    let feed = transit_graphs_from_gtfs(config)?;
    for info in &feed.feed_info {
        info!(
            "Feed published by '{}' (version '{}', valid {:?} to {:?})",
            info.feed_publisher_name, info.feed_version, info.feed_start_date, info.feed_end_date
        );
    }

    let mut stops = feed.stops;
    let mut transit = feed.graphs;

    let parkings = match &config.bike_parkings_path {
        Some(path) => load_bike_parkings(path)?,
        None => Vec::new(),
    };
    let accessible = annotate_bike_access(&mut stops, &parkings, config.bike_access_radius_m);
    info!(
        "{accessible} of {} stops are within {} m of a bike parking",
        stops.len(),
        config.bike_access_radius_m
    );
    // Transit graphs hold their own copies of the stops
    let bike_stops: HashSet<&str> = stops
        .iter()
        .filter(|s| s.bike_accessible)
        .map(|s| s.id.as_str())
        .collect();
    for graph in transit.values_mut() {
        for node in graph.nodes_mut() {
            node.bike_accessible = bike_stops.contains(node.id.as_str());
        }
    }

    let links = stop_links(&stops, &transit, config.walking_radius_m);
    let mut walking = create_walking_graph(&stops, &links, config.walking_speed_kmh)?;
    let bike = create_bike_graph(&stops, &links, config.bike_speed_kmh)?;
    add_transfer_connectors(&mut transit, &mut walking, config.transfer_cost_s)?;

    let mut graphs: Vec<ModeGraph> = transit.into_values().collect();
    graphs.push(walking);
    graphs.push(bike);
    info!(
        "Transport network created with modes: {}",
        graphs.iter().map(ModeGraph::mode).collect::<Vec<_>>().join(", ")
    );

    // CSV deserialization allocates large amounts of short-lived memory
    // that is not always released back to the system. This call returns
    // free memory from the tail of the heap to the system.
    //
    // # Safety
    //
    // This call is safe to use on linux with glibc implementation
    // which is checked by the cfg attribute in compile time.
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    unsafe {
        if libc::malloc_trim(0) == 0 {
            log::debug!("No heap memory was returned to the system");
        } else {
            log::debug!("Successfully trimmed unused heap memory");
        }
    }
    Ok(graphs)
}

fn validate_config(config: &FeedConfig) -> Result<(), Error> {
    if !config.feed_path.exists() {
        return Err(Error::Configuration(format!(
            "GTFS feed not found: {}",
            config.feed_path.display()
        )));
    }
    for (name, speed) in [
        ("walking_speed_kmh", config.walking_speed_kmh),
        ("bike_speed_kmh", config.bike_speed_kmh),
    ] {
        if !(speed > 0.0) || !speed.is_finite() {
            return Err(Error::Configuration(format!(
                "{name} must be a positive number, got {speed}"
            )));
        }
    }
    for (name, value) in [
        ("bike_access_radius_m", config.bike_access_radius_m),
        ("walking_radius_m", config.walking_radius_m),
        ("transfer_cost_s", config.transfer_cost_s),
    ] {
        if !(value >= 0.0) || !value.is_finite() {
            return Err(Error::Configuration(format!(
                "{name} must be a non-negative number, got {value}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_speeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FeedConfig::new(dir.path());
        config.walking_speed_kmh = 0.0;
        assert!(matches!(validate_config(&config), Err(Error::Configuration(_))));
    }

    #[test]
    fn rejects_negative_transfer_cost() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FeedConfig::new(dir.path());
        config.transfer_cost_s = -1.0;
        assert!(matches!(validate_config(&config), Err(Error::Configuration(_))));
    }

    #[test]
    fn missing_feed_is_reported() {
        let config = FeedConfig::new("/no/such/feed.zip");
        assert!(matches!(validate_config(&config), Err(Error::Configuration(_))));
    }
}
