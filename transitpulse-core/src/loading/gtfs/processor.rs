use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Weekday};
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use log::{debug, info, warn};

use super::{
    parser::{FeedSource, deserialize_gtfs_file, deserialize_required_gtfs_file, parse_time},
    raw_types::{FeedCalendarDate, FeedInfo, FeedRoute, FeedService, FeedStop, FeedStopTime, FeedTrip},
};
use crate::loading::FeedConfig;
use crate::measure::{checked_point, haversine_km};
use crate::model::{Edge, ModeGraph, Node, TripMetadata, mode_label_for_route_type};
use crate::Error;

/// Transit part of the network: every stop plus one graph per route type
#[derive(Debug)]
pub struct TransitFeed {
    pub stops: Vec<Node>,
    pub graphs: BTreeMap<String, ModeGraph>,
    pub feed_info: Vec<FeedInfo>,
}

struct RawFeed {
    stops: Vec<FeedStop>,
    routes: Vec<FeedRoute>,
    trips: Vec<FeedTrip>,
    stop_times: Vec<FeedStopTime>,
    services: Vec<FeedService>,
    calendar_dates: Vec<FeedCalendarDate>,
    feed_info: Vec<FeedInfo>,
}

struct RouteInfo {
    mode: String,
    short_name: String,
    long_name: String,
}

/// Create per-mode transit graphs from a GTFS feed.
///
/// Every consecutive stop pair of a trip becomes one edge keyed by the trip id
/// and weighted by the scheduled arrival difference in seconds.
///
/// # Errors
///
/// Missing required files, malformed stop coordinates or stop sequences and
/// feeds without any usable segment are configuration errors.
pub fn transit_graphs_from_gtfs(config: &FeedConfig) -> Result<TransitFeed, Error> {
    let source = FeedSource::open(&config.feed_path)?;
    let mut raw = load_raw_feed(&source)?;

    if let Some(date) = config.service_date {
        filter_trips_by_service_date(
            date,
            &raw.services,
            &raw.calendar_dates,
            &mut raw.trips,
            &mut raw.stop_times,
        );
        info!("Restricted feed to {} trips running on {date}", raw.trips.len());
    }

    let stops = create_stops_vector(raw.stops)?;
    let stop_lookup: HashMap<&str, &Node> = stops.iter().map(|s| (s.id.as_str(), s)).collect();

    let routes: HashMap<&str, RouteInfo> = raw
        .routes
        .iter()
        .filter_map(|route| match route.route_type.parse::<u16>() {
            Ok(route_type) => Some((
                route.route_id.as_str(),
                RouteInfo {
                    mode: mode_label_for_route_type(route_type),
                    short_name: route.route_short_name.clone(),
                    long_name: route.route_long_name.clone(),
                },
            )),
            Err(e) => {
                warn!(
                    "Ignoring route '{}' with invalid route_type '{}': {e}",
                    route.route_id, route.route_type
                );
                None
            }
        })
        .collect();

    let trip_routes: HashMap<&str, &str> = raw
        .trips
        .iter()
        .map(|trip| (trip.trip_id.as_str(), trip.route_id.as_str()))
        .collect();

    // Map from trip_id to its stop times ordered by stop_sequence
    let mut trip_stop_times: HashMap<String, Vec<(u32, FeedStopTime)>> = HashMap::new();
    for stop_time in raw.stop_times {
        let sequence = stop_time.stop_sequence.parse::<u32>().map_err(|e| {
            Error::Configuration(format!(
                "invalid stop_sequence '{}' for trip '{}': {e}",
                stop_time.stop_sequence, stop_time.trip_id
            ))
        })?;
        trip_stop_times
            .entry(stop_time.trip_id.clone())
            .or_default()
            .push((sequence, stop_time));
    }

    let mut graphs: BTreeMap<String, ModeGraph> = BTreeMap::new();
    let mut unknown_stops = 0usize;
    let mut unknown_trips = 0usize;

    for trip_id in trip_stop_times.keys().sorted() {
        let Some(route) = trip_routes
            .get(trip_id.as_str())
            .and_then(|route_id| routes.get(route_id))
        else {
            unknown_trips += 1;
            continue;
        };
        let route_id = trip_routes[trip_id.as_str()];

        let mut stop_list = trip_stop_times[trip_id.as_str()].clone();
        stop_list.sort_by_key(|(sequence, _)| *sequence);

        let graph = graphs
            .entry(route.mode.clone())
            .or_insert_with(|| ModeGraph::new(route.mode.clone()));

        for ((_, from), (sequence, to)) in stop_list.iter().tuple_windows() {
            let (Some(from_stop), Some(to_stop)) = (
                stop_lookup.get(from.stop_id.as_str()),
                stop_lookup.get(to.stop_id.as_str()),
            ) else {
                unknown_stops += 1;
                continue;
            };
            let (Some(departure), Some(arrival)) =
                (parse_time(&from.arrival_time), parse_time(&to.arrival_time))
            else {
                continue;
            };
            if arrival <= departure || from_stop.id == to_stop.id {
                continue;
            }

            let duration = f64::from(arrival - departure);
            let distance_km = haversine_km(from_stop.geometry, to_stop.geometry);
            let mut edge = Edge::new(trip_id.clone(), duration, distance_km)
                .with_speed(distance_km / (duration / 3600.0))
                .with_metadata(TripMetadata {
                    trip_id: trip_id.clone(),
                    route_id: route_id.to_string(),
                    route_short_name: route.short_name.clone(),
                    route_long_name: route.long_name.clone(),
                });

            graph.add_node((*from_stop).clone());
            graph.add_node((*to_stop).clone());
            if graph.find_edge(&from_stop.id, &to_stop.id, Some(trip_id.as_str())).is_ok() {
                // Loop trips may serve the same stop pair twice
                edge.key = format!("{trip_id}#{sequence}");
            }
            graph.add_edge(&from_stop.id, &to_stop.id, edge)?;
        }
    }
    // Releases the borrow of `stops` before it moves into the feed
    drop(stop_lookup);

    if unknown_stops > 0 {
        warn!("Skipped {unknown_stops} segments referring to unknown stops");
    }
    if unknown_trips > 0 {
        debug!("Skipped {unknown_trips} trips without a known route");
    }

    graphs.retain(|mode, graph| {
        if graph.edge_count() == 0 {
            warn!("Mode '{mode}' has no usable segments and is dropped");
            false
        } else {
            true
        }
    });
    if graphs.is_empty() {
        return Err(Error::Configuration(
            "GTFS feed produced no transit segments".to_string(),
        ));
    }

    for graph in graphs.values() {
        info!(
            "Built {} graph with {} stops and {} segments",
            graph.mode(),
            graph.node_count(),
            graph.edge_count()
        );
    }

    Ok(TransitFeed {
        stops,
        graphs,
        feed_info: raw.feed_info,
    })
}

fn filter_trips_by_service_date(
    date: NaiveDate,
    services: &[FeedService],
    calendar_dates: &[FeedCalendarDate],
    trips: &mut Vec<FeedTrip>,
    stop_times: &mut Vec<FeedStopTime>,
) {
    let mut active_services: HashSet<&str> = services
        .iter()
        .filter(|service| {
            let runs_on_weekday = match date.weekday() {
                Weekday::Mon => service.monday == "1",
                Weekday::Tue => service.tuesday == "1",
                Weekday::Wed => service.wednesday == "1",
                Weekday::Thu => service.thursday == "1",
                Weekday::Fri => service.friday == "1",
                Weekday::Sat => service.saturday == "1",
                Weekday::Sun => service.sunday == "1",
            };
            let in_range = service.start_date.is_none_or(|start| start <= date)
                && service.end_date.is_none_or(|end| date <= end);
            runs_on_weekday && in_range
        })
        .map(|service| service.service_id.as_str())
        .collect();

    for exception in calendar_dates.iter().filter(|d| d.date == Some(date)) {
        match exception.exception_type.as_str() {
            "1" => {
                active_services.insert(exception.service_id.as_str());
            }
            "2" => {
                active_services.remove(exception.service_id.as_str());
            }
            other => debug!("Unknown calendar exception_type '{other}'"),
        }
    }

    // Filter trips and respective stop_times by the selected date
    trips.retain(|trip| active_services.contains(trip.service_id.as_str()));
    let active_trips = trips
        .iter()
        .map(|trip| trip.trip_id.as_str())
        .collect::<HashSet<&str>>();
    stop_times.retain(|stop_time| active_trips.contains(stop_time.trip_id.as_str()));
}

fn create_stops_vector(stops: Vec<FeedStop>) -> Result<Vec<Node>, Error> {
    let mut seen = HashSet::with_capacity(stops.len());
    let mut nodes = Vec::with_capacity(stops.len());
    for feed_stop in stops {
        if feed_stop.stop_id.is_empty() {
            continue;
        }
        if !seen.insert(feed_stop.stop_id.clone()) {
            warn!("Duplicate stop_id '{}' ignored", feed_stop.stop_id);
            continue;
        }
        let parse = |value: &str, field: &str| {
            value.parse::<f64>().map_err(|e| {
                Error::Configuration(format!(
                    "invalid {field} '{value}' for stop '{}': {e}",
                    feed_stop.stop_id
                ))
            })
        };
        let latitude = parse(&feed_stop.stop_lat, "stop_lat")?;
        let longitude = parse(&feed_stop.stop_lon, "stop_lon")?;
        checked_point(latitude, longitude).map_err(|e| {
            Error::Configuration(format!("stop '{}': {e}", feed_stop.stop_id))
        })?;
        nodes.push(Node::new(feed_stop.stop_id, latitude, longitude));
    }
    if nodes.is_empty() {
        return Err(Error::Configuration("GTFS feed contains no stops".to_string()));
    }
    Ok(nodes)
}

fn load_raw_feed(source: &FeedSource) -> Result<RawFeed, Error> {
    let stops = deserialize_required_gtfs_file(source, "stops.txt")?;
    let routes = deserialize_required_gtfs_file(source, "routes.txt")?;
    let trips = deserialize_required_gtfs_file(source, "trips.txt")?;
    let stop_times = deserialize_required_gtfs_file(source, "stop_times.txt")?;
    let services = deserialize_gtfs_file(source, "calendar.txt")?.unwrap_or_default();
    let calendar_dates = deserialize_gtfs_file(source, "calendar_dates.txt")?.unwrap_or_default();
    let feed_info = deserialize_gtfs_file(source, "feed_info.txt")?.unwrap_or_default();
    Ok(RawFeed {
        stops,
        routes,
        trips,
        stop_times,
        services,
        calendar_dates,
        feed_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(id: &str, weekdays: bool) -> FeedService {
        let flag = if weekdays { "1" } else { "0" };
        FeedService {
            service_id: id.to_string(),
            monday: flag.to_string(),
            tuesday: flag.to_string(),
            wednesday: flag.to_string(),
            thursday: flag.to_string(),
            friday: flag.to_string(),
            saturday: "0".to_string(),
            sunday: "0".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31),
        }
    }

    fn trip(id: &str, service_id: &str) -> FeedTrip {
        FeedTrip {
            route_id: "r".to_string(),
            service_id: service_id.to_string(),
            trip_id: id.to_string(),
            ..FeedTrip::default()
        }
    }

    fn stop_time(trip_id: &str) -> FeedStopTime {
        FeedStopTime {
            trip_id: trip_id.to_string(),
            ..FeedStopTime::default()
        }
    }

    #[test]
    fn service_date_filter_honours_weekdays_and_exceptions() {
        // 2024-03-06 is a Wednesday
        let date = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        let services = vec![service("weekday", true), service("weekend", false)];
        let exceptions = vec![
            FeedCalendarDate {
                service_id: "weekday".to_string(),
                date: Some(date),
                exception_type: "2".to_string(),
            },
            FeedCalendarDate {
                service_id: "special".to_string(),
                date: Some(date),
                exception_type: "1".to_string(),
            },
        ];
        let mut trips = vec![
            trip("t-weekday", "weekday"),
            trip("t-weekend", "weekend"),
            trip("t-special", "special"),
        ];
        let mut stop_times = vec![
            stop_time("t-weekday"),
            stop_time("t-weekend"),
            stop_time("t-special"),
        ];

        filter_trips_by_service_date(date, &services, &exceptions, &mut trips, &mut stop_times);

        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].trip_id, "t-special");
        assert_eq!(stop_times.len(), 1);
    }

    #[test]
    fn malformed_stop_coordinates_are_fatal() {
        let stops = vec![FeedStop {
            stop_id: "s1".to_string(),
            stop_lat: "north".to_string(),
            stop_lon: "19.9".to_string(),
            ..FeedStop::default()
        }];
        assert!(matches!(create_stops_vector(stops), Err(Error::Configuration(_))));
    }

    #[test]
    fn duplicate_stops_keep_the_first_record() {
        let stop = |lat: &str| FeedStop {
            stop_id: "s1".to_string(),
            stop_lat: lat.to_string(),
            stop_lon: "19.9".to_string(),
            ..FeedStop::default()
        };
        let nodes = create_stops_vector(vec![stop("50.0"), stop("51.0")]).unwrap();
        assert_eq!(nodes.len(), 1);
        assert!((nodes[0].latitude() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn feed_keeps_every_stop_alongside_the_graphs() {
        let config = FeedConfig::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/gtfs"));
        let feed = transit_graphs_from_gtfs(&config).unwrap();
        let ids: Vec<&str> = feed.stops.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2", "S3", "S4", "S5"]);
        assert_eq!(feed.graphs.keys().collect::<Vec<_>>(), vec!["bus", "tram"]);
        assert!(feed.graphs["tram"].contains_node("S5"));
    }
}
