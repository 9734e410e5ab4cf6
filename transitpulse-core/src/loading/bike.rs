//! Bike parkings, bike accessibility of stops and the bike graph

use std::collections::BTreeSet;
use std::path::Path;

use geo::Point;
use geojson::GeoJson;
use log::{info, warn};
use rayon::prelude::*;
use serde::Deserialize;

use super::walking::{build_point_index, locate_within_radius, self_propelled_graph};
use crate::measure::checked_point;
use crate::model::{BIKE_MODE, ModeGraph, Node};
use crate::Error;

/// Location of a bike parking facility
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BikeParking {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub name: Option<String>,
}

impl BikeParking {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            name: None,
        }
    }

    fn point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

/// Reads bike parkings from a JSON list of `{latitude, longitude, name?}`
/// objects or a GeoJSON `FeatureCollection` of points.
///
/// A missing file yields no parkings.
///
/// # Errors
///
/// Returns a configuration error when the file exists but cannot be parsed.
pub fn load_bike_parkings(path: &Path) -> Result<Vec<BikeParking>, Error> {
    if !path.exists() {
        warn!(
            "Bike parking file '{}' not found, bike graph will be empty",
            path.display()
        );
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    let payload: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        Error::Configuration(format!(
            "bike parking file '{}' is not valid JSON: {e}",
            path.display()
        ))
    })?;

    let parkings = match payload {
        serde_json::Value::Array(_) => parse_parking_list(payload)?,
        serde_json::Value::Object(ref object) if object.contains_key("features") => {
            parse_feature_collection(payload)?
        }
        _ => {
            return Err(Error::Configuration(
                "unsupported bike parking file format, expected a list or a GeoJSON \
                 FeatureCollection"
                    .to_string(),
            ));
        }
    };

    for parking in &parkings {
        checked_point(parking.latitude, parking.longitude)
            .map_err(|e| Error::Configuration(format!("bike parking: {e}")))?;
    }
    info!("Loaded {} bike parkings from {}", parkings.len(), path.display());
    Ok(parkings)
}

fn parse_parking_list(payload: serde_json::Value) -> Result<Vec<BikeParking>, Error> {
    serde_json::from_value(payload)
        .map_err(|e| Error::Configuration(format!("invalid bike parking entry: {e}")))
}

fn parse_feature_collection(payload: serde_json::Value) -> Result<Vec<BikeParking>, Error> {
    let geojson = GeoJson::from_json_value(payload)
        .map_err(|e| Error::Configuration(format!("invalid bike parking GeoJSON: {e}")))?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(Error::Configuration(
            "bike parking GeoJSON must be a FeatureCollection".to_string(),
        ));
    };

    let mut parkings = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let Some(geojson::Value::Point(coordinates)) = feature.geometry.as_ref().map(|g| &g.value)
        else {
            warn!("Skipping bike parking feature without point geometry");
            continue;
        };
        let [longitude, latitude] = match coordinates.as_slice() {
            [lon, lat, ..] => [*lon, *lat],
            _ => continue,
        };
        let name = feature
            .property("name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        parkings.push(BikeParking {
            latitude,
            longitude,
            name,
        });
    }
    Ok(parkings)
}

/// Flags every stop within `radius_m` of a bike parking. Returns the number of
/// bike-accessible stops.
pub(crate) fn annotate_bike_access(stops: &mut [Node], parkings: &[BikeParking], radius_m: f64) -> usize {
    if parkings.is_empty() {
        stops.iter_mut().for_each(|s| s.bike_accessible = false);
        return 0;
    }
    let geometries: Vec<Point<f64>> = parkings.iter().map(BikeParking::point).collect();
    let index = build_point_index(geometries.iter());

    stops.par_iter_mut().for_each(|stop| {
        stop.bike_accessible = !locate_within_radius(&index, stop.geometry, radius_m).is_empty();
    });
    stops.iter().filter(|s| s.bike_accessible).count()
}

/// Bike graph over the bike-accessible stops, using the walking links
pub(crate) fn create_bike_graph(
    stops: &[Node],
    links: &BTreeSet<(usize, usize)>,
    bike_speed_kmh: f64,
) -> Result<ModeGraph, Error> {
    self_propelled_graph(BIKE_MODE, stops, |s| s.bike_accessible, links, bike_speed_kmh)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_plain_list() {
        let file = write_temp(r#"[{"latitude": 50.06, "longitude": 19.94, "name": "Rynek"},
                                  {"latitude": 50.07, "longitude": 19.95}]"#);
        let parkings = load_bike_parkings(file.path()).unwrap();
        assert_eq!(parkings.len(), 2);
        assert_eq!(parkings[0].name.as_deref(), Some("Rynek"));
        assert_eq!(parkings[1].name, None);
    }

    #[test]
    fn reads_feature_collection() {
        let file = write_temp(
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {"name": "Dworzec"},
                 "geometry": {"type": "Point", "coordinates": [19.94, 50.06]}},
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "LineString", "coordinates": [[19.9, 50.0], [19.8, 50.1]]}}
            ]}"#,
        );
        let parkings = load_bike_parkings(file.path()).unwrap();
        assert_eq!(parkings, vec![BikeParking {
            latitude: 50.06,
            longitude: 19.94,
            name: Some("Dworzec".to_string()),
        }]);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let parkings = load_bike_parkings(Path::new("/no/such/parkings.json")).unwrap();
        assert!(parkings.is_empty());
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let file = write_temp(r#"{"parkings": 3}"#);
        assert!(matches!(
            load_bike_parkings(file.path()),
            Err(Error::Configuration(_))
        ));
        let file = write_temp("not json");
        assert!(matches!(
            load_bike_parkings(file.path()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn stops_near_parkings_become_bike_accessible() {
        let mut stops = vec![
            Node::new("near", 50.0600, 19.9400),
            Node::new("far", 50.0700, 19.9400),
        ];
        // ~100 m east of "near"
        let parkings = vec![BikeParking::new(50.0600, 19.9414)];
        assert_eq!(annotate_bike_access(&mut stops, &parkings, 150.0), 1);
        assert!(stops[0].bike_accessible);
        assert!(!stops[1].bike_accessible);
    }

    #[test]
    fn bike_graph_only_contains_accessible_stops() {
        let mut stops = vec![
            Node::new("a", 50.0600, 19.9400),
            Node::new("b", 50.0610, 19.9400),
            Node::new("c", 50.0620, 19.9400),
        ];
        stops[0].bike_accessible = true;
        stops[1].bike_accessible = true;
        let links = BTreeSet::from([(0, 1), (1, 2)]);
        let graph = create_bike_graph(&stops, &links, 20.0).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);
        assert!(!graph.contains_node("c"));
    }

    #[test]
    fn no_parkings_means_empty_bike_graph() {
        let mut stops = vec![Node::new("a", 50.06, 19.94)];
        assert_eq!(annotate_bike_access(&mut stops, &[], 150.0), 0);
        let graph = create_bike_graph(&stops, &BTreeSet::new(), 20.0).unwrap();
        assert_eq!(graph.node_count(), 0);
    }
}
