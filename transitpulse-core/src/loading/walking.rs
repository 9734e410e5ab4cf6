//! Walking graph construction and the helpers it shares with the bike graph

use std::collections::{BTreeMap, BTreeSet};

use geo::Point;
use hashbrown::HashMap;
use log::{debug, info};
use petgraph::graph::NodeIndex;
use petgraph::unionfind::UnionFind;
use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree};

use crate::measure::{haversine_km, travel_time_seconds};
use crate::model::{Connector, Edge, ModeGraph, Node, WALKING_MODE};
use crate::Error;

/// Points in lon/lat space tagged with their position in the source slice
pub(crate) type PointIndex = RTree<GeomWithData<[f64; 2], usize>>;

const METERS_PER_DEGREE: f64 = 111_320.0;
const BRIDGE_KEY: &str = "bridge";

pub(crate) fn build_point_index<'a>(points: impl Iterator<Item = &'a Point<f64>>) -> PointIndex {
    RTree::bulk_load(
        points
            .enumerate()
            .map(|(i, p)| GeomWithData::new([p.x(), p.y()], i))
            .collect(),
    )
}

/// Positions of indexed points within `radius_m` metres of `center` (great-circle)
pub(crate) fn locate_within_radius(index: &PointIndex, center: Point<f64>, radius_m: f64) -> Vec<usize> {
    let lat_span = radius_m / METERS_PER_DEGREE;
    let lon_span = lat_span / center.y().to_radians().cos().max(0.01);
    let envelope = AABB::from_corners(
        [center.x() - lon_span, center.y() - lat_span],
        [center.x() + lon_span, center.y() + lat_span],
    );
    index
        .locate_in_envelope_intersecting(&envelope)
        .filter(|entry| {
            let [lon, lat] = *entry.geom();
            haversine_km(center, Point::new(lon, lat)) * 1000.0 <= radius_m
        })
        .map(|entry| entry.data)
        .collect()
}

/// Unordered stop pairs `(i, j)` with `i < j` that are linked on foot: close
/// enough to each other or consecutive on any transit trip.
pub(crate) fn stop_links(
    stops: &[Node],
    transit: &BTreeMap<String, ModeGraph>,
    radius_m: f64,
) -> BTreeSet<(usize, usize)> {
    let position: HashMap<&str, usize> = stops
        .iter()
        .enumerate()
        .map(|(i, stop)| (stop.id.as_str(), i))
        .collect();
    let index = build_point_index(stops.iter().map(|s| &s.geometry));

    let mut links = BTreeSet::new();
    for (i, stop) in stops.iter().enumerate() {
        for j in locate_within_radius(&index, stop.geometry, radius_m) {
            if i < j {
                links.insert((i, j));
            }
        }
    }
    let by_radius = links.len();

    for graph in transit.values() {
        for idx in graph.edge_indices() {
            if graph.edge(idx).connector.is_some() {
                continue;
            }
            let (source, target) = graph.edge_endpoints(idx);
            let (Some(&a), Some(&b)) = (
                position.get(graph.node(source).id.as_str()),
                position.get(graph.node(target).id.as_str()),
            ) else {
                continue;
            };
            if a != b {
                links.insert((a.min(b), a.max(b)));
            }
        }
    }
    debug!(
        "Found {} walking links ({} by radius, {} from transit adjacency)",
        links.len(),
        by_radius,
        links.len() - by_radius
    );
    links
}

/// Builds a self-propelled graph over the stops accepted by `include`, linking
/// every pair in `links` in both directions at `speed_kmh`, and bridges the
/// result until it is weakly connected.
pub(crate) fn self_propelled_graph(
    mode: &str,
    stops: &[Node],
    include: impl Fn(&Node) -> bool,
    links: &BTreeSet<(usize, usize)>,
    speed_kmh: f64,
) -> Result<ModeGraph, Error> {
    let mut graph = ModeGraph::new(mode);
    for stop in stops.iter().filter(|s| include(s)) {
        graph.add_node(stop.clone());
    }

    for &(a, b) in links {
        let (from, to) = (&stops[a], &stops[b]);
        if !graph.contains_node(&from.id) || !graph.contains_node(&to.id) {
            continue;
        }
        let distance_km = haversine_km(from.geometry, to.geometry);
        // Co-located stops get no zero-cost link
        if distance_km <= 0.0 {
            continue;
        }
        let weight = travel_time_seconds(distance_km, speed_kmh)?;
        for (s, t) in [(from, to), (to, from)] {
            let edge = Edge::new(mode, weight, distance_km).with_speed(speed_kmh);
            graph.add_edge(&s.id, &t.id, edge)?;
        }
    }

    let bridges = bridge_components(&mut graph, speed_kmh)?;
    info!(
        "Built {mode} graph with {} nodes, {} edges ({bridges} bridge links)",
        graph.node_count(),
        graph.edge_count()
    );
    Ok(graph)
}

/// Links weakly connected components to their nearest outside node until a
/// single component remains. Returns the number of node pairs bridged.
fn bridge_components(graph: &mut ModeGraph, speed_kmh: f64) -> Result<usize, Error> {
    let count = graph.node_count();
    if count < 2 {
        return Ok(0);
    }
    let mut components = UnionFind::<usize>::new(count);
    for idx in graph.edge_indices() {
        let (s, t) = graph.edge_endpoints(idx);
        components.union(s.index(), t.index());
    }

    let geometries: Vec<Point<f64>> = graph.nodes().map(|n| n.geometry).collect();
    let index = build_point_index(geometries.iter());
    let mut bridged = 0usize;

    loop {
        let labels = components.clone().into_labeling();
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (node, label) in labels.iter().enumerate() {
            groups.entry(*label).or_default().push(node);
        }
        if groups.len() <= 1 {
            break;
        }

        // Every component except the largest reaches out to its nearest neighbour
        let largest = groups
            .values()
            .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| b[0].cmp(&a[0])))
            .map(|members| members[0])
            .unwrap_or_default();
        let mut links = Vec::new();
        for members in groups.values().filter(|m| m[0] != largest) {
            let label = labels[members[0]];
            let nearest = members
                .iter()
                .filter_map(|&member| {
                    let [lon, lat] = [geometries[member].x(), geometries[member].y()];
                    index
                        .nearest_neighbor_iter(&[lon, lat])
                        .find(|entry| labels[entry.data] != label)
                        .map(|entry| {
                            let distance = haversine_km(geometries[member], geometries[entry.data]);
                            (distance, member, entry.data)
                        })
                })
                .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            if let Some(link) = nearest {
                links.push(link);
            }
        }

        for (distance_km, a, b) in links {
            if components.equiv(a, b) {
                continue;
            }
            components.union(a, b);
            let weight = travel_time_seconds(distance_km, speed_kmh)?;
            let source = graph.node(NodeIndex::new(a)).id.clone();
            let target = graph.node(NodeIndex::new(b)).id.clone();
            for (s, t) in [(&source, &target), (&target, &source)] {
                let edge = Edge::new(BRIDGE_KEY, weight, distance_km)
                    .with_speed(speed_kmh)
                    .with_connector(Connector::Bridge);
                graph.add_edge(s, t, edge)?;
            }
            bridged += 1;
        }
    }
    Ok(bridged)
}

/// Walking graph over every stop of the feed
pub(crate) fn create_walking_graph(
    stops: &[Node],
    links: &BTreeSet<(usize, usize)>,
    walking_speed_kmh: f64,
) -> Result<ModeGraph, Error> {
    self_propelled_graph(WALKING_MODE, stops, |_| true, links, walking_speed_kmh)
}
