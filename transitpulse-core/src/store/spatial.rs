use geo::Point;
use petgraph::graph::EdgeIndex;
use rstar::RTree;
use rstar::primitives::{GeomWithData, Line};

use crate::measure::segment_distance_km;
use crate::model::ModeGraph;

/// Minimum number of planar nearest candidates re-ranked by great-circle distance
const CANDIDATES: usize = 16;
/// Length of one degree of latitude
const KM_PER_DEGREE: f64 = 111.32;
/// Slack on the planar search radius for the spherical approximation
const REACH_MARGIN: f64 = 1.05;

type Segment = GeomWithData<Line<[f64; 2]>, EdgeIndex>;

/// Segment index of one mode graph in lon/lat space.
///
/// Stop coordinates never change after loading, so the index is built once.
/// Loop edges (transfer connectors) have no extent and are left out.
pub(crate) struct SpatialIndex {
    tree: RTree<Segment>,
}

impl SpatialIndex {
    pub(crate) fn build(graph: &ModeGraph) -> Self {
        let segments = graph
            .edge_indices()
            .filter_map(|idx| {
                let (source, target) = graph.edge_endpoints(idx);
                if source == target {
                    return None;
                }
                let from = graph.node(source).geometry;
                let to = graph.node(target).geometry;
                Some(GeomWithData::new(
                    Line::new([from.x(), from.y()], [to.x(), to.y()]),
                    idx,
                ))
            })
            .collect();
        Self {
            tree: RTree::bulk_load(segments),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Closest segments to `point` as `(distance_km, edge)`, nearest first.
    ///
    /// Segments come out of the tree in planar lon/lat order, which shrinks
    /// east-west distances by `cos(latitude)`. After the first `CANDIDATES`
    /// the scan goes on until no remaining segment can beat the best
    /// great-circle distance seen so far. Close to the poles this degrades
    /// to a scan of the whole tree.
    pub(crate) fn nearest(&self, point: Point<f64>) -> Vec<(f64, EdgeIndex)> {
        let mut candidates: Vec<(f64, EdgeIndex)> = Vec::with_capacity(CANDIDATES);
        let mut best_km = f64::INFINITY;
        for (segment, distance_2) in self
            .tree
            .nearest_neighbor_iter_with_distance_2(&[point.x(), point.y()])
        {
            if candidates.len() >= CANDIDATES && distance_2.sqrt() > planar_reach(point, best_km) {
                break;
            }
            let line = segment.geom();
            let distance = segment_distance_km(
                point,
                Point::new(line.from[0], line.from[1]),
                Point::new(line.to[0], line.to[1]),
            );
            best_km = best_km.min(distance);
            candidates.push((distance, segment.data));
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        candidates
    }
}

/// Planar radius in degrees beyond which no segment lies within `best_km`
/// of `point`
fn planar_reach(point: Point<f64>, best_km: f64) -> f64 {
    let latitude = (point.y().abs() + best_km / KM_PER_DEGREE).min(89.9);
    best_km / (KM_PER_DEGREE * latitude.to_radians().cos()) * REACH_MARGIN
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, Node};

    #[test]
    fn high_latitude_east_segment_beats_planar_closer_ones() {
        let mut graph = ModeGraph::new("bus");
        // East segment ~0.76 km away, 0.02 degrees in plane
        graph.add_node(Node::new("E1", 69.99, 20.02));
        graph.add_node(Node::new("E2", 70.01, 20.02));
        graph.add_edge("E1", "E2", Edge::new("east", 60.0, 2.2)).unwrap();
        // North segments ~1.3 km away, 0.012 to 0.014 degrees in plane
        for i in 0..20 {
            let latitude = 70.012 + f64::from(i) * 0.0001;
            let (west, east) = (format!("W{i}"), format!("X{i}"));
            graph.add_node(Node::new(west.as_str(), latitude, 19.99));
            graph.add_node(Node::new(east.as_str(), latitude, 20.01));
            graph.add_edge(&west, &east, Edge::new(format!("north{i}"), 60.0, 0.8)).unwrap();
        }

        let index = SpatialIndex::build(&graph);
        let nearest = index.nearest(Point::new(20.0, 70.0));
        let (distance, idx) = nearest[0];
        assert_eq!(graph.edge(idx).key, "east");
        assert!((distance - 0.76).abs() < 0.02, "{distance}");
        assert!(nearest.len() > CANDIDATES);
    }

    #[test]
    fn candidates_are_sorted_by_great_circle_distance() {
        let mut graph = ModeGraph::new("bus");
        for (id, lat, lon) in [("A", 50.0, 19.0), ("B", 50.0, 19.01), ("C", 50.01, 19.0)] {
            graph.add_node(Node::new(id, lat, lon));
        }
        graph.add_edge("A", "B", Edge::new("ab", 60.0, 0.7)).unwrap();
        graph.add_edge("A", "C", Edge::new("ac", 60.0, 1.1)).unwrap();
        graph.add_edge("C", "C", Edge::new("loop", 0.0, 0.0)).unwrap();

        let index = SpatialIndex::build(&graph);
        let nearest = index.nearest(Point::new(19.005, 50.0001));
        assert_eq!(nearest.len(), 2);
        assert_eq!(graph.edge(nearest[0].1).key, "ab");
        assert!(nearest[0].0 <= nearest[1].0);
    }
}
