//! Shared, concurrently patched store of all mode graphs.
//!
//! Each mode sits behind its own `RwLock`. Mutations publish their change
//! event before the write lock is released, and subscriptions capture their
//! snapshot under read locks on every mode, so a subscriber sees exactly the
//! changes that happened after its snapshot.

mod events;
mod spatial;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use events::{EdgeChange, EventContext, GraphMessage, Subscription};

use self::events::Publisher;
use self::spatial::SpatialIndex;
use crate::loading::{FeedConfig, create_mode_graphs};
use crate::measure::{checked_point, travel_time_seconds};
use crate::model::{
    BIKE_MODE, EdgeRef, EdgeView, GraphSnapshot, ModeGraph, NetworkSnapshot, WALKING_MODE,
};
use crate::{Error, Weight};

/// Modes skipped by nearest-edge lookups unless a mode is requested explicitly
pub const DEFAULT_NEAREST_EXCLUDE: [&str; 2] = [WALKING_MODE, BIKE_MODE];

/// Requested change of an edge's current weight
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePatch {
    /// New current weight in seconds
    Weight(Weight),
    /// New speed in km/h; the weight is derived from the edge distance
    Speed(f64),
}

/// Result of a nearest-edge lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestEdge {
    pub edge: EdgeView,
    /// Great-circle distance to the closest point of the segment
    pub distance_km: f64,
}

struct ModeSlot {
    graph: RwLock<ModeGraph>,
    spatial: SpatialIndex,
}

impl ModeSlot {
    fn read(&self) -> RwLockReadGuard<'_, ModeGraph> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ModeGraph> {
        self.graph.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Store of every mode graph built at startup. The mode set is fixed.
pub struct GraphStore {
    slots: BTreeMap<String, ModeSlot>,
    publisher: Publisher,
}

impl GraphStore {
    /// # Errors
    ///
    /// Returns a configuration error if two graphs share a mode name
    pub fn from_graphs(graphs: impl IntoIterator<Item = ModeGraph>) -> Result<Self, Error> {
        let mut slots = BTreeMap::new();
        for graph in graphs {
            let mode = graph.mode().to_string();
            if slots.contains_key(&mode) {
                return Err(Error::Configuration(format!("duplicate mode '{mode}'")));
            }
            let spatial = SpatialIndex::build(&graph);
            slots.insert(
                mode,
                ModeSlot {
                    graph: RwLock::new(graph),
                    spatial,
                },
            );
        }
        info!("Graph store ready with {} modes", slots.len());
        Ok(Self {
            slots,
            publisher: Publisher::default(),
        })
    }

    /// Builds every mode graph from the feed and wraps them in a store
    ///
    /// # Errors
    ///
    /// Any loading error, see [`create_mode_graphs`]
    pub fn load(config: &FeedConfig) -> Result<Self, Error> {
        Self::from_graphs(create_mode_graphs(config)?)
    }

    /// Available modes in name order
    pub fn modes(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    pub fn contains_mode(&self, mode: &str) -> bool {
        self.slots.contains_key(mode)
    }

    fn slot(&self, mode: &str) -> Result<&ModeSlot, Error> {
        self.slots
            .get(mode)
            .ok_or_else(|| Error::NotFound(format!("transport graph for mode '{mode}' is not available")))
    }

    /// Runs `f` with shared access to one mode graph
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown mode
    pub fn read_mode<R>(&self, mode: &str, f: impl FnOnce(&ModeGraph) -> R) -> Result<R, Error> {
        let slot = self.slot(mode)?;
        let graph = slot.read();
        Ok(f(&graph))
    }

    fn resolve_modes(&self, modes: Option<&[String]>) -> Result<BTreeSet<String>, Error> {
        match modes {
            None => Ok(self.slots.keys().cloned().collect()),
            Some(modes) => modes
                .iter()
                .map(|mode| self.slot(mode).map(|_| mode.clone()))
                .collect(),
        }
    }

    fn read_all<'a>(&'a self, modes: &BTreeSet<String>) -> Vec<RwLockReadGuard<'a, ModeGraph>> {
        // Lock order follows mode name order everywhere
        self.slots
            .iter()
            .filter(|(mode, _)| modes.contains(*mode))
            .map(|(_, slot)| slot.read())
            .collect()
    }

    /// Consistent copy of the requested modes (all modes for `None`)
    ///
    /// # Errors
    ///
    /// `NotFound` if any requested mode is unknown
    pub fn snapshot(&self, modes: Option<&[String]>) -> Result<NetworkSnapshot, Error> {
        let modes = self.resolve_modes(modes)?;
        let guards = self.read_all(&modes);
        let sequence = self.publisher.current_sequence();
        Ok(capture(sequence, &guards))
    }

    /// Copy of a single mode graph
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown mode
    pub fn mode_snapshot(&self, mode: &str) -> Result<GraphSnapshot, Error> {
        self.read_mode(mode, GraphSnapshot::capture)
    }

    /// Subscribes to the requested modes. The first message is a snapshot,
    /// every later message an edge change with a higher sequence number.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown mode, `InvalidArgument` for a zero capacity
    pub fn subscribe(&self, modes: Option<&[String]>, capacity: usize) -> Result<Subscription, Error> {
        if capacity == 0 {
            return Err(Error::InvalidArgument(
                "subscription queue capacity must be at least 1".to_string(),
            ));
        }
        let filter = modes.map(|_| self.resolve_modes(modes)).transpose()?;
        let captured = self.resolve_modes(modes)?;
        let guards = self.read_all(&captured);
        Ok(self
            .publisher
            .register(filter, capacity, |sequence| capture(sequence, &guards)))
    }

    pub fn subscriber_count(&self) -> usize {
        self.publisher.subscriber_count()
    }

    /// Current state of one edge
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown mode or edge
    pub fn edge(&self, edge: &EdgeRef) -> Result<EdgeView, Error> {
        self.read_mode(&edge.mode, |graph| {
            graph
                .find_edge(&edge.source, &edge.target, Some(edge.key.as_str()))
                .map(|idx| EdgeView::capture(graph, idx))
        })?
    }

    /// Changes the current weight of one edge. Without a key the lowest key
    /// between the node pair is patched.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown mode or edge, `InvalidArgument` for a
    /// negative weight or a non-positive speed
    pub fn patch_edge(
        &self,
        mode: &str,
        source: &str,
        target: &str,
        key: Option<&str>,
        patch: EdgePatch,
    ) -> Result<EdgeChange, Error> {
        self.patch_edge_with_context(mode, source, target, key, patch, EventContext::new())
    }

    /// [`GraphStore::patch_edge`] with extra attributes attached to the change event
    ///
    /// # Errors
    ///
    /// See [`GraphStore::patch_edge`]
    pub fn patch_edge_with_context(
        &self,
        mode: &str,
        source: &str,
        target: &str,
        key: Option<&str>,
        patch: EdgePatch,
        mut context: EventContext,
    ) -> Result<EdgeChange, Error> {
        let slot = self.slot(mode)?;
        let mut graph = slot.write();
        let idx = graph.find_edge(source, target, key)?;

        let edge = graph.edge_mut(idx);
        match patch {
            EdgePatch::Weight(weight) => {
                if !(weight >= 0.0) || !weight.is_finite() {
                    return Err(Error::InvalidArgument(format!(
                        "edge weight must be a non-negative number, got {weight}"
                    )));
                }
                edge.current_weight = weight;
            }
            EdgePatch::Speed(speed_kmh) => {
                edge.current_weight = travel_time_seconds(edge.distance_km, speed_kmh)?;
                edge.speed_kmh = Some(speed_kmh);
                context
                    .entry("speed_kmh")
                    .or_insert_with(|| Value::from(speed_kmh));
            }
        }
        debug!(
            "Patched {} to {:.1}s",
            graph.edge_ref(idx),
            graph.edge(idx).current_weight
        );

        // Published before the write lock is released
        let view = EdgeView::capture(&graph, idx);
        Ok(self.publisher.publish(view, context))
    }

    /// Sets the current weight of an exactly identified edge
    ///
    /// # Errors
    ///
    /// See [`GraphStore::patch_edge`]
    pub fn set_current_weight(
        &self,
        edge: &EdgeRef,
        weight: Weight,
        context: EventContext,
    ) -> Result<EdgeChange, Error> {
        self.patch_edge_with_context(
            &edge.mode,
            &edge.source,
            &edge.target,
            Some(edge.key.as_str()),
            EdgePatch::Weight(weight),
            context,
        )
    }

    /// Resets an edge to its default weight
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown mode or edge
    pub fn reset_edge(&self, edge: &EdgeRef, context: EventContext) -> Result<EdgeChange, Error> {
        let default = self.edge(edge)?.default_weight;
        self.set_current_weight(edge, default, context)
    }

    /// Nearest edge to a coordinate. With a mode only that mode is searched,
    /// otherwise every mode not listed in `exclude`. Ties go to the lowest
    /// edge identity.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for coordinates out of range, `NotFound` for an
    /// unknown mode or when no searched mode has any edge
    pub fn nearest_edge(
        &self,
        mode: Option<&str>,
        latitude: f64,
        longitude: f64,
        exclude: &[&str],
    ) -> Result<NearestEdge, Error> {
        let point = checked_point(latitude, longitude)?;
        let searched: Vec<&ModeSlot> = match mode {
            Some(mode) => vec![self.slot(mode)?],
            None => self
                .slots
                .iter()
                .filter(|(mode, _)| !exclude.contains(&mode.as_str()))
                .map(|(_, slot)| slot)
                .collect(),
        };

        let mut best: Option<(f64, EdgeRef, EdgeView)> = None;
        for slot in searched {
            if slot.spatial.is_empty() {
                continue;
            }
            let graph = slot.read();
            for (distance, idx) in slot.spatial.nearest(point) {
                let candidate = graph.edge_ref(idx);
                let better = best.as_ref().is_none_or(|(d, r, _)| {
                    distance.total_cmp(d).then_with(|| candidate.cmp(r)).is_lt()
                });
                if better {
                    best = Some((distance, candidate, EdgeView::capture(&graph, idx)));
                }
            }
        }

        best.map(|(distance_km, _, edge)| NearestEdge { edge, distance_km })
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no edge found near ({latitude}, {longitude})"
                ))
            })
    }

    /// Patches the nearest non-walking, non-bike edge to a coordinate
    ///
    /// # Errors
    ///
    /// See [`GraphStore::nearest_edge`] and [`GraphStore::patch_edge`]
    pub fn patch_nearest(
        &self,
        latitude: f64,
        longitude: f64,
        weight: Weight,
    ) -> Result<EdgeChange, Error> {
        let nearest = self.nearest_edge(None, latitude, longitude, &DEFAULT_NEAREST_EXCLUDE)?;
        let mut context = EventContext::new();
        context.insert(
            "distance_to_point_km".to_string(),
            Value::from(nearest.distance_km),
        );
        self.patch_edge_with_context(
            &nearest.edge.mode,
            &nearest.edge.source,
            &nearest.edge.target,
            Some(nearest.edge.key.as_str()),
            EdgePatch::Weight(weight),
            context,
        )
    }
}

fn capture(sequence: u64, guards: &[RwLockReadGuard<'_, ModeGraph>]) -> NetworkSnapshot {
    NetworkSnapshot {
        sequence,
        graphs: guards
            .iter()
            .map(|graph| (graph.mode().to_string(), GraphSnapshot::capture(graph)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::model::{Edge, Node};

    fn store() -> GraphStore {
        let mut bus = ModeGraph::new("bus");
        bus.add_node(Node::new("A", 50.0600, 19.9000));
        bus.add_node(Node::new("B", 50.0600, 19.9200));
        bus.add_edge("A", "B", Edge::new("t2", 120.0, 1.43)).unwrap();
        bus.add_edge("A", "B", Edge::new("t1", 100.0, 1.43)).unwrap();
        let mut walking = ModeGraph::new(WALKING_MODE);
        walking.add_node(Node::new("A", 50.0600, 19.9000));
        walking.add_node(Node::new("B", 50.0600, 19.9200));
        walking
            .add_edge("A", "B", Edge::new(WALKING_MODE, 1030.0, 1.43))
            .unwrap();
        GraphStore::from_graphs([bus, walking]).unwrap()
    }

    #[test]
    fn modes_are_listed_in_order() {
        assert_eq!(store().modes(), vec!["bus".to_string(), "walking".to_string()]);
    }

    #[test]
    fn duplicate_modes_are_rejected() {
        let result = GraphStore::from_graphs([ModeGraph::new("bus"), ModeGraph::new("bus")]);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn patch_without_key_uses_lowest_key() {
        let store = store();
        let change = store
            .patch_edge("bus", "A", "B", None, EdgePatch::Weight(300.0))
            .unwrap();
        assert_eq!(change.edge.key, "t1");
        assert_relative_eq!(change.edge.current_weight, 300.0);
        assert_relative_eq!(change.edge.default_weight, 100.0);
    }

    #[test]
    fn speed_patch_derives_weight_from_distance() {
        let store = store();
        let change = store
            .patch_edge("bus", "A", "B", Some("t2"), EdgePatch::Speed(10.0))
            .unwrap();
        assert_relative_eq!(change.edge.current_weight, 1.43 / 10.0 * 3600.0, epsilon = 1e-9);
        assert_eq!(change.edge.speed_kmh, Some(10.0));
    }

    #[test]
    fn invalid_patches_are_rejected_and_leave_the_edge_alone() {
        let store = store();
        let err = store
            .patch_edge("bus", "A", "B", Some("t1"), EdgePatch::Speed(0.0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = store
            .patch_edge("bus", "A", "B", Some("t1"), EdgePatch::Weight(-5.0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let edge = store.edge(&EdgeRef::new("bus", "A", "B", "t1")).unwrap();
        assert_relative_eq!(edge.current_weight, 100.0);
    }

    #[test]
    fn unknown_triples_are_not_found() {
        let store = store();
        for (mode, source, target, key) in [
            ("ferry", "A", "B", None),
            ("bus", "A", "Z", None),
            ("bus", "B", "A", None),
            ("bus", "A", "B", Some("t9")),
        ] {
            let err = store
                .patch_edge(mode, source, target, key, EdgePatch::Weight(1.0))
                .unwrap_err();
            assert!(matches!(err, Error::NotFound(_)), "{mode} {source} {target}");
        }
    }

    #[test]
    fn reset_restores_default_weight() {
        let store = store();
        let edge = EdgeRef::new("bus", "A", "B", "t1");
        store.set_current_weight(&edge, 500.0, EventContext::new()).unwrap();
        store.reset_edge(&edge, EventContext::new()).unwrap();
        store.reset_edge(&edge, EventContext::new()).unwrap();
        assert!(!store.edge(&edge).unwrap().is_impacted());
    }

    #[test]
    fn nearest_edge_skips_walking_by_default() {
        let store = store();
        let nearest = store
            .nearest_edge(None, 50.0600, 19.9100, &DEFAULT_NEAREST_EXCLUDE)
            .unwrap();
        assert_eq!(nearest.edge.mode, "bus");
        assert_eq!(nearest.edge.key, "t1");
        assert!(nearest.distance_km < 1e-6);

        let walking = store.nearest_edge(Some(WALKING_MODE), 50.0600, 19.9100, &[]).unwrap();
        assert_eq!(walking.edge.mode, WALKING_MODE);
    }

    #[test]
    fn nearest_edge_validates_input() {
        let store = store();
        assert!(matches!(
            store.nearest_edge(None, 95.0, 19.0, &DEFAULT_NEAREST_EXCLUDE),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            store.nearest_edge(None, 50.0, 19.0, &["bus", "walking"]),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn patch_nearest_reports_distance_in_context() {
        let store = store();
        let change = store.patch_nearest(50.0610, 19.9100, 400.0).unwrap();
        assert_eq!(change.edge.mode, "bus");
        let distance = change.context["distance_to_point_km"].as_f64().unwrap();
        assert_relative_eq!(distance, 0.111, epsilon = 0.005);
    }

    #[test]
    fn subscription_starts_with_current_state() {
        let store = store();
        store
            .patch_edge("bus", "A", "B", Some("t1"), EdgePatch::Weight(200.0))
            .unwrap();
        let mut subscription = store.subscribe(Some(&["bus".to_string()]), 4).unwrap();
        store
            .patch_edge("bus", "A", "B", Some("t2"), EdgePatch::Weight(250.0))
            .unwrap();

        let Some(GraphMessage::Snapshot(snapshot)) = subscription.try_recv() else {
            panic!("first message must be a snapshot");
        };
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.graphs.keys().collect::<Vec<_>>(), vec!["bus"]);
        let t1 = snapshot.graphs["bus"].find_edge("A", "B", "t1").unwrap();
        assert_relative_eq!(t1.current_weight, 200.0);

        let Some(GraphMessage::EdgeUpdated(change)) = subscription.try_recv() else {
            panic!("second message must be a change");
        };
        assert_eq!(change.sequence, 2);
        assert_eq!(change.edge.key, "t2");
    }

    #[test]
    fn subscribe_rejects_unknown_modes_and_zero_capacity() {
        let store = store();
        assert!(matches!(
            store.subscribe(Some(&["ferry".to_string()]), 4),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(store.subscribe(None, 0), Err(Error::InvalidArgument(_))));
    }
}
