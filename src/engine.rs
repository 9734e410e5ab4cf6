use std::sync::Arc;

use tracing::{info, instrument};
use transitpulse_core::prelude::*;

use crate::worker::ImpactWorker;

/// Live transport network
///
/// Owns the graph store shared by route planning, manual patches, the impact
/// worker and every subscription. Cloning is cheap and yields a handle to the
/// same store.
///
/// Example:
///
/// ```ignore
/// let engine = TransportEngine::load(FeedConfig::new("gtfs.zip")).await?;
/// let plan = engine.plan_route("bus", "S1", "S3").await?;
/// ```
#[derive(Clone)]
pub struct TransportEngine {
    store: Arc<GraphStore>,
}

impl TransportEngine {
    /// Builds every mode graph from the feed. Loading runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// `Configuration` when the feed or the parkings cannot be loaded
    pub async fn load(config: FeedConfig) -> Result<Self, Error> {
        let feed = config.feed_path.display().to_string();
        let store = tokio::task::spawn_blocking(move || GraphStore::load(&config))
            .await
            .map_err(|e| Error::Configuration(format!("feed loading task failed: {e}")))??;
        info!(%feed, modes = ?store.modes(), "Transport network loaded");
        Ok(Self::from_store(Arc::new(store)))
    }

    pub fn from_store(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn list_modes(&self) -> Vec<String> {
        self.store.modes()
    }

    /// Plans a route within one mode on the blocking pool
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown mode or node, `NoPathFound` when the target
    /// is unreachable
    #[instrument(skip(self), level = "debug")]
    pub async fn plan_route(&self, mode: &str, source: &str, target: &str) -> Result<RoutePlan, Error> {
        let store = Arc::clone(&self.store);
        let (mode, source, target) = (mode.to_string(), source.to_string(), target.to_string());
        match tokio::task::spawn_blocking(move || plan(&store, &mode, &source, &target)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(Error::InvalidArgument(format!("route planning task was cancelled: {e}"))),
        }
    }

    /// Consistent copy of the requested modes, all modes for `None`
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown mode
    pub fn snapshot(&self, modes: Option<&[String]>) -> Result<NetworkSnapshot, Error> {
        self.store.snapshot(modes)
    }

    /// # Errors
    ///
    /// See [`GraphStore::patch_edge`]
    pub fn patch_edge(
        &self,
        mode: &str,
        source: &str,
        target: &str,
        key: Option<&str>,
        patch: EdgePatch,
    ) -> Result<EdgeChange, Error> {
        let change = self.store.patch_edge(mode, source, target, key, patch)?;
        info!(
            sequence = change.sequence,
            mode,
            source,
            target,
            key = %change.edge.key,
            weight = change.edge.current_weight,
            "Edge patched"
        );
        Ok(change)
    }

    /// Nearest edge to a point. With a mode only that mode is searched,
    /// otherwise every mode but walking and bike.
    ///
    /// # Errors
    ///
    /// See [`GraphStore::nearest_edge`]
    pub fn nearest_edge(
        &self,
        latitude: f64,
        longitude: f64,
        mode: Option<&str>,
    ) -> Result<NearestEdge, Error> {
        self.store
            .nearest_edge(mode, latitude, longitude, &DEFAULT_NEAREST_EXCLUDE)
    }

    /// # Errors
    ///
    /// See [`GraphStore::patch_nearest`]
    pub fn patch_nearest(&self, latitude: f64, longitude: f64, weight: Weight) -> Result<EdgeChange, Error> {
        let change = self.store.patch_nearest(latitude, longitude, weight)?;
        info!(
            sequence = change.sequence,
            mode = %change.edge.mode,
            source = %change.edge.source,
            target = %change.edge.target,
            weight,
            "Nearest edge patched"
        );
        Ok(change)
    }

    /// Opens a subscription: a snapshot of the requested modes, then every
    /// later change of those modes
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown mode, `InvalidArgument` for a zero capacity
    pub fn subscribe(&self, modes: Option<&[String]>, capacity: usize) -> Result<Subscription, Error> {
        let subscription = self.store.subscribe(modes, capacity)?;
        info!(
            subscriber = subscription.id(),
            modes = ?modes,
            capacity,
            "Subscriber registered"
        );
        Ok(subscription)
    }

    /// Starts the periodic impact worker over `source`
    ///
    /// # Errors
    ///
    /// `Configuration` for an invalid category table
    pub fn start_impact_worker(
        &self,
        source: Arc<dyn IncidentSource>,
        config: &ImpactConfig,
    ) -> Result<ImpactWorker, Error> {
        let engine = ImpactEngine::new(Arc::clone(&self.store), config)?;
        Ok(ImpactWorker::spawn(
            Arc::new(engine),
            source,
            config.poll_interval(),
            config.cycle_timeout(),
        ))
    }
}
