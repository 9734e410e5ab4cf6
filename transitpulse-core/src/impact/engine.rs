use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::ImpactConfig;
use super::incident::{IncidentRecord, IncidentSource};
use super::policy::PolicyTable;
use crate::measure::checked_point;
use crate::model::EdgeRef;
use crate::store::{DEFAULT_NEAREST_EXCLUDE, EventContext, GraphStore};
use crate::Error;

/// Aggregated influence of one category on one edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluenceRecord {
    pub category: String,
    pub edge: EdgeRef,
    /// Sum of the reporter scores of every incident in the bucket
    pub aggregated_score: f64,
    pub active: bool,
    pub incident_ids: Vec<String>,
}

/// Outcome counters of one impact cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub incidents_seen: usize,
    /// Unknown category or expired
    pub incidents_ignored: usize,
    /// Records that could not be matched to an edge
    pub incidents_failed: usize,
    pub active_buckets: usize,
    pub edges_patched: usize,
    pub edges_reset: usize,
    pub patch_failures: usize,
}

#[derive(Debug, Clone)]
struct CachedMatch {
    latitude: f64,
    longitude: f64,
    edge: EdgeRef,
}

#[derive(Debug, Default)]
struct Bucket {
    aggregated_score: f64,
    any_approved: bool,
    incident_ids: Vec<String>,
}

/// Category multipliers currently applied to an edge, in category order
type AppliedMultipliers = Vec<(String, f64)>;

#[derive(Debug, Default)]
struct EngineState {
    matches: HashMap<String, CachedMatch>,
    applied: BTreeMap<EdgeRef, AppliedMultipliers>,
    influences: Vec<InfluenceRecord>,
}

/// Turns the live incident set into edge weight changes.
///
/// Each cycle re-evaluates every live incident: incidents are matched to the
/// nearest transit edge, grouped into `(edge, category)` buckets and every
/// edge is set to its default weight times the product of the multipliers of
/// its active buckets. Edges are only patched when that set of multipliers
/// changes, so repeated cycles never compound.
pub struct ImpactEngine {
    store: Arc<GraphStore>,
    policy: PolicyTable,
    max_incident_age: Option<Duration>,
    state: Mutex<EngineState>,
}

impl ImpactEngine {
    /// # Errors
    ///
    /// Returns a configuration error for an invalid category table
    pub fn new(store: Arc<GraphStore>, config: &ImpactConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            store,
            policy: config.categories.clone(),
            max_incident_age: config.max_incident_age(),
            state: Mutex::new(EngineState::default()),
        })
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    fn state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetches the live incident set and runs one cycle over it.
    ///
    /// # Errors
    ///
    /// Returns the source error, typically `TransientSource`; the graph is
    /// left untouched in that case.
    pub fn run_source_cycle(&self, source: &dyn IncidentSource) -> Result<CycleReport, Error> {
        let incidents = source.fetch_incidents()?;
        Ok(self.run_cycle(&incidents, Utc::now()))
    }

    /// Runs one cycle over the given live incident set
    pub fn run_cycle(&self, incidents: &[IncidentRecord], now: DateTime<Utc>) -> CycleReport {
        let mut state = self.state();
        let mut report = CycleReport {
            incidents_seen: incidents.len(),
            ..CycleReport::default()
        };

        let mut buckets: BTreeMap<(EdgeRef, String), Bucket> = BTreeMap::new();
        let mut live_ids = BTreeSet::new();
        for incident in incidents {
            let Some(policy) = self.policy.get(&incident.category) else {
                debug!(
                    "Incident {} has category '{}' without policy, ignoring",
                    incident.id, incident.category
                );
                report.incidents_ignored += 1;
                continue;
            };
            if self.is_expired(incident, now) {
                report.incidents_ignored += 1;
                continue;
            }
            live_ids.insert(incident.id.clone());

            let edge = match self.match_incident(&mut state.matches, incident) {
                Ok(edge) => edge,
                Err(e) => {
                    warn!("Skipping incident {}: {e}", incident.id);
                    report.incidents_failed += 1;
                    continue;
                }
            };

            let bucket = buckets.entry((edge, incident.category.clone())).or_default();
            bucket.any_approved |= incident.approved;
            bucket.aggregated_score += score_of(incident);
            bucket.incident_ids.push(incident.id.clone());
            debug!(
                "Incident {} ({}, policy {}) matched",
                incident.id, incident.category, policy.multiplier
            );
        }
        state.matches.retain(|id, _| live_ids.contains(id));

        let (influences, targets) = self.evaluate_buckets(buckets);
        report.active_buckets = influences.iter().filter(|i| i.active).count();
        state.influences = influences;

        self.apply_targets(&mut state.applied, targets, &mut report);

        info!(
            "Impact cycle: {} incidents ({} ignored, {} failed), {} active buckets, \
             {} edges patched, {} reset",
            report.incidents_seen,
            report.incidents_ignored,
            report.incidents_failed,
            report.active_buckets,
            report.edges_patched,
            report.edges_reset
        );
        report
    }

    fn is_expired(&self, incident: &IncidentRecord, now: DateTime<Utc>) -> bool {
        match (self.max_incident_age, incident.created_at) {
            (Some(max_age), Some(created_at)) => (now - created_at)
                .to_std()
                .is_ok_and(|age| age > max_age),
            _ => false,
        }
    }

    /// Nearest non-walking, non-bike edge of an incident, reusing the previous
    /// match while the incident stays at the same coordinates
    #[allow(clippy::float_cmp)]
    fn match_incident(
        &self,
        matches: &mut HashMap<String, CachedMatch>,
        incident: &IncidentRecord,
    ) -> Result<EdgeRef, Error> {
        if let Some(cached) = matches.get(&incident.id).filter(|cached| {
            cached.latitude == incident.latitude && cached.longitude == incident.longitude
        }) {
            return Ok(cached.edge.clone());
        }

        checked_point(incident.latitude, incident.longitude)?;
        let nearest = self.store.nearest_edge(
            None,
            incident.latitude,
            incident.longitude,
            &DEFAULT_NEAREST_EXCLUDE,
        )?;
        let edge = EdgeRef::new(
            nearest.edge.mode,
            nearest.edge.source,
            nearest.edge.target,
            nearest.edge.key,
        );
        debug!(
            "Incident {} matched to {edge} at {:.3} km",
            incident.id, nearest.distance_km
        );
        matches.insert(
            incident.id.clone(),
            CachedMatch {
                latitude: incident.latitude,
                longitude: incident.longitude,
                edge: edge.clone(),
            },
        );
        Ok(edge)
    }

    /// Influence records of every bucket and the active multipliers per edge
    fn evaluate_buckets(
        &self,
        buckets: BTreeMap<(EdgeRef, String), Bucket>,
    ) -> (Vec<InfluenceRecord>, BTreeMap<EdgeRef, AppliedMultipliers>) {
        let mut influences = Vec::with_capacity(buckets.len());
        let mut targets: BTreeMap<EdgeRef, AppliedMultipliers> = BTreeMap::new();

        // Buckets iterate by edge, then category name
        for ((edge, category), bucket) in buckets {
            let Some(policy) = self.policy.get(&category) else {
                continue;
            };
            let active = policy.is_active(bucket.any_approved, bucket.aggregated_score);
            if active {
                targets
                    .entry(edge.clone())
                    .or_default()
                    .push((category.clone(), policy.multiplier.value()));
            }
            influences.push(InfluenceRecord {
                category,
                edge,
                aggregated_score: bucket.aggregated_score,
                active,
                incident_ids: bucket.incident_ids,
            });
        }
        (influences, targets)
    }

    fn apply_targets(
        &self,
        applied: &mut BTreeMap<EdgeRef, AppliedMultipliers>,
        targets: BTreeMap<EdgeRef, AppliedMultipliers>,
        report: &mut CycleReport,
    ) {
        // Edges no longer under any active influence go back to default
        let released: Vec<EdgeRef> = applied
            .keys()
            .filter(|edge| !targets.contains_key(*edge))
            .cloned()
            .collect();
        for edge in released {
            let mut context = EventContext::new();
            context.insert("multiplier".to_string(), Value::from(1.0));
            match self.store.reset_edge(&edge, context) {
                Ok(_) => {
                    applied.remove(&edge);
                    report.edges_reset += 1;
                }
                Err(e) => {
                    warn!("Failed to reset {edge}: {e}");
                    report.patch_failures += 1;
                }
            }
        }

        for (edge, multipliers) in targets {
            if applied.get(&edge) == Some(&multipliers) {
                continue;
            }
            match self.apply_multipliers(&edge, &multipliers) {
                Ok(()) => {
                    applied.insert(edge, multipliers);
                    report.edges_patched += 1;
                }
                Err(e) => {
                    warn!("Failed to apply incident influence to {edge}: {e}");
                    report.patch_failures += 1;
                }
            }
        }
    }

    fn apply_multipliers(&self, edge: &EdgeRef, multipliers: &AppliedMultipliers) -> Result<(), Error> {
        let default_weight = self.store.edge(edge)?.default_weight;
        let combined = multipliers.iter().fold(1.0, |acc, (_, m)| acc * m);
        let weight = multipliers
            .iter()
            .fold(default_weight, |weight, (_, m)| weight * m);

        let mut context = EventContext::new();
        context.insert("multiplier".to_string(), Value::from(combined));
        context.insert(
            "categories".to_string(),
            Value::from(
                multipliers
                    .iter()
                    .map(|(category, _)| category.clone())
                    .collect::<Vec<_>>(),
            ),
        );
        self.store.set_current_weight(edge, weight, context)?;
        Ok(())
    }

    /// Influence records of the last cycle, by edge then category
    pub fn influences(&self) -> Vec<InfluenceRecord> {
        self.state().influences.clone()
    }

    /// Edges currently carrying incident influence
    pub fn modified_edges(&self) -> Vec<EdgeRef> {
        self.state().applied.keys().cloned().collect()
    }
}

fn score_of(incident: &IncidentRecord) -> f64 {
    if incident.reporter_social_score.is_finite() {
        incident.reporter_social_score
    } else {
        warn!(
            "Incident {} has non-finite reporter score, counting it as 0",
            incident.id
        );
        0.0
    }
}
