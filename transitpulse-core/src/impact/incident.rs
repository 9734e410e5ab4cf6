use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::Error;

/// Incident report as supplied by an incident source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub category: String,
    #[serde(default)]
    pub reporter_social_score: f64,
    #[serde(default)]
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl IncidentRecord {
    pub fn new(
        id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        category: impl Into<String>,
        reporter_social_score: f64,
    ) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            category: category.into(),
            reporter_social_score,
            approved: false,
            created_at: None,
        }
    }

    #[must_use]
    pub fn approved(mut self) -> Self {
        self.approved = true;
        self
    }

    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

/// Supplier of the live incident set.
///
/// Every call returns all incidents currently known; an incident missing from
/// a later result is treated as revoked.
pub trait IncidentSource: Send + Sync {
    /// # Errors
    ///
    /// `TransientSource` when the source is temporarily unavailable
    fn fetch_incidents(&self) -> Result<Vec<IncidentRecord>, Error>;
}

/// Incident source held in memory, fed by the embedding application
#[derive(Debug, Default)]
pub struct InMemoryIncidentSource {
    incidents: Mutex<BTreeMap<String, IncidentRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryIncidentSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn incidents(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, IncidentRecord>> {
        self.incidents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an incident or replaces the one with the same id
    pub fn upsert(&self, incident: IncidentRecord) {
        self.incidents().insert(incident.id.clone(), incident);
    }

    pub fn remove(&self, id: &str) -> Option<IncidentRecord> {
        self.incidents().remove(id)
    }

    /// Returns false if no incident has this id
    pub fn set_approved(&self, id: &str, approved: bool) -> bool {
        match self.incidents().get_mut(id) {
            Some(incident) => {
                incident.approved = approved;
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.incidents().clear();
    }

    pub fn len(&self) -> usize {
        self.incidents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents().is_empty()
    }

    /// Simulates an outage: fetches fail until availability is restored
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Release);
    }
}

impl IncidentSource for InMemoryIncidentSource {
    fn fetch_incidents(&self) -> Result<Vec<IncidentRecord>, Error> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(Error::TransientSource(
                "in-memory incident source is marked unavailable".to_string(),
            ));
        }
        Ok(self.incidents().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_and_defaults_are_accepted() {
        let record: IncidentRecord = serde_json::from_str(
            r#"{"id": 17, "latitude": 50.06, "longitude": 19.94, "category": "Traffic"}"#,
        )
        .unwrap();
        assert_eq!(record.id, "17");
        assert!(!record.approved);
        assert!(record.reporter_social_score.abs() < f64::EPSILON);
        assert!(record.created_at.is_none());
    }

    #[test]
    fn timestamps_are_parsed() {
        let record: IncidentRecord = serde_json::from_str(
            r#"{"id": "a", "latitude": 50.0, "longitude": 19.0, "category": "Crush",
                "approved": true, "created_at": "2024-05-01T08:30:00Z"}"#,
        )
        .unwrap();
        assert!(record.approved);
        assert_eq!(
            record.created_at.unwrap().to_rfc3339(),
            "2024-05-01T08:30:00+00:00"
        );
    }

    #[test]
    fn in_memory_source_tracks_updates() {
        let source = InMemoryIncidentSource::new();
        source.upsert(IncidentRecord::new("1", 50.0, 19.0, "Traffic", 20.0));
        source.upsert(IncidentRecord::new("2", 50.0, 19.0, "Traffic", 20.0));
        assert!(source.set_approved("1", true));
        assert!(!source.set_approved("404", true));
        source.remove("2");

        let incidents = source.fetch_incidents().unwrap();
        assert_eq!(incidents.len(), 1);
        assert!(incidents[0].approved);
    }

    #[test]
    fn outage_is_transient() {
        let source = InMemoryIncidentSource::new();
        source.set_available(false);
        let err = source.fetch_incidents().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::TransientSource);
        source.set_available(true);
        assert!(source.fetch_incidents().is_ok());
    }
}
