use std::time::Duration;

use serde::Deserialize;

use super::policy::PolicyTable;
use crate::Error;

/// Configuration of the incident impact process
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    /// Seconds between two cycles, at least 1
    pub poll_interval_secs: u64,
    /// A cycle running longer than this is abandoned and retried on the next tick
    pub cycle_timeout_secs: u64,
    /// Incidents older than this are ignored; no expiry when absent
    pub max_incident_age_secs: Option<u64>,
    pub categories: PolicyTable,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            cycle_timeout_secs: 30,
            max_incident_age_secs: None,
            categories: PolicyTable::default(),
        }
    }
}

impl ImpactConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs.max(1))
    }

    pub fn max_incident_age(&self) -> Option<Duration> {
        self.max_incident_age_secs.map(Duration::from_secs)
    }

    /// # Errors
    ///
    /// Returns a configuration error for an invalid category table
    pub fn validate(&self) -> Result<(), Error> {
        self.categories.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_has_a_floor_of_one_second() {
        let config = ImpactConfig {
            poll_interval_secs: 0,
            ..ImpactConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(ImpactConfig::default().poll_interval(), Duration::from_secs(60));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: ImpactConfig = serde_json::from_str(r#"{"poll_interval_secs": 5}"#).unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.cycle_timeout_secs, 30);
        assert_eq!(config.categories, PolicyTable::default());
    }
}
