use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use transitpulse::{HttpIncidentSource, JsonFileIncidentSource};
use transitpulse_core::impact::{ImpactConfig, IncidentSource};
use transitpulse_core::loading::FeedConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Engine(#[from] transitpulse_core::Error),
}

/// Daemon configuration read from a TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub feed: FeedConfig,
    #[serde(default)]
    pub impact: ImpactConfig,
    #[serde(default)]
    pub incidents: IncidentsConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Where incidents come from. Without a file or url no impact worker runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IncidentsConfig {
    pub file: Option<PathBuf>,
    pub url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for IncidentsConfig {
    fn default() -> Self {
        Self {
            file: None,
            url: None,
            request_timeout_secs: 10,
        }
    }
}

impl IncidentsConfig {
    /// # Errors
    ///
    /// `Engine` if the HTTP client cannot be created
    pub fn build_source(&self) -> Result<Option<Arc<dyn IncidentSource>>, ConfigError> {
        let source: Arc<dyn IncidentSource> = match (&self.file, &self.url) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "[incidents] takes either `file` or `url`, not both".to_string(),
                ));
            }
            (Some(path), None) => Arc::new(JsonFileIncidentSource::new(path)),
            (None, Some(url)) => Arc::new(HttpIncidentSource::new(
                url,
                Duration::from_secs(self.request_timeout_secs.max(1)),
            )?),
            (None, None) => return Ok(None),
        };
        Ok(Some(source))
    }
}

/// JSON-lines observer of the snapshot/delta stream
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub queue_capacity: usize,
    /// File to append messages to, `-` for stdout; no observer when absent
    pub events_path: Option<PathBuf>,
    /// Modes to observe, all when absent
    pub modes: Option<Vec<String>>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            events_path: None,
            modes: None,
        }
    }
}

impl ServerConfig {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// # Errors
    ///
    /// Returns an error describing the first invalid setting
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.impact.validate()?;
        if self.incidents.file.is_some() && self.incidents.url.is_some() {
            return Err(ConfigError::Invalid(
                "[incidents] takes either `file` or `url`, not both".to_string(),
            ));
        }
        if self.stream.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "[stream] queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use transitpulse_core::impact::{CategoryPolicy, Multiplier};

    use super::*;

    #[test]
    fn example_config_parses() {
        let config: ServerConfig = toml::from_str(include_str!("../config.example.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.feed.feed_path, PathBuf::from("data/gtfs.zip"));
        assert_eq!(config.impact.poll_interval_secs, 30);
        assert_eq!(
            config.impact.categories.get("Crush").map(|p| p.multiplier),
            Some(Multiplier::Blocking)
        );
        assert_eq!(
            config.impact.categories.get("Traffic"),
            Some(&CategoryPolicy::factor(1.5, 50.0))
        );
        assert_eq!(config.incidents.file, Some(PathBuf::from("data/incidents.json")));
        assert_eq!(config.stream.events_path, Some(PathBuf::from("-")));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config: ServerConfig = toml::from_str("[feed]\nfeed_path = \"feed\"\n").unwrap();
        assert!((config.feed.walking_speed_kmh - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.impact.poll_interval_secs, 60);
        assert!(config.incidents.build_source().unwrap().is_none());
        assert_eq!(config.stream.queue_capacity, 1024);
    }

    #[test]
    fn conflicting_sources_are_rejected() {
        let config: ServerConfig = toml::from_str(
            "[feed]\nfeed_path = \"feed\"\n[incidents]\nfile = \"a.json\"\nurl = \"http://localhost/incidents\"\n",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_category_is_rejected() {
        let config: ServerConfig = toml::from_str(
            "[feed]\nfeed_path = \"feed\"\n[impact.categories.Fog]\nmultiplier = -2.0\n",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Engine(_))));
    }

    #[test]
    fn reads_from_file_and_reports_missing_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"[feed]\nfeed_path = \"x\"\n").unwrap();
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.feed.feed_path, PathBuf::from("x"));
        assert!(matches!(
            ServerConfig::from_file(Path::new("/no/such/transitpulse.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
