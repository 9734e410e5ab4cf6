//! Incident source adapters: a JSON file and an HTTP endpoint

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use transitpulse_core::Error;
use transitpulse_core::impact::{IncidentRecord, IncidentSource};

/// Parses a payload that is either `{"incidents": [...]}` or a bare list.
/// Malformed records are logged and skipped.
///
/// # Errors
///
/// `TransientSource` when the payload has neither shape
pub fn parse_incident_payload(payload: Value, origin: &str) -> Result<Vec<IncidentRecord>, Error> {
    let records = match payload {
        Value::Array(records) => records,
        Value::Object(mut object) => match object.remove("incidents") {
            Some(Value::Array(records)) => records,
            _ => {
                return Err(Error::TransientSource(format!(
                    "{origin}: expected an `incidents` list"
                )));
            }
        },
        _ => {
            return Err(Error::TransientSource(format!(
                "{origin}: expected a list of incidents"
            )));
        }
    };

    let total = records.len();
    let incidents: Vec<IncidentRecord> = records
        .into_iter()
        .enumerate()
        .filter_map(|(position, record)| match serde_json::from_value(record) {
            Ok(incident) => Some(incident),
            Err(e) => {
                warn!(%origin, position, error = %e, "Skipping malformed incident");
                None
            }
        })
        .collect();
    debug!(%origin, parsed = incidents.len(), total, "Incidents fetched");
    Ok(incidents)
}

/// Reads the full incident set from a JSON file on every cycle
#[derive(Debug, Clone)]
pub struct JsonFileIncidentSource {
    path: PathBuf,
}

impl JsonFileIncidentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IncidentSource for JsonFileIncidentSource {
    fn fetch_incidents(&self) -> Result<Vec<IncidentRecord>, Error> {
        let origin = self.path.display().to_string();
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::TransientSource(format!("cannot read {origin}: {e}")))?;
        let payload: Value = serde_json::from_str(&content)
            .map_err(|e| Error::TransientSource(format!("{origin} is not valid JSON: {e}")))?;
        parse_incident_payload(payload, &origin)
    }
}

/// Polls `GET <url>` for the full incident set.
///
/// Requests run on the runtime captured at construction, so fetching has to
/// happen off the async executor, as the impact worker does.
#[derive(Debug, Clone)]
pub struct HttpIncidentSource {
    client: reqwest::Client,
    url: String,
    runtime: Handle,
}

impl HttpIncidentSource {
    /// Must be called from within a tokio runtime
    ///
    /// # Errors
    ///
    /// `Configuration` if the HTTP client cannot be built or no runtime is running
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Configuration(format!("HTTP incident source needs a runtime: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("transitpulse/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            runtime,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<Value, reqwest::Error> {
        self.client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await
    }
}

impl IncidentSource for HttpIncidentSource {
    fn fetch_incidents(&self) -> Result<Vec<IncidentRecord>, Error> {
        let payload = self
            .runtime
            .block_on(self.fetch())
            .map_err(|e| Error::TransientSource(format!("incident request to {} failed: {e}", self.url)))?;
        parse_incident_payload(payload, &self.url)
    }
}
