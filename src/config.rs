//! Configuration types for bulk-export-client

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Client configuration for one export job.
///
/// Only `fhir_url` is required; everything else has sensible defaults.
///
/// ```
/// use bulk_export_client::ExportConfig;
///
/// let config = ExportConfig {
///     fhir_url: "https://bulk.example.com/fhir".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.kickoff_url(), "https://bulk.example.com/fhir/$export");
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Base URL of the server. The capability statement is fetched from
    /// `{fhir_url}/metadata`.
    pub fhir_url: String,

    /// Kickoff endpoint. Defaults to `{fhir_url}/$export`; set this for
    /// patient- or group-level exports (e.g., `.../Patient/$export`).
    #[serde(default)]
    pub export_url: Option<String>,

    /// Query parameters appended to the kickoff URL, in insertion order.
    /// The order is preserved verbatim in the emitted kickoff event.
    #[serde(default)]
    pub request_parameters: IndexMap<String, String>,

    /// Extra headers sent with every request (name, value)
    #[serde(default)]
    pub headers: Vec<(String, String)>,

    /// Bearer token added as an `authorization` header when set
    #[serde(default)]
    pub access_token: Option<String>,

    /// Number of files downloaded concurrently (default: 5)
    #[serde(default = "default_parallel_downloads")]
    pub parallel_downloads: usize,

    /// Overall budget for status polling before the export gives up
    /// (default: 300 seconds)
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: Duration,

    /// Poll delay used when the server sends no `retry-after` header
    /// (default: 5 seconds)
    #[serde(default = "default_poll_interval")]
    pub default_poll_interval: Duration,
}

fn default_parallel_downloads() -> usize {
    5
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            fhir_url: String::new(),
            export_url: None,
            request_parameters: IndexMap::new(),
            headers: Vec::new(),
            access_token: None,
            parallel_downloads: default_parallel_downloads(),
            poll_timeout: default_poll_timeout(),
            default_poll_interval: default_poll_interval(),
        }
    }
}

impl ExportConfig {
    /// The kickoff endpoint, explicit or derived from `fhir_url`
    pub fn kickoff_url(&self) -> String {
        match &self.export_url {
            Some(url) => url.clone(),
            None => format!("{}/$export", self.fhir_url.trim_end_matches('/')),
        }
    }

    /// The capability statement endpoint
    pub fn metadata_url(&self) -> String {
        format!("{}/metadata", self.fhir_url.trim_end_matches('/'))
    }

    /// Validate the configuration before an export starts
    pub fn validate(&self) -> Result<()> {
        if self.fhir_url.is_empty() {
            return Err(Error::Config {
                message: "fhir_url must not be empty".to_string(),
                key: Some("fhir_url".to_string()),
            });
        }
        if url::Url::parse(&self.fhir_url).is_err() {
            return Err(Error::Config {
                message: format!("fhir_url is not a valid URL: {}", self.fhir_url),
                key: Some("fhir_url".to_string()),
            });
        }
        if let Some(export_url) = &self.export_url
            && url::Url::parse(export_url).is_err()
        {
            return Err(Error::Config {
                message: format!("export_url is not a valid URL: {export_url}"),
                key: Some("export_url".to_string()),
            });
        }
        if self.parallel_downloads == 0 {
            return Err(Error::Config {
                message: "parallel_downloads must be at least 1".to_string(),
                key: Some("parallel_downloads".to_string()),
            });
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ExportConfig {
        ExportConfig {
            fhir_url: "http://bulk.example.com/fhir".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn kickoff_url_defaults_to_system_export() {
        assert_eq!(
            base_config().kickoff_url(),
            "http://bulk.example.com/fhir/$export"
        );
    }

    #[test]
    fn explicit_export_url_wins() {
        let config = ExportConfig {
            export_url: Some("http://bulk.example.com/fhir/Patient/$export".to_string()),
            ..base_config()
        };
        assert_eq!(
            config.kickoff_url(),
            "http://bulk.example.com/fhir/Patient/$export"
        );
    }

    #[test]
    fn metadata_url_strips_trailing_slash() {
        let config = ExportConfig {
            fhir_url: "http://bulk.example.com/fhir/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.metadata_url(), "http://bulk.example.com/fhir/metadata");
    }

    #[test]
    fn empty_fhir_url_is_rejected() {
        let err = ExportConfig::default().validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Config { key: Some(ref k), .. } if k == "fhir_url"
        ));
    }

    #[test]
    fn zero_parallel_downloads_is_rejected() {
        let config = ExportConfig {
            parallel_downloads: 0,
            ..base_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ExportConfig =
            serde_json::from_str(r#"{"fhir_url": "http://x/fhir"}"#).unwrap();
        assert_eq!(config.parallel_downloads, 5);
        assert_eq!(config.poll_timeout, Duration::from_secs(300));
        assert!(config.request_parameters.is_empty());
    }
}
