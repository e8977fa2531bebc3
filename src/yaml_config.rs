//! YAML test plan support.
//!
//! A test plan describes the endpoint, the load shape, the GraphQL document
//! and its variables, the fixture file, the thresholds and the report
//! settings. Every section is optional: the plan is the base layer of the
//! configuration and environment variables override it (see
//! [`crate::config::Config`]).
//!
//! ```yaml
//! version: "1.0"
//! metadata:
//!   name: customer lookup
//! endpoint:
//!   url: https://shop.example.com/graphql
//!   timeout: 10s
//! load:
//!   clients: 20
//!   duration: 5m
//!   pacing: 1s
//! request:
//!   queryFile: queries/customer.graphql
//!   variables:
//!     email: "${email}"
//! dataFile: fixtures/users.json
//! thresholds:
//!   checks: ["fail_rate<0.01"]
//!   http_req_duration: ["p(95)<800"]
//! ```

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration as StdDuration;
use thiserror::Error;

use crate::thresholds::Threshold;

/// Plan format versions this build understands.
pub const SUPPORTED_VERSIONS: &[&str] = &["1", "1.0"];

/// Errors that can occur when loading or parsing a YAML test plan.
#[derive(Error, Debug)]
pub enum YamlConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Duration format for YAML (e.g., "30s", "5m", or a bare number of seconds).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum YamlDuration {
    Seconds(u64),
    String(String),
}

impl YamlDuration {
    pub fn to_std_duration(&self) -> Result<StdDuration, YamlConfigError> {
        match self {
            YamlDuration::Seconds(s) => Ok(StdDuration::from_secs(*s)),
            YamlDuration::String(s) => crate::utils::parse_duration_string(s)
                .map_err(|e| YamlConfigError::Validation(format!("Invalid duration '{}': {}", s, e))),
        }
    }
}

/// Descriptive fields, logged with the configuration summary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct YamlMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Threshold expressions per metric, in the order the plan declares them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YamlThresholds(pub Vec<(String, Vec<String>)>);

impl<'de> Deserialize<'de> for YamlThresholds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = YamlThresholds;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of metric names to lists of threshold expressions")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((metric, exprs)) = map.next_entry::<String, Vec<String>>()? {
                    entries.push((metric, exprs));
                }
                Ok(YamlThresholds(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Where and how requests are sent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlEndpoint {
    pub url: Option<String>,
    pub timeout: Option<YamlDuration>,
    pub skip_tls_verify: Option<bool>,
    /// Same format as `CUSTOM_HEADERS`.
    pub custom_headers: Option<String>,
}

/// Shape of the load.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct YamlLoad {
    pub clients: Option<usize>,
    pub duration: Option<YamlDuration>,
    pub pacing: Option<YamlDuration>,
}

/// The GraphQL document and its variables template.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlRequest {
    pub query: Option<String>,
    pub query_file: Option<String>,
    pub variables: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlReport {
    pub html: Option<bool>,
    pub dir: Option<String>,
    pub error_sample_limit: Option<usize>,
}

/// Root of a YAML test plan.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlConfig {
    pub version: Option<String>,

    #[serde(default)]
    pub metadata: YamlMetadata,

    #[serde(default)]
    pub endpoint: YamlEndpoint,

    #[serde(default)]
    pub load: YamlLoad,

    #[serde(default)]
    pub request: YamlRequest,

    pub data_file: Option<String>,

    pub thresholds: Option<YamlThresholds>,

    #[serde(default)]
    pub report: YamlReport,
}

impl YamlConfig {
    /// Load a test plan from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, YamlConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a test plan from a YAML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, YamlConfigError> {
        let config: YamlConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed thresholds, or None when the plan declares none.
    pub fn parsed_thresholds(&self) -> Result<Option<Vec<Threshold>>, YamlConfigError> {
        let Some(thresholds) = &self.thresholds else {
            return Ok(None);
        };

        let mut parsed = Vec::new();
        for (metric, exprs) in &thresholds.0 {
            for expr in exprs {
                let threshold = Threshold::parse(metric, expr).map_err(|e| {
                    YamlConfigError::Validation(format!("thresholds.{}: {}", metric, e))
                })?;
                parsed.push(threshold);
            }
        }
        Ok(Some(parsed))
    }

    /// Collects every field-level problem into one error.
    fn validate(&self) -> Result<(), YamlConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if let Some(version) = &self.version {
            if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
                errors.push(format!(
                    "version: unsupported version '{}' (supported: {})",
                    version,
                    SUPPORTED_VERSIONS.join(", ")
                ));
            }
        }

        if let Some(url) = &self.endpoint.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                errors.push(format!(
                    "endpoint.url: must start with http:// or https://, got: {}",
                    url
                ));
            }
        }

        let durations = [
            ("endpoint.timeout", &self.endpoint.timeout),
            ("load.duration", &self.load.duration),
            ("load.pacing", &self.load.pacing),
        ];
        for (field, duration) in durations {
            if let Some(Err(e)) = duration.as_ref().map(YamlDuration::to_std_duration) {
                errors.push(format!("{}: {}", field, e));
            }
        }

        if self.load.clients == Some(0) {
            errors.push("load.clients: must be at least 1".to_string());
        }
        if self.report.error_sample_limit == Some(0) {
            errors.push("report.errorSampleLimit: must be at least 1".to_string());
        }
        if self.request.query.is_some() && self.request.query_file.is_some() {
            errors.push("request: set either query or queryFile, not both".to_string());
        }
        if let Err(e) = self.parsed_thresholds() {
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(YamlConfigError::Validation(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::Aggregation;

    #[test]
    fn parses_full_plan() {
        let yaml = r#"
version: "1.0"
metadata:
  name: customer lookup
  description: fixture-driven customer queries
endpoint:
  url: https://shop.example.com/graphql
  timeout: 10s
  skipTlsVerify: true
load:
  clients: 20
  duration: 5m
  pacing: 500ms
request:
  query: "query($email: String!) { customer(email: $email) { id } }"
  variables:
    email: "${email}"
    first: 5
dataFile: fixtures/users.json
thresholds:
  http_req_duration: ["p(95)<800", "avg<200"]
  checks: ["fail_rate<0.01"]
report:
  html: false
  dir: reports
"#;
        let config = YamlConfig::from_str(yaml).unwrap();
        assert_eq!(config.metadata.name.as_deref(), Some("customer lookup"));
        assert_eq!(config.load.clients, Some(20));
        assert_eq!(
            config.load.pacing.as_ref().unwrap().to_std_duration().unwrap(),
            StdDuration::from_millis(500)
        );
        assert_eq!(config.endpoint.skip_tls_verify, Some(true));
        assert_eq!(config.data_file.as_deref(), Some("fixtures/users.json"));

        let variables = config.request.variables.as_ref().unwrap();
        assert_eq!(variables["first"], Value::from(5));

        let thresholds = config.parsed_thresholds().unwrap().unwrap();
        assert_eq!(thresholds.len(), 3);
        assert_eq!(thresholds[0].aggregation, Aggregation::Percentile(95.0));
        assert_eq!(thresholds[1].aggregation, Aggregation::Avg);
        assert_eq!(thresholds[2].metric, "checks");
    }

    #[test]
    fn thresholds_keep_declaration_order() {
        let yaml = r#"
thresholds:
  no GraphQL errors: ["rate>0.99"]
  http_req_failed: ["rate<0.01"]
  checks: ["fail_rate<0.01"]
"#;
        let config = YamlConfig::from_str(yaml).unwrap();
        let metrics: Vec<String> = config
            .parsed_thresholds()
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|t| t.metric)
            .collect();
        assert_eq!(metrics, ["no GraphQL errors", "http_req_failed", "checks"]);
    }

    #[test]
    fn thresholds_must_be_a_map() {
        assert!(matches!(
            YamlConfig::from_str("thresholds: [\"checks:rate>0.9\"]"),
            Err(YamlConfigError::YamlParse(_))
        ));
    }

    #[test]
    fn empty_plan_is_valid() {
        let config = YamlConfig::from_str("{}").unwrap();
        assert!(config.endpoint.url.is_none());
        assert!(config.parsed_thresholds().unwrap().is_none());
    }

    #[test]
    fn numeric_durations_are_seconds() {
        let config = YamlConfig::from_str("load:\n  duration: 90\n").unwrap();
        assert_eq!(
            config.load.duration.unwrap().to_std_duration().unwrap(),
            StdDuration::from_secs(90)
        );
    }

    #[test]
    fn collects_all_validation_errors() {
        let yaml = r#"
version: "2.0"
endpoint:
  url: ftp://nope
load:
  clients: 0
  duration: forever
thresholds:
  checks: ["rate<<1"]
"#;
        let err = YamlConfig::from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("version"), "{}", err);
        assert!(err.contains("endpoint.url"), "{}", err);
        assert!(err.contains("load.clients"), "{}", err);
        assert!(err.contains("load.duration"), "{}", err);
        assert!(err.contains("thresholds.checks"), "{}", err);
    }

    #[test]
    fn rejects_query_and_query_file_together() {
        let yaml = "request:\n  query: \"{ a }\"\n  queryFile: q.graphql\n";
        assert!(matches!(
            YamlConfig::from_str(yaml),
            Err(YamlConfigError::Validation(_))
        ));
    }

    #[test]
    fn rejects_unknown_structure() {
        assert!(matches!(
            YamlConfig::from_str("load: [1, 2]"),
            Err(YamlConfigError::YamlParse(_))
        ));
    }
}
