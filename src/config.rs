use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tokio::time::Duration;
use tracing::info;

use crate::client::{parse_custom_headers, ClientConfig, ClientError};
use crate::data_source::{FixtureDataset, FixtureError};
use crate::engine::EngineConfig;
use crate::request::RequestTemplate;
use crate::thresholds::{default_thresholds, parse_threshold_list, Threshold, ThresholdParseError};
use crate::utils::{format_duration, parse_bool_flag, parse_duration_string};
use crate::yaml_config::{YamlConfig, YamlConfigError, YamlDuration};

/// Query sent when neither `QUERY` nor `QUERY_FILE` is configured.
pub const DEFAULT_QUERY: &str = "query { __typename }";
pub const DEFAULT_CLIENTS: usize = 10;
pub const DEFAULT_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_PACING: Duration = Duration::from_secs(1);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SAMPLE_LIMIT: usize = crate::metrics::DEFAULT_SAMPLE_LIMIT;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("GRAPHQL_URL must be set (or endpoint.url in CONFIG_FILE)")]
    MissingEndpoint,

    #[error("Invalid GRAPHQL_URL '{0}': must start with http:// or https:// and contain no spaces")]
    InvalidEndpoint(String),

    #[error("{var} must be a valid number, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be greater than 0")]
    NotPositive { var: &'static str },

    #[error("Invalid {var} format: '{value}'. {message}")]
    InvalidDuration {
        var: &'static str,
        value: String,
        message: String,
    },

    #[error("{var} must be true or false, got '{value}'")]
    InvalidBool { var: &'static str, value: String },

    #[error("Failed to read QUERY_FILE '{path}': {source}")]
    QueryFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("QUERY and QUERY_FILE are mutually exclusive")]
    ConflictingQuery,

    #[error("VARIABLES must be a JSON object: {0}")]
    InvalidVariables(String),

    #[error("Invalid CUSTOM_HEADERS: {0}")]
    InvalidHeaders(#[from] ClientError),

    #[error("Invalid THRESHOLDS: {0}")]
    Thresholds(#[from] ThresholdParseError),

    #[error("Invalid CONFIG_FILE: {0}")]
    Yaml(#[from] YamlConfigError),
}

/// Immutable configuration of one run, built once before any client starts.
#[derive(Debug, Clone)]
pub struct Config {
    /// `metadata.name` of the YAML plan, if any.
    pub plan_name: Option<String>,
    pub plan_description: Option<String>,
    pub endpoint: String,
    pub num_concurrent_tasks: usize,
    pub test_duration: Duration,
    pub pacing: Duration,
    pub data_file: Option<PathBuf>,
    pub query: String,
    /// None passes each fixture record through as the variables object.
    pub variables: Option<Map<String, Value>>,
    pub thresholds: Vec<Threshold>,
    pub html_report: bool,
    pub report_dir: PathBuf,
    pub error_sample_limit: usize,
    pub request_timeout: Duration,
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, layered over the
    /// YAML plan named by `CONFIG_FILE` when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let yaml = match var("CONFIG_FILE") {
            Some(path) => {
                info!(path = %path, "Loading YAML test plan");
                YamlConfig::from_file(&path)?
            }
            None => YamlConfig::default(),
        };

        Self::resolve(&yaml, var)
    }

    /// Configuration from a YAML plan alone.
    pub fn from_yaml(yaml: &YamlConfig) -> Result<Self, ConfigError> {
        Self::resolve(yaml, |_| None)
    }

    fn resolve<F>(yaml: &YamlConfig, var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = var("GRAPHQL_URL")
            .or_else(|| yaml.endpoint.url.clone())
            .ok_or(ConfigError::MissingEndpoint)?;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
            || endpoint.contains(' ')
        {
            return Err(ConfigError::InvalidEndpoint(endpoint));
        }

        let num_concurrent_tasks = match var("NUM_CONCURRENT_TASKS") {
            Some(v) => parse_number("NUM_CONCURRENT_TASKS", &v)?,
            None => yaml.load.clients.unwrap_or(DEFAULT_CLIENTS),
        };
        if num_concurrent_tasks == 0 {
            return Err(ConfigError::NotPositive {
                var: "NUM_CONCURRENT_TASKS",
            });
        }

        let test_duration =
            duration_setting("TEST_DURATION", var("TEST_DURATION"), &yaml.load.duration)?
                .unwrap_or(DEFAULT_DURATION);
        if test_duration.is_zero() {
            return Err(ConfigError::NotPositive {
                var: "TEST_DURATION",
            });
        }

        let pacing = duration_setting("PACING", var("PACING"), &yaml.load.pacing)?
            .unwrap_or(DEFAULT_PACING);

        let request_timeout =
            duration_setting("REQUEST_TIMEOUT", var("REQUEST_TIMEOUT"), &yaml.endpoint.timeout)?
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        if request_timeout.is_zero() {
            return Err(ConfigError::NotPositive {
                var: "REQUEST_TIMEOUT",
            });
        }

        let query = match (var("QUERY"), var("QUERY_FILE")) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingQuery),
            (Some(query), None) => query,
            (None, Some(path)) => read_query_file(path)?,
            (None, None) => match (&yaml.request.query, &yaml.request.query_file) {
                (Some(query), _) => query.clone(),
                (None, Some(path)) => read_query_file(path.clone())?,
                (None, None) => DEFAULT_QUERY.to_string(),
            },
        };

        let variables = match var("VARIABLES") {
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => Some(map),
                Ok(other) => {
                    return Err(ConfigError::InvalidVariables(format!(
                        "expected an object, got {}",
                        other
                    )))
                }
                Err(e) => return Err(ConfigError::InvalidVariables(e.to_string())),
            },
            None => yaml.request.variables.clone(),
        };

        let thresholds = match var("THRESHOLDS") {
            Some(raw) => parse_threshold_list(&raw)?,
            None => yaml.parsed_thresholds()?.unwrap_or_else(default_thresholds),
        };

        let html_report = match var("HTML_REPORT") {
            Some(v) => parse_bool("HTML_REPORT", &v)?,
            None => yaml.report.html.unwrap_or(true),
        };

        let report_dir = var("REPORT_DIR")
            .or_else(|| yaml.report.dir.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let error_sample_limit = match var("ERROR_SAMPLE_LIMIT") {
            Some(v) => parse_number("ERROR_SAMPLE_LIMIT", &v)?,
            None => yaml.report.error_sample_limit.unwrap_or(DEFAULT_SAMPLE_LIMIT),
        };
        if error_sample_limit == 0 {
            return Err(ConfigError::NotPositive {
                var: "ERROR_SAMPLE_LIMIT",
            });
        }

        let skip_tls_verify = match var("SKIP_TLS_VERIFY") {
            Some(v) => parse_bool("SKIP_TLS_VERIFY", &v)?,
            None => yaml.endpoint.skip_tls_verify.unwrap_or(false),
        };

        let custom_headers = var("CUSTOM_HEADERS").or_else(|| yaml.endpoint.custom_headers.clone());
        parse_custom_headers(custom_headers.as_deref())?;

        Ok(Config {
            plan_name: yaml.metadata.name.clone(),
            plan_description: yaml.metadata.description.clone(),
            endpoint,
            num_concurrent_tasks,
            test_duration,
            pacing,
            data_file: var("DATA_FILE")
                .or_else(|| yaml.data_file.clone())
                .map(PathBuf::from),
            query,
            variables,
            thresholds,
            html_report,
            report_dir,
            error_sample_limit,
            request_timeout,
            skip_tls_verify,
            custom_headers,
        })
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            skip_tls_verify: self.skip_tls_verify,
            custom_headers: self.custom_headers.clone(),
            request_timeout: self.request_timeout,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            clients: self.num_concurrent_tasks,
            duration: self.test_duration,
            pacing: self.pacing,
        }
    }

    pub fn request_template(&self) -> RequestTemplate {
        let template = RequestTemplate::new(self.query.clone());
        match &self.variables {
            Some(variables) => template.with_variables(variables.clone()),
            None => template,
        }
    }

    /// Loads the fixture file, or a single empty record for query-only runs.
    pub fn load_dataset(&self) -> Result<FixtureDataset, FixtureError> {
        match &self.data_file {
            Some(path) => FixtureDataset::from_file(path),
            None => Ok(FixtureDataset::single_empty()),
        }
    }

    /// Logs the configuration summary.
    pub fn log_summary(&self, parsed_headers: &reqwest::header::HeaderMap) {
        if let Some(name) = &self.plan_name {
            info!(
                plan = %name,
                description = self.plan_description.as_deref().unwrap_or(""),
                "Test plan"
            );
        }

        info!(
            endpoint = %self.endpoint,
            clients = self.num_concurrent_tasks,
            duration = %format_duration(self.test_duration),
            pacing = %format_duration(self.pacing),
            request_timeout = %format_duration(self.request_timeout),
            skip_tls_verify = self.skip_tls_verify,
            "Starting load test"
        );

        let data_file = self
            .data_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string());
        let variables = match self.variables {
            Some(_) => "template",
            None => "record passthrough",
        };
        info!(
            data_file = %data_file,
            variables,
            query_bytes = self.query.len(),
            "Request configuration"
        );

        for threshold in &self.thresholds {
            info!(threshold = %threshold, "Threshold");
        }

        info!(
            html_report = self.html_report,
            report_dir = %self.report_dir.display(),
            error_sample_limit = self.error_sample_limit,
            "Report configuration"
        );

        for (name, value) in parsed_headers.iter() {
            info!(
                header = %name,
                value = value.to_str().unwrap_or("<non-ASCII or sensitive value>"),
                "Custom header"
            );
        }
    }
}

fn parse_number(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: value.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    parse_bool_flag(value).ok_or_else(|| ConfigError::InvalidBool {
        var,
        value: value.to_string(),
    })
}

/// Environment value if set, else the YAML value, else None.
fn duration_setting(
    var: &'static str,
    env_value: Option<String>,
    yaml_value: &Option<YamlDuration>,
) -> Result<Option<Duration>, ConfigError> {
    if let Some(value) = env_value {
        return parse_duration_string(&value)
            .map(Some)
            .map_err(|message| ConfigError::InvalidDuration {
                var,
                value,
                message,
            });
    }

    match yaml_value {
        Some(d) => Ok(Some(d.to_std_duration()?)),
        None => Ok(None),
    }
}

fn read_query_file(path: impl Into<PathBuf>) -> Result<String, ConfigError> {
    let path = path.into();
    fs::read_to_string(&path).map_err(|source| ConfigError::QueryFile { path, source })
}
