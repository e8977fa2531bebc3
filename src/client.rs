use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::utils::parse_headers_with_escapes;

/// Errors raised while building the shared HTTP client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid header format in CUSTOM_HEADERS: '{0}'. Expected 'Name:Value'.")]
    HeaderFormat(String),

    #[error("Invalid header name '{name}': {message}")]
    HeaderName { name: String, message: String },

    #[error("Invalid header value for '{name}': {message}")]
    HeaderValue { name: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
    pub request_timeout: Duration,
}

/// Result of building the client, includes parsed headers for logging.
pub struct ClientBuildResult {
    pub client: reqwest::Client,
    pub parsed_headers: HeaderMap,
}

/// Builds the reqwest client shared by every simulated client.
///
/// reqwest pools connections internally, so one client serves the whole run.
pub fn build_client(config: &ClientConfig) -> Result<ClientBuildResult, ClientError> {
    let mut client_builder = reqwest::Client::builder().timeout(config.request_timeout);

    let parsed_headers = parse_custom_headers(config.custom_headers.as_deref())?;
    if !parsed_headers.is_empty() {
        client_builder = client_builder.default_headers(parsed_headers.clone());
        info!(
            headers = parsed_headers.len(),
            "Configured custom default headers"
        );
    }

    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder = client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    let client = client_builder.build()?;

    Ok(ClientBuildResult {
        client,
        parsed_headers,
    })
}

/// Parses `Name:Value` pairs separated by commas (`\,` escapes a comma).
pub fn parse_custom_headers(custom_headers_str: Option<&str>) -> Result<HeaderMap, ClientError> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.trim().is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for pair in parse_headers_with_escapes(headers_str) {
        let pair = pair.trim();
        let (name, value) = pair
            .split_once(':')
            .ok_or_else(|| ClientError::HeaderFormat(pair.to_string()))?;
        let (name, value) = (name.trim(), value.trim());

        if name.is_empty() {
            return Err(ClientError::HeaderFormat(pair.to_string()));
        }

        let header_name = HeaderName::from_str(name).map_err(|e| ClientError::HeaderName {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| ClientError::HeaderValue {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}
