//! One GraphQL exchange per iteration, plus the checks evaluated on it.
//!
//! The response is decoded exactly once into a [`GraphqlResponse`]; both
//! checks and the error sampling read that structure. Nothing in this module
//! returns an error: every failure ends up as a failed check.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, warn};

use crate::data_source::Record;
use crate::errors::ErrorCategory;
use crate::metrics::{
    MetricsAggregator, CHECKS_METRIC, GQL_ERRORS_METRIC, HTTP_REQS_METRIC,
    HTTP_REQ_DURATION_METRIC, HTTP_REQ_FAILED_METRIC,
};
use crate::request::RequestTemplate;
use crate::worker::IterationBody;

pub const STATUS_IS_200: &str = "status is 200";
pub const NO_GRAPHQL_ERRORS: &str = "no GraphQL errors";

/// One entry of a GraphQL `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GraphqlError {
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    errors: Option<Vec<GraphqlError>>,
}

/// Decoded GraphQL response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphqlResponse {
    pub status: u16,
    /// None when the body was not a GraphQL JSON object.
    pub errors: Option<Vec<GraphqlError>>,
}

impl GraphqlResponse {
    pub fn decode(status: u16, body: &[u8]) -> Self {
        let errors = serde_json::from_slice::<Envelope>(body)
            .ok()
            .map(|envelope| envelope.errors.unwrap_or_default());
        Self { status, errors }
    }

    pub fn body_parsed(&self) -> bool {
        self.errors.is_some()
    }

    pub fn first_error_message(&self) -> Option<&str> {
        self.errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|error| error.message.as_str())
    }
}

/// Result of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    Response(GraphqlResponse),
    /// No response at all (refused, timed out, reset...).
    Transport {
        category: ErrorCategory,
        message: String,
    },
}

/// Outcome of one named check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
}

/// Evaluate the two required checks against an exchange.
pub fn evaluate_checks(exchange: &Exchange) -> [CheckResult; 2] {
    let (status_ok, no_errors) = match exchange {
        Exchange::Response(response) => (
            response.status == 200,
            matches!(&response.errors, Some(errors) if errors.is_empty()),
        ),
        Exchange::Transport { .. } => (false, false),
    };

    [
        CheckResult {
            name: STATUS_IS_200,
            passed: status_ok,
        },
        CheckResult {
            name: NO_GRAPHQL_ERRORS,
            passed: no_errors,
        },
    ]
}

impl Exchange {
    /// No response, or a status outside 200..=399.
    pub fn request_failed(&self) -> bool {
        match self {
            Exchange::Response(response) => !(200..400).contains(&response.status),
            Exchange::Transport { .. } => true,
        }
    }
}

/// Feed the checks, the request outcome and the error sample of one exchange
/// into the aggregator.
pub fn record_exchange(exchange: &Exchange, metrics: &MetricsAggregator) {
    metrics.record_check(HTTP_REQ_FAILED_METRIC, exchange.request_failed());

    for check in evaluate_checks(exchange) {
        metrics.record_check(check.name, check.passed);
        metrics.record_check(CHECKS_METRIC, check.passed);
    }

    if let Exchange::Response(response) = exchange {
        if let Some(message) = response.first_error_message() {
            metrics.record_count(GQL_ERRORS_METRIC, Some(message));
        }
    }
}

/// Iteration body posting one GraphQL request per iteration.
pub struct GraphqlIteration {
    client: reqwest::Client,
    endpoint: String,
    template: RequestTemplate,
}

impl GraphqlIteration {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, template: RequestTemplate) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            template,
        }
    }

    /// Send one request and decode whatever comes back.
    pub async fn exchange(&self, record: &Record, metrics: &MetricsAggregator) -> Exchange {
        let body = self.template.build_body(record);
        metrics.record_count(HTTP_REQS_METRIC, None);

        let request_start = Instant::now();
        let sent = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                return Exchange::Transport {
                    category: ErrorCategory::from_reqwest_error(&e),
                    message: e.to_string(),
                }
            }
        };

        let status = response.status().as_u16();
        let decoded = match response.bytes().await {
            Ok(bytes) => GraphqlResponse::decode(status, &bytes),
            Err(e) => {
                warn!(status, error = %e, "Failed to read response body");
                GraphqlResponse { status, errors: None }
            }
        };
        metrics.record_duration(HTTP_REQ_DURATION_METRIC, request_start.elapsed());

        Exchange::Response(decoded)
    }
}

#[async_trait]
impl IterationBody for GraphqlIteration {
    async fn run(&self, client_index: usize, record: &Record, metrics: &MetricsAggregator) {
        let exchange = self.exchange(record, metrics).await;

        match &exchange {
            Exchange::Response(response) => {
                if let Some(category) = ErrorCategory::from_status_code(response.status) {
                    warn!(
                        client = client_index,
                        status = response.status,
                        error_category = %category,
                        "Non-success HTTP status"
                    );
                }
                if !response.body_parsed() {
                    warn!(client = client_index, status = response.status, "Response body is not GraphQL JSON");
                }
                debug!(
                    client = client_index,
                    status = response.status,
                    graphql_errors = response.errors.as_ref().map_or(0, Vec::len),
                    "Iteration completed"
                );
            }
            Exchange::Transport { category, message } => {
                warn!(
                    client = client_index,
                    url = %self.endpoint,
                    error = %message,
                    error_category = %category,
                    "Request failed"
                );
            }
        }

        record_exchange(&exchange, metrics);
    }
}
