//! Classification of failed HTTP exchanges.
//!
//! Failed exchanges never abort a simulated client; they are recorded as
//! failed checks. The category only enriches the log line so that a run full
//! of failures can be diagnosed (refused connections vs. timeouts vs. 5xx).

use std::fmt;

/// Why an exchange did not produce a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP 4xx
    ClientError,

    /// HTTP 5xx
    ServerError,

    /// DNS, refused or reset connections, broken bodies
    NetworkError,

    /// Request or connect timeout
    TimeoutError,

    /// Certificate or handshake failures
    TlsError,

    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code; None for 1xx-3xx.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            100..=399 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorize a transport-level reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return ErrorCategory::TimeoutError;
        }
        if let Some(status) = error.status() {
            return Self::from_status_code(status.as_u16()).unwrap_or(ErrorCategory::OtherError);
        }

        let message = error.to_string().to_lowercase();
        if message.contains("certificate") || message.contains("tls") || message.contains("ssl") {
            ErrorCategory::TlsError
        } else if error.is_connect() || error.is_request() || error.is_body() || error.is_decode() {
            ErrorCategory::NetworkError
        } else if error.is_redirect() {
            ErrorCategory::ClientError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Stable label used in structured log fields.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
