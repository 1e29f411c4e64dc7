//! Error types for the console pipeline
//!
//! Centralized error handling using snafu for ergonomic error definitions.
//! Effect failures are carried as [`RequestError`], which is a plain
//! serializable value so it can travel inside failure actions and the
//! error map unchanged.

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Error surfaced by a request effect (HTTP call, storage call, ...)
///
/// Exposes at least a status/code and a message, consumed uniformly by the
/// error map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestError {
    /// HTTP-like status, when the effect has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Backend error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Human readable message
    pub message: String,
    /// Raw error body or extra context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl RequestError {
    /// Create an error with only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            details: None,
        }
    }

    /// Create an error carrying an HTTP-like status
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::new(message)
        }
    }

    /// Error reported by effects that observed an abort
    pub fn aborted() -> Self {
        Self {
            code: Some(ABORTED_CODE),
            ..Self::new("request aborted")
        }
    }

    /// Whether this error was produced by an explicit abort
    pub fn is_aborted(&self) -> bool {
        self.code == Some(ABORTED_CODE)
    }

    /// Set the backend error code
    pub fn code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }
}

/// gRPC "canceled", which the backend also uses over REST
const ABORTED_CODE: i64 = 1;

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.status, self.code) {
            (Some(status), _) => write!(f, "{} ({})", self.message, status),
            (None, Some(code)) => write!(f, "{} (code {})", self.message, code),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RequestError {}

/// Main error type for the crate
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Invalid input or configuration
    #[snafu(display("Invalid: {message}"))]
    Invalid { message: String },

    /// IO error (file operations, network, etc.)
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// JSON serialization/deserialization error
    #[snafu(display("JSON error: {source}"))]
    Json { source: serde_json::Error },

    /// TOML deserialization error
    #[snafu(display("TOML parse error: {source}"))]
    TomlDe { source: toml::de::Error },

    /// TOML serialization error
    #[snafu(display("TOML serialize error: {source}"))]
    TomlSe { source: toml::ser::Error },

    /// Wildcard pattern could not be compiled
    #[snafu(display("Invalid filter pattern {pattern:?}: {source}"))]
    Pattern {
        pattern: String,
        source: regex::Error,
    },

    /// Durable storage read/write failed
    #[snafu(display("Storage error for key {key:?}: {message}"))]
    Storage { key: String, message: String },

    /// Transport level HTTP failure
    #[snafu(display("HTTP error: {source}"))]
    Http { source: reqwest::Error },

    /// The request effect failed
    #[snafu(display("Request failed: {source}"))]
    Request { source: RequestError },

    /// The caller canceled its attached promise
    #[snafu(display("Canceled"))]
    Canceled,

    /// The request was dropped without ever being settled
    #[snafu(display("Request was never settled"))]
    Unsettled,

    /// Channel send error
    #[snafu(display("Channel send error: {message}"))]
    ChannelSend { message: String },
}

impl Error {
    /// The effect error, if this is a rejected request
    pub fn request_error(&self) -> Option<&RequestError> {
        match self {
            Error::Request { source } => Some(source),
            _ => None,
        }
    }

    /// Convert into the value carried by failure actions
    pub fn into_request_error(self) -> RequestError {
        match self {
            Error::Request { source } => source,
            Error::Http { source } => RequestError {
                status: source.status().map(|s| s.as_u16()),
                ..RequestError::new(source.to_string())
            },
            other => RequestError::new(other.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io { source }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Error::Json { source }
    }
}

impl From<toml::de::Error> for Error {
    fn from(source: toml::de::Error) -> Self {
        Error::TomlDe { source }
    }
}

impl From<toml::ser::Error> for Error {
    fn from(source: toml::ser::Error) -> Self {
        Error::TomlSe { source }
    }
}

impl From<reqwest::Error> for Error {
    fn from(source: reqwest::Error) -> Self {
        Error::Http { source }
    }
}

impl From<RequestError> for Error {
    fn from(source: RequestError) -> Self {
        Error::Request { source }
    }
}

/// Result type alias for convenience
pub type Result<T, E = Error> = std::result::Result<T, E>;
