//! Error types shared by the daemon and its clients.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to parse a wire enum from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Not one of the known session types.
    #[error("unknown session type: {0}")]
    UnknownSessionType(String),

    /// Not one of the known modes.
    #[error("unknown session mode: {0}")]
    UnknownMode(String),
}

/// JSON error body returned by every failing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Short category, e.g. "Not Found".
    pub error: String,
    /// Human-readable detail, when safe to expose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiErrorBody {
    /// Creates an error body with optional details.
    pub fn new(error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            error: error.into(),
            details,
        }
    }
}

impl std::fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {}", self.error, details),
            None => f.write_str(&self.error),
        }
    }
}
