//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use protocol::ApiErrorBody;

use crate::bridge::BridgeError;
use crate::session::RegistryError;

/// Error type for HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The multiplexer refused the operation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No free bridge port.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// An external program failed.
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            WebError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not Found", Some(msg)),
            WebError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad Request", Some(msg)),
            WebError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg)),
            WebError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable", Some(msg))
            }
            WebError::BadGateway(msg) => {
                tracing::warn!("External program failed: {}", msg);
                (StatusCode::BAD_GATEWAY, "Bad Gateway", Some(msg))
            }
            WebError::Internal(msg) => {
                tracing::error!("Internal server error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", None)
            }
        };

        (status, Json(ApiErrorBody::new(error, details))).into_response()
    }
}

impl From<RegistryError> for WebError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(name) => WebError::NotFound(format!("session {name}")),
            e @ (RegistryError::InvalidName(_)
            | RegistryError::InvalidWorkdir(_)
            | RegistryError::InvalidResumeId(_)) => WebError::BadRequest(e.to_string()),
            RegistryError::Bridge(e @ BridgeError::Capacity(_)) => {
                WebError::Unavailable(e.to_string())
            }
            RegistryError::Bridge(e) => WebError::BadGateway(e.to_string()),
            RegistryError::External(e) => WebError::BadGateway(e.to_string()),
            RegistryError::Store(e) => WebError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::PortError;
    use crate::mux::ExternalError;

    fn status_of(err: RegistryError) -> StatusCode {
        WebError::from(err).into_response().status()
    }

    #[test]
    fn test_registry_error_status() {
        assert_eq!(
            status_of(RegistryError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(RegistryError::InvalidName("a.b".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(RegistryError::Bridge(BridgeError::Capacity(PortError {
                min: 7700,
                max: 7799
            }))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(RegistryError::External(ExternalError::Failed {
                program: "tmux".into(),
                action: "list-sessions".into(),
                status: "exit status: 1".into(),
                stderr: "boom".into(),
            })),
            StatusCode::BAD_GATEWAY
        );
    }
}
