//! Error types for the BlockDAG Lens server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// A specialized `Result` type for BlockDAG Lens operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Defines the errors that can occur within the `blockdag_lens` crate.
#[derive(Error, Debug)]
pub enum Error {
    /// The upstream ledger API could not be reached.
    #[error("Upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    /// The upstream ledger API answered with a non-success status.
    #[error("Upstream {path} returned HTTP {status}")]
    UpstreamStatus {
        /// The upstream path that was requested.
        path: String,
        /// The HTTP status code returned.
        status: u16,
    },

    /// An upstream request exceeded the configured timeout.
    #[error("Upstream request timed out: {0}")]
    Timeout(String),

    /// A requested resource was not found.
    #[error("{0}")]
    NotFound(String),

    /// The client sent a malformed request or submission.
    #[error("{0}")]
    BadRequest(String),

    /// A dependency is unavailable; reported as 503.
    #[error("{0}")]
    Unavailable(String),

    /// A generic failure reported to the client as 500.
    #[error("{0}")]
    Internal(String),

    /// An error related to the web server (e.g., binding to a port).
    #[error("Server error: {0}")]
    Server(String),

    /// An error that occurred during data serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An error from the underlying I/O system.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error related to the server's configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// The JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// A human-readable error message.
    pub error: String,
}

impl Error {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Upstream(_)
            | Error::UpstreamStatus { .. }
            | Error::Timeout(_)
            | Error::Internal(_)
            | Error::Server(_)
            | Error::Serialization(_)
            | Error::Io(_)
            | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` when the upstream itself is down or slow, as opposed to
    /// answering that a resource does not exist.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Upstream(_) | Error::Timeout(_) => true,
            Error::UpstreamStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}
