//! Error types for relay operations

use thiserror::Error;

/// Result type alias for relay setup operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors raised while building routes and their components
#[derive(Error, Debug)]
pub enum RelayError {
    /// Invalid URL in a route
    #[error("Invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Route URL uses a scheme other than http(s)
    #[error("Unsupported URL scheme in {0}")]
    UnsupportedScheme(String),

    /// HTTP client could not be built
    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

/// Errors that can occur while relaying one event to its target.
///
/// None of these are fatal to the forwarder; they are logged and the next
/// event is processed.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// Destination unreachable or the request timed out
    #[error("Request to target failed: {0}")]
    Send(#[from] reqwest::Error),

    /// Destination answered with a non-2xx status
    #[error("Target returned status {status}")]
    Status { status: u16, body: String },

    /// Event data was not a valid payload document
    #[error("Failed to decode payload: {0}")]
    PayloadDecode(#[from] serde_json::Error),
}

impl ForwardError {
    /// Create a status error from status code and response body
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }
}
