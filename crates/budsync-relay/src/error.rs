//! Error types for the relay client.

use thiserror::Error;

/// Errors that can occur talking to the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Connection, DNS or timeout failure. Transient; retry.
    #[error("network error: {0}")]
    Network(String),

    /// The relay rejected the request for this jar (401/403).
    ///
    /// Persistent forbidden responses usually mean membership was revoked
    /// mid-sync; the sync engine may halt the jar on them.
    #[error("relay forbidden")]
    Forbidden,

    /// Any other non-success HTTP status.
    #[error("relay http error {status}: {body}")]
    Http { status: u16, body: String },

    /// The response body did not match the wire contract.
    #[error("malformed relay response: {0}")]
    MalformedResponse(String),

    /// The auth provider could not supply a bearer token.
    #[error("auth token unavailable: {0}")]
    Auth(String),
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Network(e.to_string())
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
