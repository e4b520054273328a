use std::path::PathBuf;
use thiserror::Error;

/// One failed registration attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("unreadable response body: {0}")]
    Body(String),
}

/// Identity could not be produced. Fatal to a run.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("registration rejected with HTTP status {0}")]
    Http(u16),
    #[error("registration failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: TransportError,
    },
    #[error("malformed registration response: missing {0}")]
    MalformedResponse(&'static str),
    #[error("HTTP client setup failed: {0}")]
    Client(String),
    #[error("identity store {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("identity encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
