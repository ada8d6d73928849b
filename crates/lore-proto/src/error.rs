//! Error types for lore-proto

use thiserror::Error;

/// Result type alias using lore-proto Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the RAG service
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket transport failed
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An inbound frame could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The service answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// A binary payload could not be decoded
    #[error("Invalid payload encoding: {0}")]
    Payload(#[from] base64::DecodeError),

    /// The transport was closed underneath us
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_display() {
        let e = Error::api(500, "Erreur lors du traitement");
        assert_eq!(e.to_string(), "API error (500): Erreur lors du traitement");
    }
}
