//! Streaming channel frames
//!
//! Every frame is a JSON object tagged by its `type` field. The client sends
//! `chat` and `ping`; the server answers with the variants of [`ServerFrame`].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Citation;

/// Frames sent from the client to the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A chat request
    Chat {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Liveness probe
    Ping,
}

impl ClientFrame {
    /// Build a chat request frame
    pub fn chat(message: impl Into<String>, session_id: Option<String>) -> Self {
        Self::Chat {
            message: message.into(),
            session_id,
        }
    }

    /// Encode the frame as JSON text
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frames sent from the service to the client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Liveness acknowledgement
    Pong,

    /// Free-text progress annotation
    Status {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    /// Cumulative snapshot of the response generated so far
    StreamingResponse {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        chunk: String,
        #[serde(default)]
        progress: Option<f64>,
        #[serde(default)]
        is_final: bool,
    },

    /// Terminal frame carrying the full response
    ChatResponse {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        response: String,
        #[serde(default)]
        sources: Vec<Citation>,
    },

    /// Terminal frame carrying a failure
    Error {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Any frame type this client does not know about
    #[serde(other)]
    Unknown,
}

/// Sub-phase announced by a `status` frame once generation starts
pub const STATUS_GENERATING: &str = "generating";

impl ServerFrame {
    /// Decode a frame from its JSON text
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::MalformedFrame(e.to_string()))
    }

    /// Whether this frame ends an exchange
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerFrame::ChatResponse { .. } | ServerFrame::Error { .. })
    }

    /// Human-readable text of an `error` frame
    pub fn error_text(&self) -> Option<String> {
        match self {
            ServerFrame::Error { error, message, .. } => Some(
                error
                    .clone()
                    .or_else(|| message.clone())
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ),
            _ => None,
        }
    }

    /// Whether a `status` frame announces the generating sub-phase
    pub fn is_generating(&self) -> bool {
        matches!(
            self,
            ServerFrame::Status { status: Some(s), .. } if s == STATUS_GENERATING
        )
    }
}

/// Convert the service's fractional progress into a whole percentage
pub fn progress_percent(progress: Option<f64>) -> u8 {
    match progress {
        Some(p) if p.is_finite() => p.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

/// Cheap check for a liveness acknowledgement without keeping the frame
pub fn is_pong(text: &str) -> bool {
    #[derive(Deserialize)]
    struct Tag {
        #[serde(rename = "type")]
        kind: Option<String>,
    }

    serde_json::from_str::<Tag>(text)
        .map(|t| t.kind.as_deref() == Some("pong"))
        .unwrap_or(false)
}
