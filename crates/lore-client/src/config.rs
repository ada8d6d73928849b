//! Client configuration

use std::path::PathBuf;
use std::time::Duration;

/// Default REST endpoint of the service
pub const DEFAULT_HTTP_URL: &str = "http://localhost:8000";

/// Default streaming endpoint of the service
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8002/ws";

/// Connection lifecycle tuning
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Fixed delay before each reconnect attempt
    pub reconnect_delay: Duration,
    /// How long to wait for the liveness acknowledgement before logging
    pub liveness_grace: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            liveness_grace: Duration::from_secs(10),
        }
    }
}

/// Rules for recognising generated artifacts in a response
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Case-insensitive trigger words
    pub keywords: Vec<String>,
    /// Markdown section marker that also triggers classification
    pub section_marker: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            keywords: vec![
                "scénario".to_string(),
                "chasse au trésor".to_string(),
                "quête".to_string(),
            ],
            section_marker: "##".to_string(),
        }
    }
}

/// Configuration for a client context
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL
    pub http_url: String,
    /// Streaming channel URL
    pub ws_url: String,
    /// Connection lifecycle tuning
    pub connection: ConnectionConfig,
    /// Give up on an exchange that has not seen a terminal frame after this long
    pub exchange_timeout: Duration,
    /// Timeout for each REST call
    pub request_timeout: Duration,
    /// JSON file backing the artifact library
    pub store_path: PathBuf,
    /// Where rendered artifacts are written
    pub download_dir: PathBuf,
    /// Artifact recognition rules
    pub classifier: ClassifierConfig,
    /// Characters of the first request kept as a session label
    pub label_chars: usize,
    /// Characters of the latest response kept as a session summary
    pub summary_chars: usize,
}

impl ClientConfig {
    /// Base data directory (`~/.local/share/lore` on Linux)
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lore")
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        let data_dir = Self::data_dir();
        Self {
            http_url: DEFAULT_HTTP_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            connection: ConnectionConfig::default(),
            exchange_timeout: Duration::from_secs(120),
            request_timeout: lore_proto::http::DEFAULT_REQUEST_TIMEOUT,
            store_path: data_dir.join("artifacts.json"),
            download_dir: data_dir.join("downloads"),
            classifier: ClassifierConfig::default(),
            label_chars: 30,
            summary_chars: 50,
        }
    }
}
