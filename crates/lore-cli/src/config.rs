//! Configuration file support

use lore_client::ClientConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for lore
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// REST base URL of the service
    pub http_url: Option<String>,
    /// Streaming channel URL
    pub ws_url: Option<String>,
    /// Chat over `POST /chat` instead of the streaming channel
    pub rest: Option<bool>,
    /// Seconds between reconnect attempts
    pub reconnect_delay_secs: Option<u64>,
    /// Seconds to wait for a complete response
    pub exchange_timeout_secs: Option<u64>,
    /// Seconds allowed for each REST call
    pub request_timeout_secs: Option<u64>,
    /// Where the artifact library and downloads live
    pub data_dir: Option<String>,
    /// Artifact recognition and export
    #[serde(default)]
    pub artifacts: ArtifactSettings,
}

/// Artifact settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    /// Words that mark a response as an artifact
    pub keywords: Option<Vec<String>>,
    /// Markdown marker that also marks a response as an artifact
    pub section_marker: Option<String>,
    /// Export directory (defaults to `<data_dir>/downloads`)
    pub download_dir: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lore")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("LORE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file, falling back to defaults on any problem
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            http_url: Some(lore_client::config::DEFAULT_HTTP_URL.to_string()),
            ws_url: Some(lore_client::config::DEFAULT_WS_URL.to_string()),
            rest: Some(false),
            ..Config::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Client settings with this file applied over the built-in defaults
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();

        if let Some(ref url) = self.http_url {
            config.http_url = url.clone();
        }
        if let Some(ref url) = self.ws_url {
            config.ws_url = url.clone();
        }
        if let Some(secs) = self.reconnect_delay_secs {
            config.connection.reconnect_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = self.exchange_timeout_secs {
            config.exchange_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ref dir) = self.data_dir {
            let dir = expand_home(dir);
            config.store_path = dir.join("artifacts.json");
            config.download_dir = dir.join("downloads");
        }

        let artifacts = &self.artifacts;
        if let Some(ref dir) = artifacts.download_dir {
            config.download_dir = expand_home(dir);
        }
        if let Some(ref keywords) = artifacts.keywords {
            config.classifier.keywords = keywords.clone();
        }
        if let Some(ref marker) = artifacts.section_marker {
            config.classifier.section_marker = marker.clone();
        }

        config
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r###"# lore configuration file
# Place at ~/.config/lore/config.toml (Linux) or set LORE_CONFIG_PATH

# Service endpoints
http_url = "http://localhost:8000"
ws_url = "ws://127.0.0.1:8002/ws"

# Chat over POST /chat instead of the streaming channel
rest = false

# Timing (seconds)
reconnect_delay_secs = 3
exchange_timeout_secs = 120
request_timeout_secs = 30

# Artifact library location (defaults to ~/.local/share/lore)
# data_dir = "~/.local/share/lore"

[artifacts]
# Responses containing any of these words (or the section marker) are
# checked for similarity and saved to the library
keywords = ["scénario", "chasse au trésor", "quête"]
section_marker = "##"
# download_dir = "~/Downloads/lore"
"###
}
