//! REST request/response types for the RAG service

use serde::{Deserialize, Serialize};

/// A source document the service cited for a response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Citation {
    /// Position of the citation in the service's ranking
    #[serde(rename = "id", default)]
    pub rank: u32,
    /// Document name
    #[serde(rename = "source", default)]
    pub origin: String,
    /// Where the document lives (object store path, URL, ...)
    #[serde(rename = "path", default)]
    pub locator: String,
    /// Short excerpt of the cited content
    #[serde(rename = "content_preview", default)]
    pub preview: String,
}

/// Body of `POST /chat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// `null` asks the service to allocate a new session
    pub session_id: Option<String>,
}

/// Response of `POST /chat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
    #[serde(default)]
    pub sources: Vec<Citation>,
}

/// Body of `POST /check-similarity`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityRequest {
    pub scenario_content: String,
    pub scenario_title: String,
}

/// How a candidate matched the submitted content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Semantic,
}

/// One previously indexed document compared against the submitted content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch {
    /// Reference to the indexed document; the service sends either a plain
    /// name or an object describing it
    pub scenario: serde_json::Value,
    pub similarity_score: f64,
    #[serde(default)]
    pub is_duplicate: bool,
    pub similarity_type: MatchKind,
}

impl SimilarityMatch {
    /// Human-readable name of the matched document
    pub fn candidate_label(&self) -> String {
        match &self.scenario {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => ["title", "name", "id"]
                .iter()
                .find_map(|key| map.get(*key))
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| self.scenario.to_string()),
            other => other.to_string(),
        }
    }
}

/// Response of `POST /check-similarity`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityReport {
    #[serde(default)]
    pub has_duplicates: bool,
    #[serde(default)]
    pub similarities: Vec<SimilarityMatch>,
    #[serde(default)]
    pub high_similarities: Vec<SimilarityMatch>,
    pub similarity_threshold: f64,
    pub can_auto_embed: bool,
    /// Base64-encoded rendering of the document
    #[serde(default)]
    pub pdf_data: Option<String>,
    #[serde(default)]
    pub pdf_filename: Option<String>,
}

/// Body of `POST /embed-scenario`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub content: String,
    pub title: String,
    pub force_embed: bool,
}

/// Response of `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub agent_status: Option<String>,
}

impl HealthStatus {
    /// Whether the backend reports its agent as ready to answer
    pub fn is_ready(&self) -> bool {
        self.status == "healthy" && self.agent_status.as_deref() != Some("not_initialized")
    }
}
