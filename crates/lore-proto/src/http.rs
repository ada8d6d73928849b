//! REST client for the RAG service

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::{
    error::{Error, Result},
    types::{
        ChatReply, ChatRequest, EmbedRequest, HealthStatus, SimilarityReport, SimilarityRequest,
    },
};

/// Default timeout applied to every REST call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// REST client for the chat, session, similarity and indexing endpoints
#[derive(Debug, Clone)]
pub struct RagClient {
    client: reqwest::Client,
    base_url: String,
}

impl RagClient {
    /// Create a client for the service at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom per-request timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "base URL must be http(s): {}",
                base_url
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /chat`
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        let url = self.url("/chat");
        tracing::debug!("POST {}", url);
        let response = self.client.post(&url).json(request).send().await?;
        read_json(response).await
    }

    /// `DELETE /chat/{session_id}`
    ///
    /// A session the service no longer knows about counts as deleted.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let url = self.url(&format!("/chat/{}", urlencoding::encode(session_id)));
        tracing::debug!("DELETE {}", url);
        let response = self.client.delete(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await.map(|_| ())
    }

    /// `POST /check-similarity`
    pub async fn check_similarity(&self, content: &str, title: &str) -> Result<SimilarityReport> {
        let url = self.url("/check-similarity");
        tracing::debug!("POST {} ({} chars)", url, content.len());
        let body = SimilarityRequest {
            scenario_content: content.to_string(),
            scenario_title: title.to_string(),
        };
        let response = self.client.post(&url).json(&body).send().await?;
        read_json(response).await
    }

    /// `POST /embed-scenario` with `force_embed` set
    pub async fn embed_scenario(&self, content: &str, title: &str) -> Result<()> {
        let url = self.url("/embed-scenario");
        tracing::debug!("POST {}", url);
        let body = EmbedRequest {
            content: content.to_string(),
            title: title.to_string(),
            force_embed: true,
        };
        let response = self.client.post(&url).json(&body).send().await?;
        check_status(response).await.map(|_| ())
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<HealthStatus> {
        let response = self.client.get(self.url("/health")).send().await?;
        read_json(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(Error::api(status.as_u16(), error_message(&text, status)))
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Pull the human-readable message out of an error body
///
/// The service reports failures as `{"detail": "..."}`; anything else is
/// passed through verbatim.
fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(detail) = value.get("detail") {
            return match detail {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
        }
    }
    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}
