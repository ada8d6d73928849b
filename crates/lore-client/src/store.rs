//! Durable artifact library
//!
//! Artifacts live in a single JSON array on disk, newest first. The file is
//! read once on open and rewritten (via a temporary file and rename) on every
//! mutation, so a crash mid-write leaves the previous contents intact.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Rendering of an artifact kept alongside its text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPayload {
    pub filename: String,
    /// Base64 of the rendered bytes
    pub data: String,
}

impl StoredPayload {
    pub fn from_bytes(filename: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            filename: filename.into(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| Error::Proto(lore_proto::Error::Payload(e)))
    }
}

/// A persisted generated document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StoredPayload>,
}

impl Artifact {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        payload: Option<StoredPayload>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            created_at: Utc::now(),
            payload,
        }
    }
}

/// Append-only (from the pipeline's view) collection of artifacts
#[derive(Debug)]
pub struct ArtifactStore {
    path: PathBuf,
    artifacts: Mutex<Vec<Artifact>>,
}

impl ArtifactStore {
    /// Load the library at `path`; a missing file is an empty library
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let artifacts = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| Error::Store(format!("{}: {}", path.display(), e)))?
            }
        } else {
            Vec::new()
        };
        tracing::debug!(count = artifacts.len(), "Loaded artifacts from {}", path.display());

        Ok(Self {
            path,
            artifacts: Mutex::new(artifacts),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All artifacts, newest first
    pub fn list(&self) -> Vec<Artifact> {
        self.artifacts.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<Artifact> {
        self.artifacts.lock().iter().find(|a| a.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.lock().is_empty()
    }

    /// Add an artifact; an existing id is never overwritten
    pub fn append(&self, artifact: Artifact) -> Result<()> {
        let mut artifacts = self.artifacts.lock();
        if artifacts.iter().any(|a| a.id == artifact.id) {
            return Err(Error::DuplicateArtifact(artifact.id));
        }

        let mut next = Vec::with_capacity(artifacts.len() + 1);
        next.push(artifact);
        next.extend(artifacts.iter().cloned());
        write_atomic(&self.path, &next)?;
        *artifacts = next;
        Ok(())
    }

    /// Delete an artifact by id
    pub fn remove(&self, id: &str) -> Result<Option<Artifact>> {
        let mut artifacts = self.artifacts.lock();
        let Some(index) = artifacts.iter().position(|a| a.id == id) else {
            return Ok(None);
        };

        let mut next = artifacts.clone();
        let removed = next.remove(index);
        write_atomic(&self.path, &next)?;
        *artifacts = next;
        Ok(Some(removed))
    }
}

fn write_atomic(path: &Path, artifacts: &[Artifact]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(artifacts)
        .map_err(|e| Error::Store(format!("serialize: {}", e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
