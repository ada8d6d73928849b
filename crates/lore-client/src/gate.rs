//! Similarity gate and artifact persistence
//!
//! Before a generated artifact reaches the [`ArtifactStore`] the service is
//! asked whether something similar is already indexed. A clean verdict is
//! persisted straight away; otherwise the pipeline suspends on a
//! [`DuplicateConfirmer`] until the user accepts, rejects or forces the save.
//! A failed check never persists anything.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use lore_proto::{MatchKind, RagClient, SimilarityReport};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::Result;
use crate::events::ClientEvent;
use crate::store::{Artifact, ArtifactStore, StoredPayload};

/// Rendered document returned with a verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPayload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// One indexed document that resembles the submitted content
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictMatch {
    pub reference: String,
    /// 0.0..=1.0
    pub score: f64,
    pub is_duplicate: bool,
    pub kind: MatchKind,
}

/// Outcome of a similarity check
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Ordered as the service ranked them
    pub matches: Vec<VerdictMatch>,
    pub threshold: f64,
    pub auto_acceptable: bool,
    pub payload: Option<RenderPayload>,
}

impl Verdict {
    /// Matches worth showing the user: flagged duplicates or above the threshold
    pub fn flagged(&self) -> Vec<&VerdictMatch> {
        self.matches
            .iter()
            .filter(|m| m.is_duplicate || m.score >= self.threshold)
            .collect()
    }
}

impl TryFrom<SimilarityReport> for Verdict {
    type Error = lore_proto::Error;

    fn try_from(report: SimilarityReport) -> std::result::Result<Self, Self::Error> {
        let payload = match report.pdf_data.as_deref().filter(|d| !d.is_empty()) {
            Some(data) => Some(RenderPayload {
                filename: report
                    .pdf_filename
                    .clone()
                    .unwrap_or_else(|| "artifact.pdf".to_string()),
                bytes: STANDARD.decode(data)?,
            }),
            None => None,
        };

        let matches = report
            .similarities
            .iter()
            .map(|m| VerdictMatch {
                reference: m.candidate_label(),
                score: m.similarity_score.clamp(0.0, 1.0),
                is_duplicate: m.is_duplicate,
                kind: m.similarity_type,
            })
            .collect();

        Ok(Self {
            matches,
            threshold: report.similarity_threshold,
            auto_acceptable: report.can_auto_embed,
            payload,
        })
    }
}

/// Remote duplicate detection
#[async_trait]
pub trait SimilarityService: Send + Sync {
    async fn check_similarity(&self, content: &str, title: &str) -> lore_proto::Result<SimilarityReport>;

    /// Index the content regardless of similarity
    async fn force_embed(&self, content: &str, title: &str) -> lore_proto::Result<()>;
}

#[async_trait]
impl SimilarityService for RagClient {
    async fn check_similarity(&self, content: &str, title: &str) -> lore_proto::Result<SimilarityReport> {
        RagClient::check_similarity(self, content, title).await
    }

    async fn force_embed(&self, content: &str, title: &str) -> lore_proto::Result<()> {
        self.embed_scenario(content, title).await
    }
}

/// The user's answer when similar artifacts exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Save locally
    Accept,
    /// Discard
    Reject,
    /// Save locally and index remotely despite the similarity
    ForceAccept,
}

/// Suspend point for the user's decision on a non-clean verdict
#[async_trait]
pub trait DuplicateConfirmer: Send + Sync {
    async fn confirm(&self, title: &str, verdict: &Verdict) -> GateDecision;
}

/// Always answers the same way (non-interactive use)
#[derive(Debug, Clone, Copy)]
pub struct StaticConfirmer(pub GateDecision);

#[async_trait]
impl DuplicateConfirmer for StaticConfirmer {
    async fn confirm(&self, _title: &str, _verdict: &Verdict) -> GateDecision {
        self.0
    }
}

/// A decision waiting for the user
#[derive(Debug)]
pub struct PendingDecision {
    pub title: String,
    pub verdict: Verdict,
    reply: oneshot::Sender<GateDecision>,
}

impl PendingDecision {
    pub fn resolve(self, decision: GateDecision) {
        if self.reply.send(decision).is_err() {
            tracing::debug!(title = %self.title, "Decision arrived after the pipeline gave up");
        }
    }
}

/// Hands decisions to a UI over a channel
///
/// If the receiving side is gone, or drops the [`PendingDecision`] without
/// answering, the decision is [`GateDecision::Reject`].
#[derive(Debug, Clone)]
pub struct ChannelConfirmer {
    tx: mpsc::UnboundedSender<PendingDecision>,
}

impl ChannelConfirmer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingDecision>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl DuplicateConfirmer for ChannelConfirmer {
    async fn confirm(&self, title: &str, verdict: &Verdict) -> GateDecision {
        let (reply, answer) = oneshot::channel();
        let pending = PendingDecision {
            title: title.to_string(),
            verdict: verdict.clone(),
            reply,
        };
        if self.tx.send(pending).is_err() {
            tracing::warn!(title, "Nobody to confirm the save, discarding");
            return GateDecision::Reject;
        }
        answer.await.unwrap_or(GateDecision::Reject)
    }
}

/// Where rendered artifacts are delivered
pub trait DownloadSink: Send + Sync {
    fn deliver(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf>;
}

/// Writes downloads into a directory without clobbering existing files
#[derive(Debug, Clone)]
pub struct DirectoryDownloads {
    dir: PathBuf,
}

impl DirectoryDownloads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn free_path(&self, filename: &str) -> PathBuf {
        let name = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("artifact");
        let candidate = self.dir.join(name);
        if !candidate.exists() {
            return candidate;
        }

        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name);
        let ext = Path::new(name).extension().and_then(|e| e.to_str());
        (1..)
            .map(|n| match ext {
                Some(ext) => self.dir.join(format!("{} ({}).{}", stem, n, ext)),
                None => self.dir.join(format!("{} ({})", stem, n)),
            })
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }
}

impl DownloadSink for DirectoryDownloads {
    fn deliver(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.free_path(filename);
        std::fs::write(&path, bytes)?;
        tracing::info!("Saved {}", path.display());
        Ok(path)
    }
}

/// A finished response recognised as an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub title: String,
    pub content: String,
}

/// How a persistence run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Saved {
        artifact: Artifact,
        download: Option<PathBuf>,
        forced: bool,
    },
    Cancelled,
    Failed(String),
}

/// Check, decide, store, deliver
#[derive(Clone)]
pub struct PersistencePipeline {
    service: Arc<dyn SimilarityService>,
    store: Arc<ArtifactStore>,
    confirmer: Arc<dyn DuplicateConfirmer>,
    downloads: Arc<dyn DownloadSink>,
    events: broadcast::Sender<ClientEvent>,
}

impl PersistencePipeline {
    pub fn new(
        service: Arc<dyn SimilarityService>,
        store: Arc<ArtifactStore>,
        confirmer: Arc<dyn DuplicateConfirmer>,
        downloads: Arc<dyn DownloadSink>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            service,
            store,
            confirmer,
            downloads,
            events,
        }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub async fn run(&self, draft: Draft) -> PersistOutcome {
        self.emit(ClientEvent::PersistenceStarted {
            title: draft.title.clone(),
        });

        let verdict = match self
            .service
            .check_similarity(&draft.content, &draft.title)
            .await
            .and_then(Verdict::try_from)
        {
            Ok(verdict) => verdict,
            Err(e) => return self.fail(&draft.title, format!("Similarity check failed: {}", e)),
        };

        if verdict.auto_acceptable {
            tracing::debug!(title = %draft.title, "No significant duplicates");
            return self.save(draft, verdict, false).await;
        }

        let flagged = verdict.flagged();
        let matches = if flagged.is_empty() {
            verdict.matches.iter().map(|m| m.reference.clone()).collect()
        } else {
            flagged.iter().map(|m| m.reference.clone()).collect()
        };
        self.emit(ClientEvent::PersistenceDeferred {
            title: draft.title.clone(),
            matches,
        });

        match self.confirmer.confirm(&draft.title, &verdict).await {
            GateDecision::Reject => {
                tracing::info!(title = %draft.title, "Save cancelled");
                self.emit(ClientEvent::PersistenceCancelled { title: draft.title });
                PersistOutcome::Cancelled
            }
            GateDecision::Accept => self.save(draft, verdict, false).await,
            GateDecision::ForceAccept => self.save(draft, verdict, true).await,
        }
    }

    async fn save(&self, draft: Draft, verdict: Verdict, force_embed: bool) -> PersistOutcome {
        let stored = verdict
            .payload
            .as_ref()
            .map(|p| StoredPayload::from_bytes(p.filename.clone(), &p.bytes));
        let artifact = Artifact::new(draft.title.clone(), draft.content.clone(), stored);

        if let Err(e) = self.store.append(artifact.clone()) {
            return self.fail(&draft.title, e.to_string());
        }

        // Without a rendered payload the text itself is delivered
        let delivered = match verdict.payload {
            Some(payload) => self.downloads.deliver(&payload.filename, &payload.bytes),
            None => export(&artifact, self.downloads.as_ref()),
        };
        let download = match delivered {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(title = %artifact.title, "Could not deliver download: {}", e);
                None
            }
        };

        if force_embed {
            // Local save stands even if indexing fails
            if let Err(e) = self.service.force_embed(&draft.content, &draft.title).await {
                tracing::warn!(title = %draft.title, "Force embed failed: {}", e);
            }
        }

        tracing::info!(id = %artifact.id, title = %artifact.title, "Artifact saved");
        self.emit(ClientEvent::ArtifactSaved {
            artifact_id: artifact.id.clone(),
            title: artifact.title.clone(),
        });
        PersistOutcome::Saved {
            artifact,
            download,
            forced: force_embed,
        }
    }

    fn fail(&self, title: &str, message: String) -> PersistOutcome {
        tracing::warn!(title, "{}", message);
        self.emit(ClientEvent::PersistenceFailed {
            title: title.to_string(),
            message: message.clone(),
        });
        PersistOutcome::Failed(message)
    }
}

/// Write an artifact's stored rendering to the download sink
pub fn export(artifact: &Artifact, downloads: &dyn DownloadSink) -> Result<PathBuf> {
    match &artifact.payload {
        Some(payload) => downloads.deliver(&payload.filename, &payload.bytes()?),
        None => downloads.deliver(&format!("{}.txt", artifact.title), artifact.content.as_bytes()),
    }
}
