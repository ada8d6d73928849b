//! Owned client state with an explicit lifecycle
//!
//! A [`ClientContext`] bundles the REST client, the streaming coordinator,
//! the artifact library and the event bus. Create it, [`open`] it, use it,
//! then [`dispose`] it; nothing lives in globals.
//!
//! [`open`]: ClientContext::open
//! [`dispose`]: ClientContext::dispose

use std::path::PathBuf;
use std::sync::Arc;

use lore_proto::{Connector, HealthStatus, RagClient, WebSocketConnector};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::classify::{ArtifactClassifier, KeywordClassifier};
use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::coordinator::{Coordinator, ExchangeCore, RestCoordinator};
use crate::error::{Error, Result};
use crate::events::ClientEvent;
use crate::gate::{self, DirectoryDownloads, DuplicateConfirmer, PersistencePipeline};
use crate::session::{Conversation, Removal};
use crate::store::{Artifact, ArtifactStore};

const EVENT_CAPACITY: usize = 256;

/// Everything a running client needs
pub struct ClientContext {
    config: ClientConfig,
    rest: RagClient,
    store: Arc<ArtifactStore>,
    downloads: Arc<DirectoryDownloads>,
    events: broadcast::Sender<ClientEvent>,
    coordinator: Coordinator,
    forwarder: Option<JoinHandle<()>>,
}

impl ClientContext {
    /// Build a context for the configured endpoints; nothing connects yet
    pub fn create(config: ClientConfig, confirmer: Arc<dyn DuplicateConfirmer>) -> Result<Self> {
        let rest = RagClient::with_timeout(config.http_url.clone(), config.request_timeout)?;
        let connector = WebSocketConnector::new(config.ws_url.clone())?;
        Self::with_connector(config, rest, Arc::new(connector), confirmer)
    }

    /// Build a context over a custom transport
    pub fn with_connector(
        config: ClientConfig,
        rest: RagClient,
        connector: Arc<dyn Connector>,
        confirmer: Arc<dyn DuplicateConfirmer>,
    ) -> Result<Self> {
        let store = Arc::new(ArtifactStore::open(config.store_path.clone())?);
        let downloads = Arc::new(DirectoryDownloads::new(config.download_dir.clone()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let core = build_core(&config, &rest, &store, &downloads, confirmer, &events);
        let (connection, inbound) = ConnectionManager::new(connector, config.connection.clone());
        let coordinator = Coordinator::new(connection, inbound, core, config.exchange_timeout);

        Ok(Self {
            config,
            rest,
            store,
            downloads,
            events,
            coordinator,
            forwarder: None,
        })
    }

    /// A REST-only coordinator sharing this context's library and event bus
    pub fn rest_coordinator(&self, confirmer: Arc<dyn DuplicateConfirmer>) -> RestCoordinator {
        let core = build_core(
            &self.config,
            &self.rest,
            &self.store,
            &self.downloads,
            confirmer,
            &self.events,
        );
        RestCoordinator::new(self.rest.clone(), core, self.config.exchange_timeout)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Start connecting and publish connection changes on the event bus
    pub fn open(&mut self) {
        if self.forwarder.is_none() {
            let mut states = self.coordinator.subscribe_state();
            let events = self.events.clone();
            self.forwarder = Some(tokio::spawn(async move {
                while states.changed().await.is_ok() {
                    let state = states.borrow_and_update().state;
                    let _ = events.send(ClientEvent::ConnectionChanged { state });
                }
            }));
        }
        self.coordinator.open();
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut Coordinator {
        &mut self.coordinator
    }

    pub fn rest(&self) -> &RagClient {
        &self.rest
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        Ok(self.rest.health().await?)
    }

    /// Forget a session locally and ask the service to drop it
    pub async fn delete_session(&mut self, id: &str) -> Removal {
        let removal = self.coordinator.delete_session(id);
        if let Err(e) = self.rest.delete_session(id).await {
            tracing::warn!(session_id = id, "Remote session delete failed: {}", e);
        }
        removal
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.store.list()
    }

    pub fn remove_artifact(&self, id: &str) -> Result<Option<Artifact>> {
        self.store.remove(id)
    }

    /// Write an artifact's rendering (or its text) to the download directory
    pub fn export_artifact(&self, id: &str) -> Result<PathBuf> {
        let artifact = self
            .store
            .get(id)
            .ok_or_else(|| Error::Store(format!("no artifact with id {}", id)))?;
        gate::export(&artifact, self.downloads.as_ref())
    }

    /// Close the transport and stop background work
    pub async fn dispose(mut self) {
        if self.coordinator.close().await.is_some() {
            tracing::debug!("Exchange in flight dropped on dispose");
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

fn build_core(
    config: &ClientConfig,
    rest: &RagClient,
    store: &Arc<ArtifactStore>,
    downloads: &Arc<DirectoryDownloads>,
    confirmer: Arc<dyn DuplicateConfirmer>,
    events: &broadcast::Sender<ClientEvent>,
) -> ExchangeCore {
    let classifier: Arc<dyn ArtifactClassifier> = Arc::new(KeywordClassifier::new(&config.classifier));
    let pipeline = PersistencePipeline::new(
        Arc::new(rest.clone()),
        Arc::clone(store),
        confirmer,
        downloads.clone(),
        events.clone(),
    );
    ExchangeCore::new(
        Conversation::new(config.label_chars, config.summary_chars),
        classifier,
        pipeline,
        events.clone(),
    )
}
