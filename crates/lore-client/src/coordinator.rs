//! Exchange orchestration
//!
//! A coordinator runs one request/response cycle at a time: submit, stream,
//! finalise, update the conversation and, when the reply looks like an
//! artifact, hand it to the persistence pipeline in the background.
//!
//! [`Coordinator`] drives the streaming channel; [`RestCoordinator`] uses
//! `POST /chat`. Both share [`ExchangeCore`] for everything after the reply.

use std::sync::Arc;
use std::time::Duration;

use lore_proto::{ChatRequest, Citation, ClientFrame, RagClient};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::accumulator::StreamAccumulator;
use crate::classify::ArtifactClassifier;
use crate::connection::{
    ConnectionManager, ConnectionSnapshot, ConnectionState, InboundFrame, InstanceId,
};
use crate::dispatch::{Dispatch, Dispatcher};
use crate::error::{Error, Result};
use crate::events::ClientEvent;
use crate::gate::{Draft, PersistOutcome, PersistencePipeline};
use crate::session::{Conversation, Removal, SessionChange};

/// One request/response cycle in flight
#[derive(Debug)]
pub struct Exchange {
    pub id: u64,
    pub request: String,
    /// Session id the request was sent with
    pub session_id: Option<String>,
    /// Transport instance the request went out on (streaming flavour only)
    pub instance: Option<InstanceId>,
    pub started_at: Instant,
    accumulator: StreamAccumulator,
}

impl Exchange {
    /// Latest streamed snapshot
    pub fn partial(&self) -> Option<&str> {
        self.accumulator.partial()
    }

    pub fn progress(&self) -> u8 {
        self.accumulator.progress()
    }

    pub fn status(&self) -> Option<&str> {
        self.accumulator.status()
    }
}

/// How an exchange ended
#[derive(Debug)]
pub enum ExchangeOutcome {
    Completed {
        exchange_id: u64,
        text: String,
        sources: Vec<Citation>,
        session: Option<SessionChange>,
        /// Background persistence run, when the reply was recognised as an artifact
        persistence: Option<JoinHandle<PersistOutcome>>,
    },
    Failed {
        exchange_id: u64,
        error: Error,
    },
}

impl ExchangeOutcome {
    pub fn exchange_id(&self) -> u64 {
        match self {
            ExchangeOutcome::Completed { exchange_id, .. }
            | ExchangeOutcome::Failed { exchange_id, .. } => *exchange_id,
        }
    }
}

/// Conversation state and post-reply handling shared by both flavours
pub struct ExchangeCore {
    conversation: Conversation,
    classifier: Arc<dyn ArtifactClassifier>,
    pipeline: PersistencePipeline,
    events: broadcast::Sender<ClientEvent>,
    in_flight: Option<Exchange>,
    next_id: u64,
}

impl ExchangeCore {
    pub fn new(
        conversation: Conversation,
        classifier: Arc<dyn ArtifactClassifier>,
        pipeline: PersistencePipeline,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            conversation,
            classifier,
            pipeline,
            events,
            in_flight: None,
            next_id: 0,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn in_flight(&self) -> Option<&Exchange> {
        self.in_flight.as_ref()
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Refusals that do not depend on the transport
    fn admit(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::EmptyInput);
        }
        if self.in_flight.is_some() {
            return Err(Error::Busy);
        }
        Ok(())
    }

    fn start(&mut self, text: &str, instance: Option<InstanceId>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.in_flight = Some(Exchange {
            id,
            request: text.to_string(),
            session_id: self.conversation.active_session_id().map(str::to_string),
            instance,
            started_at: Instant::now(),
            accumulator: StreamAccumulator::new(),
        });
        self.conversation.push_user(text);
        tracing::debug!(exchange_id = id, ?instance, "Exchange started");
        self.emit(ClientEvent::ExchangeStarted { exchange_id: id });
        id
    }

    fn on_status(&mut self, message: String, generating: bool) {
        if let Some(exchange) = self.in_flight.as_mut() {
            exchange.accumulator.on_status(message.clone(), generating);
        }
        self.emit(ClientEvent::Status {
            message,
            generating,
        });
    }

    fn on_chunk(&mut self, text: String, progress: u8) {
        if let Some(exchange) = self.in_flight.as_mut() {
            exchange.accumulator.on_chunk(text.clone(), progress);
        }
        self.emit(ClientEvent::Partial { text, progress });
    }

    fn complete(
        &mut self,
        text: String,
        session_id: Option<String>,
        sources: Vec<Citation>,
    ) -> Option<ExchangeOutcome> {
        let Some(mut exchange) = self.in_flight.take() else {
            tracing::warn!("Reply arrived with no exchange in flight");
            return None;
        };
        let text = exchange.accumulator.on_final(text);

        let session = self.conversation.record_reply(
            &exchange.request,
            &text,
            session_id.as_deref(),
            sources.clone(),
        );
        match &session {
            Some(SessionChange::Created(s)) => self.emit(ClientEvent::SessionCreated {
                session_id: s.id.clone(),
                label: s.label.clone(),
            }),
            Some(SessionChange::Updated(s)) => self.emit(ClientEvent::SessionUpdated {
                session_id: s.id.clone(),
                summary: s.summary.clone(),
            }),
            None => {}
        }

        tracing::debug!(
            exchange_id = exchange.id,
            elapsed = ?exchange.started_at.elapsed(),
            "Exchange completed"
        );
        self.emit(ClientEvent::ExchangeCompleted {
            exchange_id: exchange.id,
            text: text.clone(),
        });

        let persistence = if self.classifier.is_artifact(&text) {
            let draft = Draft {
                title: self.classifier.title(&text),
                content: text.clone(),
            };
            let pipeline = self.pipeline.clone();
            Some(tokio::spawn(async move { pipeline.run(draft).await }))
        } else {
            None
        };

        Some(ExchangeOutcome::Completed {
            exchange_id: exchange.id,
            text,
            sources,
            session,
            persistence,
        })
    }

    fn fail(&mut self, error: Error) -> Option<ExchangeOutcome> {
        let exchange = self.in_flight.take()?;
        let message = error.to_string();
        tracing::warn!(exchange_id = exchange.id, "Exchange failed: {}", message);
        self.conversation.record_error(format!("Error: {}", message));
        self.emit(ClientEvent::ExchangeFailed {
            exchange_id: exchange.id,
            message,
        });
        Some(ExchangeOutcome::Failed {
            exchange_id: exchange.id,
            error,
        })
    }

    fn new_chat(&mut self) {
        self.conversation.new_chat();
    }

    fn load_session(&mut self, id: &str) -> bool {
        self.conversation.load_session(id)
    }

    fn delete_session(&mut self, id: &str) -> Removal {
        let removal = self.conversation.delete_session(id);
        if removal != Removal::Missing {
            self.emit(ClientEvent::SessionDeleted {
                session_id: id.to_string(),
            });
        }
        removal
    }
}

/// Runs exchanges over the streaming channel
pub struct Coordinator {
    connection: ConnectionManager,
    inbound: mpsc::UnboundedReceiver<InboundFrame>,
    states: watch::Receiver<ConnectionSnapshot>,
    dispatcher: Dispatcher,
    core: ExchangeCore,
    exchange_timeout: Duration,
}

impl Coordinator {
    pub fn new(
        connection: ConnectionManager,
        inbound: mpsc::UnboundedReceiver<InboundFrame>,
        core: ExchangeCore,
        exchange_timeout: Duration,
    ) -> Self {
        let states = connection.subscribe();
        Self {
            connection,
            inbound,
            states,
            dispatcher: Dispatcher::new(),
            core,
            exchange_timeout,
        }
    }

    /// Start the transport
    pub fn open(&mut self) {
        self.connection.open();
    }

    /// Tear the transport down; an exchange in flight fails with `TransportLoss`
    pub async fn close(&mut self) -> Option<ExchangeOutcome> {
        self.connection.close().await;
        self.dispatcher.abandon()?;
        self.core.fail(Error::TransportLoss)
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.connection.subscribe()
    }

    pub fn conversation(&self) -> &Conversation {
        self.core.conversation()
    }

    pub fn in_flight(&self) -> Option<&Exchange> {
        self.core.in_flight()
    }

    /// Send a chat request; returns the new exchange id
    pub fn submit(&mut self, text: &str) -> Result<u64> {
        self.core.admit(text)?;
        if self.connection.state() != ConnectionState::Connected {
            return Err(Error::NotReady);
        }

        // Anything queued while idle belongs to no exchange
        self.drain_idle();

        let session_id = self.core.conversation().active_session_id().map(str::to_string);
        let instance = self
            .connection
            .send(&ClientFrame::chat(text.trim(), session_id))?;
        let id = self.core.start(text.trim(), Some(instance));
        self.dispatcher.begin(id, instance);
        Ok(id)
    }

    fn drain_idle(&mut self) {
        while let Ok(frame) = self.inbound.try_recv() {
            let _ = self.dispatcher.dispatch(&frame);
        }
    }

    /// Feed one inbound frame; returns an outcome when it ended the exchange
    pub fn handle_inbound(&mut self, frame: InboundFrame) -> Option<ExchangeOutcome> {
        match self.dispatcher.dispatch(&frame) {
            Dispatch::Status {
                message,
                generating,
            } => {
                self.core.on_status(message, generating);
                None
            }
            Dispatch::Chunk { text, progress } => {
                self.core.on_chunk(text, progress);
                None
            }
            Dispatch::Final {
                text,
                session_id,
                sources,
                ..
            } => self.core.complete(text, session_id, sources),
            Dispatch::Failed { message, .. } => self.core.fail(Error::Remote(message)),
            Dispatch::Liveness
            | Dispatch::Stale
            | Dispatch::Orphan
            | Dispatch::Ignored
            | Dispatch::Malformed => None,
        }
    }

    /// Process frames until the exchange in flight ends
    ///
    /// Returns `None` when nothing is in flight.
    pub async fn next_outcome(&mut self) -> Option<ExchangeOutcome> {
        let (instance, started_at) = {
            let exchange = self.core.in_flight()?;
            (exchange.instance, exchange.started_at)
        };
        let deadline = started_at + self.exchange_timeout;

        loop {
            if self.states.borrow_and_update().instance != instance {
                return self.settle_lost();
            }

            tokio::select! {
                frame = self.inbound.recv() => match frame {
                    Some(frame) => {
                        if let Some(outcome) = self.handle_inbound(frame) {
                            return Some(outcome);
                        }
                    }
                    None => return self.abandon(Error::TransportLoss),
                },
                changed = self.states.changed() => {
                    if changed.is_err() {
                        return self.settle_lost();
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return self.abandon(Error::Timeout(self.exchange_timeout));
                }
            }
        }
    }

    /// The exchange's transport is gone; frames it delivered before dropping still count
    fn settle_lost(&mut self) -> Option<ExchangeOutcome> {
        while let Ok(frame) = self.inbound.try_recv() {
            if let Some(outcome) = self.handle_inbound(frame) {
                return Some(outcome);
            }
        }
        self.abandon(Error::TransportLoss)
    }

    fn abandon(&mut self, error: Error) -> Option<ExchangeOutcome> {
        self.dispatcher.abandon();
        self.core.fail(error)
    }

    /// Detach from the active session
    pub fn new_chat(&mut self) {
        self.core.new_chat();
    }

    pub fn load_session(&mut self, id: &str) -> bool {
        self.core.load_session(id)
    }

    /// Forget a session; deleting the active one also drops the exchange in flight
    pub fn delete_session(&mut self, id: &str) -> Removal {
        let removal = self.core.delete_session(id);
        if removal == Removal::RemovedActive && self.dispatcher.abandon().is_some() {
            self.core.in_flight = None;
            tracing::info!(session_id = id, "Dropped exchange of deleted session");
        }
        removal
    }
}

/// Runs exchanges over `POST /chat`
pub struct RestCoordinator {
    client: RagClient,
    core: ExchangeCore,
    exchange_timeout: Duration,
}

impl RestCoordinator {
    pub fn new(client: RagClient, core: ExchangeCore, exchange_timeout: Duration) -> Self {
        Self {
            client,
            core,
            exchange_timeout,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        self.core.conversation()
    }

    /// Run one exchange to completion
    pub async fn send(&mut self, text: &str) -> Result<ExchangeOutcome> {
        self.core.admit(text)?;
        let text = text.trim();
        let request = ChatRequest {
            message: text.to_string(),
            session_id: self.core.conversation().active_session_id().map(str::to_string),
        };
        let id = self.core.start(text, None);

        let outcome = match tokio::time::timeout(self.exchange_timeout, self.client.chat(&request)).await {
            Ok(Ok(reply)) => self
                .core
                .complete(reply.response, Some(reply.session_id), reply.sources),
            Ok(Err(lore_proto::Error::Api { message, .. })) => self.core.fail(Error::Remote(message)),
            Ok(Err(e)) => self.core.fail(Error::Proto(e)),
            Err(_) => self.core.fail(Error::Timeout(self.exchange_timeout)),
        };
        outcome.ok_or_else(|| Error::Store(format!("exchange {} vanished", id)))
    }

    pub fn new_chat(&mut self) {
        self.core.new_chat();
    }

    pub fn load_session(&mut self, id: &str) -> bool {
        self.core.load_session(id)
    }

    pub fn delete_session(&mut self, id: &str) -> Removal {
        self.core.delete_session(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::KeywordClassifier;
    use crate::config::ConnectionConfig;
    use crate::gate::{GateDecision, StaticConfirmer};
    use crate::store::ArtifactStore;
    use crate::testing::{
        ChannelConnector, MemoryDownloads, MockSimilarity, ServerEnd, report, wait_for_state,
    };
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        _dir: TempDir,
        store: Arc<ArtifactStore>,
        service: Arc<MockSimilarity>,
        events: broadcast::Receiver<ClientEvent>,
        core: Option<ExchangeCore>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path().join("artifacts.json")).unwrap());
        let service = Arc::new(MockSimilarity::new(Ok(report(true))));
        let (tx, events) = broadcast::channel(256);
        let pipeline = PersistencePipeline::new(
            service.clone(),
            store.clone(),
            Arc::new(StaticConfirmer(GateDecision::Reject)),
            Arc::new(MemoryDownloads::default()),
            tx.clone(),
        );
        let core = ExchangeCore::new(
            Conversation::new(30, 50),
            Arc::new(KeywordClassifier::default()),
            pipeline,
            tx,
        );
        Fixture {
            _dir: dir,
            store,
            service,
            events,
            core: Some(core),
        }
    }

    fn fast_connection() -> ConnectionConfig {
        ConnectionConfig {
            reconnect_delay: Duration::from_millis(100),
            liveness_grace: Duration::from_secs(1),
        }
    }

    async fn connected(
        fx: &mut Fixture,
        timeout: Duration,
    ) -> (Coordinator, ServerEnd, mpsc::UnboundedReceiver<ServerEnd>) {
        let (connector, mut accepted) = ChannelConnector::new();
        let (connection, inbound) = ConnectionManager::new(connector, fast_connection());
        let mut coordinator =
            Coordinator::new(connection, inbound, fx.core.take().unwrap(), timeout);
        let mut states = coordinator.subscribe_state();
        coordinator.open();
        let server = accepted.recv().await.unwrap();
        wait_for_state(&mut states, ConnectionState::Connected).await;
        (coordinator, server, accepted)
    }

    fn events(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    // ===== Admission =====

    #[tokio::test]
    async fn test_empty_input_is_refused() {
        let mut fx = fixture();
        let (mut coordinator, _server, _accepted) = connected(&mut fx, Duration::from_secs(5)).await;

        assert!(matches!(coordinator.submit("   \n"), Err(Error::EmptyInput)));
        assert!(coordinator.in_flight().is_none());
    }

    #[tokio::test]
    async fn test_not_ready_before_connected() {
        let mut fx = fixture();
        let (connector, _accepted) = ChannelConnector::new();
        let (connection, inbound) = ConnectionManager::new(connector, fast_connection());
        let mut coordinator =
            Coordinator::new(connection, inbound, fx.core.take().unwrap(), Duration::from_secs(5));

        assert!(matches!(coordinator.submit("Bonjour"), Err(Error::NotReady)));
        assert!(coordinator.in_flight().is_none());
        assert!(coordinator.conversation().thread().is_empty());
    }

    #[tokio::test]
    async fn test_second_submit_is_busy() {
        let mut fx = fixture();
        let (mut coordinator, mut server, _accepted) =
            connected(&mut fx, Duration::from_secs(5)).await;

        let id = coordinator.submit("Première question").unwrap();
        server.send(json!({"type": "streaming_response", "chunk": "Par", "progress": 20.0}));
        let frame = tokio::time::timeout(Duration::from_secs(1), coordinator.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(coordinator.handle_inbound(frame).is_none());

        assert!(matches!(coordinator.submit("Deuxième question"), Err(Error::Busy)));

        let exchange = coordinator.in_flight().unwrap();
        assert_eq!(exchange.id, id);
        assert_eq!(exchange.request, "Première question");
        assert_eq!(exchange.partial(), Some("Par"));
        assert_eq!(exchange.progress(), 20);
        assert_eq!(coordinator.conversation().thread().len(), 1);

        let request = server.recv_request().await;
        assert_eq!(request["message"], "Première question");
        coordinator.close().await;
    }

    // ===== Streaming =====

    #[tokio::test]
    async fn test_chunks_are_exposed_as_replacements() {
        let mut fx = fixture();
        let (mut coordinator, server, _accepted) = connected(&mut fx, Duration::from_secs(5)).await;

        coordinator.submit("Raconte une histoire").unwrap();
        server.send(json!({"type": "status", "status": "generating", "message": "Génération..."}));
        for (chunk, progress) in [("A", 33.3), ("AB", 66.6), ("ABC", 100.0)] {
            server.send(json!({"type": "streaming_response", "session_id": "s1", "chunk": chunk, "progress": progress, "is_final": false}));
        }
        server.send(json!({"type": "chat_response", "session_id": "s1", "response": "ABC", "sources": []}));

        let outcome = coordinator.next_outcome().await.unwrap();
        assert!(matches!(outcome, ExchangeOutcome::Completed { ref text, .. } if text == "ABC"));

        let partials: Vec<(String, u8)> = events(&mut fx.events)
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::Partial { text, progress } => Some((text, progress)),
                _ => None,
            })
            .collect();
        assert_eq!(
            partials,
            vec![("A".into(), 33), ("AB".into(), 67), ("ABC".into(), 100)]
        );
        assert!(coordinator.in_flight().is_none());
        coordinator.close().await;
    }

    #[tokio::test]
    async fn test_final_without_streaming() {
        let mut fx = fixture();
        let (mut coordinator, server, _accepted) = connected(&mut fx, Duration::from_secs(5)).await;

        coordinator.submit("Bonjour").unwrap();
        server.send(json!({"type": "chat_response", "session_id": "s9", "response": "Salut !"}));

        match coordinator.next_outcome().await.unwrap() {
            ExchangeOutcome::Completed {
                text,
                session,
                persistence,
                ..
            } => {
                assert_eq!(text, "Salut !");
                assert!(matches!(session, Some(SessionChange::Created(ref s)) if s.id == "s9"));
                assert!(persistence.is_none());
            }
            other => panic!("Expected Completed, got {:?}", other),
        }
        assert_eq!(coordinator.next_outcome().await.map(|o| o.exchange_id()), None);
        coordinator.close().await;
    }

    #[tokio::test]
    async fn test_bagdad_scenario_end_to_end() {
        let mut fx = fixture();
        let (mut coordinator, mut server, _accepted) =
            connected(&mut fx, Duration::from_secs(5)).await;

        coordinator.submit("Crée un scénario à Bagdad").unwrap();
        let request = server.recv_request().await;
        assert_eq!(request["type"], "chat");
        assert_eq!(request["message"], "Crée un scénario à Bagdad");
        assert!(request.get("session_id").is_none());

        server.send(json!({"type": "chat_response", "response": "## Scénario...", "session_id": "s1", "sources": []}));

        let ExchangeOutcome::Completed {
            session,
            persistence,
            ..
        } = coordinator.next_outcome().await.unwrap()
        else {
            panic!("exchange failed");
        };

        match session {
            Some(SessionChange::Created(s)) => {
                assert_eq!(s.id, "s1");
                assert_eq!(s.label, "Crée un scénario à Bagdad");
            }
            other => panic!("Expected a new session, got {:?}", other),
        }
        assert_eq!(coordinator.conversation().active_session_id(), Some("s1"));

        let outcome = persistence.expect("persistence should trigger").await.unwrap();
        assert!(matches!(outcome, PersistOutcome::Saved { .. }));
        assert_eq!(fx.service.checks(), 1);
        assert_eq!(fx.store.len(), 1);

        // Follow-up requests carry the session id
        coordinator.submit("Ajoute un indice").unwrap();
        let follow_up = server.recv_request().await;
        assert_eq!(follow_up["session_id"], "s1");
        coordinator.close().await;
    }

    #[tokio::test]
    async fn test_error_frame_fails_without_touching_sessions() {
        let mut fx = fixture();
        let (mut coordinator, server, _accepted) = connected(&mut fx, Duration::from_secs(5)).await;

        coordinator.submit("Bonjour").unwrap();
        server.send(json!({"type": "error", "error": "Message vide"}));

        match coordinator.next_outcome().await.unwrap() {
            ExchangeOutcome::Failed { error, .. } => {
                assert!(matches!(error, Error::Remote(ref m) if m == "Message vide"));
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
        assert!(coordinator.conversation().sessions().is_empty());
        assert!(coordinator.conversation().thread().last().unwrap().is_error);

        // Guard released
        coordinator.submit("Encore").unwrap();
        coordinator.close().await;
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames_are_skipped() {
        let mut fx = fixture();
        let (mut coordinator, server, _accepted) = connected(&mut fx, Duration::from_secs(5)).await;

        coordinator.submit("Bonjour").unwrap();
        server.send_raw("{garbage");
        server.send(json!({"type": "heartbeat_v2"}));
        server.send(json!({"type": "pong"}));
        server.send(json!({"type": "chat_response", "session_id": "s1", "response": "ok"}));

        assert!(matches!(
            coordinator.next_outcome().await.unwrap(),
            ExchangeOutcome::Completed { ref text, .. } if text == "ok"
        ));
        assert_eq!(coordinator.state(), ConnectionState::Connected);
        coordinator.close().await;
    }

    // ===== Failure modes =====

    #[tokio::test]
    async fn test_transport_loss_resolves_exchange() {
        let mut fx = fixture();
        let (mut coordinator, server, mut accepted) =
            connected(&mut fx, Duration::from_secs(5)).await;

        coordinator.submit("Bonjour").unwrap();
        server.send(json!({"type": "streaming_response", "chunk": "Bon", "progress": 10.0}));
        drop(server);

        assert!(matches!(
            coordinator.next_outcome().await.unwrap(),
            ExchangeOutcome::Failed { error: Error::TransportLoss, .. }
        ));
        assert!(coordinator.in_flight().is_none());

        // Reconnects on its own and accepts new work
        let _server = accepted.recv().await.unwrap();
        let mut states = coordinator.subscribe_state();
        wait_for_state(&mut states, ConnectionState::Connected).await;
        coordinator.submit("Bonjour ?").unwrap();
        coordinator.close().await;
    }

    #[tokio::test]
    async fn test_reply_received_before_disconnect_completes() {
        let mut fx = fixture();
        let (mut coordinator, server, _accepted) = connected(&mut fx, Duration::from_secs(5)).await;

        coordinator.submit("Bonjour").unwrap();
        server.send(json!({"type": "streaming_response", "chunk": "Sal", "progress": 50.0}));
        server.send(json!({"type": "chat_response", "session_id": "s1", "response": "Salut"}));
        drop(server);
        tokio::time::sleep(Duration::from_millis(50)).await;

        match coordinator.next_outcome().await.unwrap() {
            ExchangeOutcome::Completed { text, session, .. } => {
                assert_eq!(text, "Salut");
                assert!(matches!(session, Some(SessionChange::Created(ref s)) if s.id == "s1"));
            }
            other => panic!("Expected Completed, got {:?}", other),
        }
        assert!(coordinator.in_flight().is_none());
        assert_eq!(coordinator.conversation().active_session_id(), Some("s1"));
        coordinator.close().await;
    }

    #[tokio::test]
    async fn test_frames_from_previous_instance_are_discarded() {
        let mut fx = fixture();
        let (mut coordinator, server, mut accepted) =
            connected(&mut fx, Duration::from_secs(5)).await;
        drop(server);

        let server = accepted.recv().await.unwrap();
        let mut states = coordinator.subscribe_state();
        wait_for_state(&mut states, ConnectionState::Connected).await;
        coordinator.submit("Bonjour").unwrap();
        assert_eq!(coordinator.in_flight().unwrap().instance, Some(2));

        let stale = InboundFrame {
            instance: 1,
            text: json!({"type": "chat_response", "session_id": "old", "response": "périmé"}).to_string(),
        };
        assert!(coordinator.handle_inbound(stale).is_none());
        assert!(coordinator.in_flight().is_some());

        server.send(json!({"type": "chat_response", "session_id": "s2", "response": "frais"}));
        assert!(matches!(
            coordinator.next_outcome().await.unwrap(),
            ExchangeOutcome::Completed { ref text, .. } if text == "frais"
        ));
        coordinator.close().await;
    }

    #[tokio::test]
    async fn test_frames_received_while_idle_do_not_leak() {
        let mut fx = fixture();
        let (mut coordinator, server, _accepted) = connected(&mut fx, Duration::from_secs(5)).await;

        server.send(json!({"type": "chat_response", "session_id": "x", "response": "orphelin"}));
        tokio::time::sleep(Duration::from_millis(50)).await;

        coordinator.submit("Bonjour").unwrap();
        server.send(json!({"type": "chat_response", "session_id": "s1", "response": "attendu"}));

        assert!(matches!(
            coordinator.next_outcome().await.unwrap(),
            ExchangeOutcome::Completed { ref text, .. } if text == "attendu"
        ));
        coordinator.close().await;
    }

    #[tokio::test]
    async fn test_exchange_timeout() {
        let mut fx = fixture();
        let (mut coordinator, _server, _accepted) =
            connected(&mut fx, Duration::from_millis(200)).await;

        coordinator.submit("Bonjour").unwrap();
        assert!(matches!(
            coordinator.next_outcome().await.unwrap(),
            ExchangeOutcome::Failed { error: Error::Timeout(_), .. }
        ));
        assert!(coordinator.in_flight().is_none());
        coordinator.submit("Toujours là ?").unwrap();
        coordinator.close().await;
    }

    #[tokio::test]
    async fn test_close_fails_exchange_in_flight() {
        let mut fx = fixture();
        let (mut coordinator, _server, _accepted) = connected(&mut fx, Duration::from_secs(5)).await;

        coordinator.submit("Bonjour").unwrap();
        assert!(matches!(
            coordinator.close().await,
            Some(ExchangeOutcome::Failed { error: Error::TransportLoss, .. })
        ));
        assert_eq!(coordinator.state(), ConnectionState::Disconnected);
    }

    // ===== Sessions =====

    #[tokio::test]
    async fn test_deleting_active_session_drops_exchange() {
        let mut fx = fixture();
        let (mut coordinator, server, _accepted) = connected(&mut fx, Duration::from_secs(5)).await;

        coordinator.submit("Bonjour").unwrap();
        server.send(json!({"type": "chat_response", "session_id": "s1", "response": "Salut"}));
        coordinator.next_outcome().await.unwrap();

        coordinator.submit("Et ensuite ?").unwrap();
        assert_eq!(coordinator.delete_session("s1"), Removal::RemovedActive);
        assert!(coordinator.in_flight().is_none());
        assert!(coordinator.conversation().active_session_id().is_none());
        assert!(events(&mut fx.events)
            .iter()
            .any(|e| matches!(e, ClientEvent::SessionDeleted { session_id } if session_id == "s1")));
        coordinator.close().await;
    }

    // ===== REST flavour =====

    #[tokio::test]
    async fn test_rest_exchange_creates_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "Bonjour ! Que puis-je faire ?",
                "session_id": "rest-1",
                "sources": [{"id": 1, "source": "guide.pdf", "path": "docs/guide.pdf", "content_preview": "..."}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut fx = fixture();
        let client = RagClient::new(server.uri()).unwrap();
        let mut coordinator =
            RestCoordinator::new(client, fx.core.take().unwrap(), Duration::from_secs(5));

        match coordinator.send("Bonjour").await.unwrap() {
            ExchangeOutcome::Completed {
                sources, session, ..
            } => {
                assert_eq!(sources.len(), 1);
                assert!(matches!(session, Some(SessionChange::Created(ref s)) if s.id == "rest-1"));
            }
            other => panic!("Expected Completed, got {:?}", other),
        }
        assert_eq!(coordinator.conversation().active_session_id(), Some("rest-1"));
    }

    #[tokio::test]
    async fn test_rest_error_status_is_remote_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(json!({"detail": "Agent RAG non initialisé"})),
            )
            .mount(&server)
            .await;

        let mut fx = fixture();
        let client = RagClient::new(server.uri()).unwrap();
        let mut coordinator =
            RestCoordinator::new(client, fx.core.take().unwrap(), Duration::from_secs(5));

        match coordinator.send("Bonjour").await.unwrap() {
            ExchangeOutcome::Failed { error, .. } => {
                assert!(matches!(error, Error::Remote(ref m) if m == "Agent RAG non initialisé"));
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
        assert!(coordinator.conversation().sessions().is_empty());
        assert!(matches!(coordinator.send("").await, Err(Error::EmptyInput)));
    }
}
