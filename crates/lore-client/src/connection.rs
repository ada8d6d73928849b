//! Connection lifecycle for the streaming channel
//!
//! The [`ConnectionManager`] owns one transport at a time. A background driver
//! dials, pumps frames in both directions and, when the transport goes away
//! without an explicit [`ConnectionManager::close`], waits a fixed delay and
//! dials again. State changes are published on a `watch` channel so
//! dependents react to transitions instead of polling.
//!
//! Every transport instance gets a fresh [`InstanceId`]; inbound frames carry
//! the id of the instance that received them.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use futures::{SinkExt, StreamExt};
use lore_proto::{ClientFrame, Connector, Socket, frame};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};

/// Identifies one transport instance within a manager's lifetime
pub type InstanceId = u64;

/// Transport health as observed by dependents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Inputs to the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt starts
    Dial,
    /// The transport is established
    Open,
    /// The transport went away on its own
    Loss,
    /// Explicit shutdown
    Close,
    /// The attempt or the live transport failed
    Error,
}

impl ConnectionState {
    /// Apply an event; combinations that make no sense leave the state alone
    pub fn apply(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (_, E::Close) => S::Disconnected,
            (S::Disconnected | S::Error, E::Dial) => S::Connecting,
            (S::Connecting, E::Open) => S::Connected,
            (S::Connecting | S::Connected, E::Error) => S::Error,
            (S::Connected | S::Error, E::Loss) => S::Disconnected,
            (state, _) => state,
        }
    }
}

/// State plus the instance that is live while connected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub instance: Option<InstanceId>,
}

impl ConnectionSnapshot {
    fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            instance: None,
        }
    }
}

/// A raw inbound frame tagged with the instance that received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub instance: InstanceId,
    pub text: String,
}

struct Outbound {
    instance: InstanceId,
    tx: mpsc::UnboundedSender<String>,
}

struct Shared {
    state_tx: watch::Sender<ConnectionSnapshot>,
    outbound: Mutex<Option<Outbound>>,
    inbound_tx: mpsc::UnboundedSender<InboundFrame>,
    instances: AtomicU64,
}

impl Shared {
    fn transition(&self, event: ConnectionEvent, instance: Option<InstanceId>) {
        self.state_tx.send_if_modified(|snapshot| {
            let next = snapshot.state.apply(event);
            let instance = if next == ConnectionState::Connected {
                instance
            } else {
                None
            };
            if next == snapshot.state && instance == snapshot.instance {
                return false;
            }
            tracing::debug!(?event, from = ?snapshot.state, to = ?next, "Connection transition");
            snapshot.state = next;
            snapshot.instance = instance;
            true
        });
    }

    fn next_instance(&self) -> InstanceId {
        self.instances.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn clear_outbound(&self, instance: InstanceId) {
        let mut outbound = self.outbound.lock();
        if outbound.as_ref().is_some_and(|o| o.instance == instance) {
            *outbound = None;
        }
    }
}

/// Owns the streaming transport and its reconnect loop
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create a manager; inbound frames are delivered on the returned receiver
    pub fn new(
        connector: Arc<dyn Connector>,
        config: ConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<InboundFrame>) {
        let (state_tx, _) = watch::channel(ConnectionSnapshot::disconnected());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state_tx,
            outbound: Mutex::new(None),
            inbound_tx,
            instances: AtomicU64::new(0),
        });
        (
            Self {
                connector,
                config,
                shared,
                cancel: CancellationToken::new(),
                driver: None,
            },
            inbound_rx,
        )
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.shared.state_tx.subscribe()
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().state
    }

    /// Current state and live instance
    pub fn snapshot(&self) -> ConnectionSnapshot {
        *self.shared.state_tx.borrow()
    }

    /// Start establishing the transport; no-op if the driver is already running
    pub fn open(&mut self) {
        if self.driver.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        let driver = Driver {
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            cancel: self.cancel.clone(),
        };
        self.driver = Some(tokio::spawn(driver.run()));
    }

    /// Queue a frame on the live transport
    ///
    /// Returns the instance the frame was handed to.
    pub fn send(&self, frame: &ClientFrame) -> Result<InstanceId> {
        let text = frame.encode()?;
        if self.state() != ConnectionState::Connected {
            return Err(Error::NotReady);
        }
        let outbound = self.shared.outbound.lock();
        match outbound.as_ref() {
            Some(out) => out
                .tx
                .send(text)
                .map(|_| out.instance)
                .map_err(|_| Error::NotReady),
            None => Err(Error::NotReady),
        }
    }

    /// Tear the transport down and cancel any pending reconnect
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.driver.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Connection driver ended abnormally: {}", e);
            }
        }
        self.shared.outbound.lock().take();
        self.shared.transition(ConnectionEvent::Close, None);
        tracing::info!("Connection closed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum PumpEnd {
    Cancelled,
    Lost,
    Failed(lore_proto::Error),
}

struct Driver {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(self) {
        let endpoint = self.connector.endpoint().to_string();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.shared.transition(ConnectionEvent::Dial, None);
            tracing::info!("Connecting to {}", endpoint);

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect() => result,
            };

            match attempt {
                Ok(socket) => {
                    let instance = self.shared.next_instance();
                    match self.pump(socket, instance).await {
                        PumpEnd::Cancelled => break,
                        PumpEnd::Lost => {
                            tracing::info!(instance, "Connection to {} lost", endpoint);
                            self.shared.transition(ConnectionEvent::Loss, None);
                        }
                        PumpEnd::Failed(e) => {
                            tracing::warn!(instance, "Connection to {} failed: {}", endpoint, e);
                            self.shared.transition(ConnectionEvent::Error, None);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Could not connect to {}: {}", endpoint, e);
                    self.shared.transition(ConnectionEvent::Error, None);
                }
            }

            tracing::debug!("Reconnecting in {:?}", self.config.reconnect_delay);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn pump(&self, socket: Socket, instance: InstanceId) -> PumpEnd {
        let Socket {
            mut sink,
            mut stream,
        } = socket;
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        *self.shared.outbound.lock() = Some(Outbound {
            instance,
            tx: out_tx,
        });
        self.shared
            .transition(ConnectionEvent::Open, Some(instance));
        tracing::info!(instance, "Connected to {}", self.connector.endpoint());

        match ClientFrame::Ping.encode() {
            Ok(ping) => {
                if let Err(e) = sink.send(ping).await {
                    self.shared.clear_outbound(instance);
                    return PumpEnd::Failed(e);
                }
            }
            Err(e) => tracing::warn!("Could not encode liveness probe: {}", e),
        }

        let grace = self.config.liveness_grace;
        let liveness = tokio::time::sleep(grace);
        tokio::pin!(liveness);
        let mut awaiting_ack = true;

        let end = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.close().await;
                    break PumpEnd::Cancelled;
                }
                Some(text) = out_rx.recv() => {
                    if let Err(e) = sink.send(text).await {
                        break PumpEnd::Failed(e);
                    }
                }
                message = stream.next() => match message {
                    Some(Ok(text)) => {
                        if awaiting_ack && frame::is_pong(&text) {
                            awaiting_ack = false;
                            tracing::debug!(instance, "Liveness acknowledged");
                        }
                        if self.shared.inbound_tx.send(InboundFrame { instance, text }).is_err() {
                            tracing::debug!("Inbound receiver dropped, discarding frame");
                        }
                    }
                    Some(Err(e)) => break PumpEnd::Failed(e),
                    None => break PumpEnd::Lost,
                },
                () = &mut liveness, if awaiting_ack => {
                    awaiting_ack = false;
                    tracing::warn!(instance, "No liveness acknowledgement within {:?}", grace);
                }
            }
        };

        self.shared.clear_outbound(instance);
        end
    }
}
