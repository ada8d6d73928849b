//! lore-client: session-correlated streaming client for the lore RAG service
//!
//! This crate manages the streaming connection, correlates inbound frames
//! with the exchange in flight, keeps conversation sessions, and gates
//! generated artifacts through a remote similarity check before they reach
//! the local library.

pub mod accumulator;
pub mod classify;
pub mod config;
pub mod connection;
pub mod context;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gate;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use accumulator::StreamAccumulator;
pub use classify::{ArtifactClassifier, KeywordClassifier, extract_title};
pub use config::{ClassifierConfig, ClientConfig, ConnectionConfig};
pub use connection::{ConnectionManager, ConnectionSnapshot, ConnectionState, InboundFrame, InstanceId};
pub use context::ClientContext;
pub use coordinator::{Coordinator, Exchange, ExchangeCore, ExchangeOutcome, RestCoordinator};
pub use dispatch::{Dispatch, Dispatcher};
pub use error::{Error, Result};
pub use events::ClientEvent;
pub use gate::{
    ChannelConfirmer, DirectoryDownloads, DownloadSink, Draft, DuplicateConfirmer, GateDecision,
    PendingDecision, PersistOutcome, PersistencePipeline, SimilarityService, StaticConfirmer,
    Verdict, VerdictMatch,
};
pub use session::{ChatMessage, Conversation, ConversationSession, Removal, Role, SessionChange};
pub use store::{Artifact, ArtifactStore, StoredPayload};
