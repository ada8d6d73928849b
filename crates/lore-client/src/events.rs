//! Client event types

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionState;

/// Events emitted while exchanges run and artifacts are persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The transport changed state
    ConnectionChanged { state: ConnectionState },

    /// A request was sent
    ExchangeStarted { exchange_id: u64 },

    /// Free-text progress from the service
    Status { message: String, generating: bool },

    /// Latest cumulative snapshot of the response
    Partial { text: String, progress: u8 },

    /// The exchange finished with a response
    ExchangeCompleted { exchange_id: u64, text: String },

    /// The exchange finished with a failure
    ExchangeFailed { exchange_id: u64, message: String },

    /// A conversation session was created
    SessionCreated { session_id: String, label: String },

    /// A conversation session saw new activity
    SessionUpdated { session_id: String, summary: String },

    /// A conversation session was deleted
    SessionDeleted { session_id: String },

    /// A response was recognised as an artifact and is being checked
    PersistenceStarted { title: String },

    /// Similar artifacts exist; waiting for the user to decide
    PersistenceDeferred { title: String, matches: Vec<String> },

    /// An artifact was written to the library
    ArtifactSaved { artifact_id: String, title: String },

    /// The user discarded the artifact
    PersistenceCancelled { title: String },

    /// The persistence step failed; the chat turn is unaffected
    PersistenceFailed { title: String, message: String },
}

impl ClientEvent {
    /// Whether this event ends an exchange
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClientEvent::ExchangeCompleted { .. } | ClientEvent::ExchangeFailed { .. }
        )
    }
}
