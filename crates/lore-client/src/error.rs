//! Error types for lore-client

use std::time::Duration;

use thiserror::Error;

/// Result type alias using lore-client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving exchanges and persisting artifacts
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the wire layer
    #[error(transparent)]
    Proto(#[from] lore_proto::Error),

    /// The transport is not connected; the request was refused before sending
    #[error("Not connected to the service")]
    NotReady,

    /// An exchange is already in flight
    #[error("A request is already in flight")]
    Busy,

    /// The submitted input was empty or whitespace
    #[error("Refusing to send an empty message")]
    EmptyInput,

    /// The service reported a failure for this exchange
    #[error("Service error: {0}")]
    Remote(String),

    /// The connection dropped before the exchange completed
    #[error("Connection lost before the response completed")]
    TransportLoss,

    /// No terminal frame arrived in time
    #[error("No response after {0:?}")]
    Timeout(Duration),

    /// An artifact with this id already exists in the store
    #[error("Artifact already exists: {0}")]
    DuplicateArtifact(String),

    /// The artifact store could not be read or written
    #[error("Artifact store error: {0}")]
    Store(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
