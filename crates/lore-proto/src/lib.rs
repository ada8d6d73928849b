//! lore-proto: wire layer for the lore RAG service
//!
//! This crate provides the streaming frame codec, the REST request/response
//! types, a REST client and a WebSocket connector. It holds no session state.

pub mod error;
pub mod frame;
pub mod http;
pub mod types;
pub mod ws;

pub use error::{Error, Result};
pub use frame::{ClientFrame, ServerFrame};
pub use http::RagClient;
pub use types::*;
pub use ws::{Connector, FrameSink, FrameStream, Socket, WebSocketConnector};
