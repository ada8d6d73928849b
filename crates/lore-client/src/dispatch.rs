//! Inbound frame classification and exchange correlation
//!
//! The [`Dispatcher`] decodes raw frames and decides what each one means for
//! the exchange currently in flight. It owns the "awaiting response" flag:
//! the first terminal frame (`chat_response` or `error`) from the exchange's
//! transport instance clears it, so frames after a terminal frame can never
//! bleed into the finished exchange.

use lore_proto::{Citation, ServerFrame, frame};

use crate::connection::{InboundFrame, InstanceId};

/// What a frame means for the exchange in flight
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Liveness acknowledgement
    Liveness,
    /// Progress annotation
    Status { message: String, generating: bool },
    /// Cumulative snapshot of the response
    Chunk { text: String, progress: u8 },
    /// Terminal frame with the full response
    Final {
        exchange_id: u64,
        text: String,
        session_id: Option<String>,
        sources: Vec<Citation>,
    },
    /// Terminal frame with a failure
    Failed { exchange_id: u64, message: String },
    /// Received on a transport instance other than the exchange's
    Stale,
    /// Exchange-bound frame while nothing is in flight
    Orphan,
    /// Frame type this client does not know
    Ignored,
    /// Frame could not be decoded
    Malformed,
}

#[derive(Debug, Clone, Copy)]
struct Awaiting {
    exchange_id: u64,
    instance: InstanceId,
}

/// Routes inbound frames to the exchange in flight
#[derive(Debug, Default)]
pub struct Dispatcher {
    awaiting: Option<Awaiting>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an exchange as in flight on the given transport instance
    pub fn begin(&mut self, exchange_id: u64, instance: InstanceId) {
        if let Some(previous) = self.awaiting {
            tracing::warn!(
                previous = previous.exchange_id,
                exchange_id,
                "Replacing an exchange that never saw a terminal frame"
            );
        }
        self.awaiting = Some(Awaiting {
            exchange_id,
            instance,
        });
    }

    /// Stop waiting without a terminal frame (transport loss, timeout)
    pub fn abandon(&mut self) -> Option<u64> {
        self.awaiting.take().map(|a| a.exchange_id)
    }

    /// Classify one inbound frame
    pub fn dispatch(&mut self, inbound: &InboundFrame) -> Dispatch {
        let frame = match ServerFrame::decode(&inbound.text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(instance = inbound.instance, "Dropping frame: {}", e);
                return Dispatch::Malformed;
            }
        };

        match frame {
            ServerFrame::Pong => return Dispatch::Liveness,
            ServerFrame::Unknown => {
                tracing::debug!("Ignoring frame of unknown type");
                return Dispatch::Ignored;
            }
            _ => {}
        }

        let Some(awaiting) = self.awaiting else {
            tracing::debug!(instance = inbound.instance, "Frame with no exchange in flight");
            return Dispatch::Orphan;
        };
        if awaiting.instance != inbound.instance {
            tracing::debug!(
                expected = awaiting.instance,
                got = inbound.instance,
                "Discarding frame from another connection"
            );
            return Dispatch::Stale;
        }

        if frame.is_terminal() {
            self.awaiting = None;
        }
        let generating = frame.is_generating();
        match frame {
            ServerFrame::Status { status, message } => Dispatch::Status {
                message: message.or(status).unwrap_or_default(),
                generating,
            },
            ServerFrame::StreamingResponse {
                chunk, progress, ..
            } => Dispatch::Chunk {
                text: chunk,
                progress: frame::progress_percent(progress),
            },
            ServerFrame::ChatResponse {
                session_id,
                response,
                sources,
            } => Dispatch::Final {
                exchange_id: awaiting.exchange_id,
                text: response,
                session_id,
                sources,
            },
            error @ ServerFrame::Error { .. } => Dispatch::Failed {
                exchange_id: awaiting.exchange_id,
                message: error.error_text().unwrap_or_default(),
            },
            ServerFrame::Pong | ServerFrame::Unknown => Dispatch::Ignored,
        }
    }
}
