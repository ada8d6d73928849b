//! In-memory doubles shared by the unit tests

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use lore_proto::{Connector, MatchKind, SimilarityMatch, SimilarityReport, Socket};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};

use crate::connection::{ConnectionSnapshot, ConnectionState};
use crate::error::Result;
use crate::gate::{DownloadSink, SimilarityService};

/// Server side of one in-memory connection
pub(crate) struct ServerEnd {
    from_client: fmpsc::UnboundedReceiver<String>,
    to_client: fmpsc::UnboundedSender<lore_proto::Result<String>>,
}

impl ServerEnd {
    /// Next frame the client sent, parsed
    pub async fn recv_json(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(2), self.from_client.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client side closed");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Next frame the client sent, skipping liveness probes
    pub async fn recv_request(&mut self) -> Value {
        loop {
            let frame = self.recv_json().await;
            if frame["type"] != "ping" {
                return frame;
            }
        }
    }

    pub fn send(&self, frame: Value) {
        self.send_raw(&frame.to_string());
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.to_client.unbounded_send(Ok(text.to_string()));
    }
}

/// Connector that hands the server end of each connection to the test
pub(crate) struct ChannelConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl ChannelConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                accepted,
                failures: AtomicUsize::new(0),
                attempts: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    /// Make the next `n` connection attempts fail
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self) -> lore_proto::Result<Socket> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(lore_proto::Error::ConnectionClosed);
        }

        let (c2s_tx, c2s_rx) = fmpsc::unbounded::<String>();
        let (s2c_tx, s2c_rx) = fmpsc::unbounded::<lore_proto::Result<String>>();
        let _ = self.accepted.send(ServerEnd {
            from_client: c2s_rx,
            to_client: s2c_tx,
        });

        Ok(Socket {
            sink: Box::pin(c2s_tx.sink_map_err(|_| lore_proto::Error::ConnectionClosed)),
            stream: Box::pin(s2c_rx),
        })
    }

    fn endpoint(&self) -> &str {
        "memory://lore"
    }
}

/// Wait (bounded) until the connection reaches `state`
pub(crate) async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionSnapshot>,
    state: ConnectionState,
) {
    tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}", state))
        .expect("connection manager dropped");
}

/// A similarity report with one close match and a rendered payload
pub(crate) fn report(can_auto_embed: bool) -> SimilarityReport {
    let close = SimilarityMatch {
        scenario: json!({"title": "Le Trésor d'Ispahan", "id": "42"}),
        similarity_score: 0.86,
        is_duplicate: false,
        similarity_type: MatchKind::Semantic,
    };
    let far = SimilarityMatch {
        scenario: json!("Les Mines de Moria"),
        similarity_score: 0.42,
        is_duplicate: false,
        similarity_type: MatchKind::Semantic,
    };
    SimilarityReport {
        has_duplicates: !can_auto_embed,
        similarities: vec![close.clone(), far],
        high_similarities: if can_auto_embed { vec![] } else { vec![close] },
        similarity_threshold: 0.8,
        can_auto_embed,
        pdf_data: Some(STANDARD.encode(b"%PDF-1.4")),
        pdf_filename: Some("tresor.pdf".into()),
    }
}

/// Scripted similarity service
pub(crate) struct MockSimilarity {
    report: std::result::Result<SimilarityReport, String>,
    fail_embed: bool,
    checks: AtomicUsize,
    embeds: AtomicUsize,
}

impl MockSimilarity {
    pub fn new(report: lore_proto::Result<SimilarityReport>) -> Self {
        Self {
            report: report.map_err(|e| e.to_string()),
            fail_embed: false,
            checks: AtomicUsize::new(0),
            embeds: AtomicUsize::new(0),
        }
    }

    pub fn failing_embed(mut self) -> Self {
        self.fail_embed = true;
        self
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn embeds(&self) -> usize {
        self.embeds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SimilarityService for MockSimilarity {
    async fn check_similarity(&self, _content: &str, _title: &str) -> lore_proto::Result<SimilarityReport> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.report
            .clone()
            .map_err(|message| lore_proto::Error::api(500, message))
    }

    async fn force_embed(&self, _content: &str, _title: &str) -> lore_proto::Result<()> {
        self.embeds.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed {
            Err(lore_proto::Error::api(503, "Agent RAG non initialisé"))
        } else {
            Ok(())
        }
    }
}

/// Records deliveries instead of writing files
#[derive(Default)]
pub(crate) struct MemoryDownloads {
    delivered: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryDownloads {
    pub fn count(&self) -> usize {
        self.delivered.lock().len()
    }
}

impl DownloadSink for MemoryDownloads {
    fn deliver(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.delivered
            .lock()
            .push((filename.to_string(), bytes.to_vec()));
        Ok(PathBuf::from(filename))
    }
}
