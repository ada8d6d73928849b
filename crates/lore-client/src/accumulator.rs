//! Partial-response staging
//!
//! Streaming frames carry cumulative snapshots, so a chunk replaces the
//! staged partial text rather than extending it.

/// Live state of one exchange's response
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StreamAccumulator {
    partial: Option<String>,
    progress: u8,
    status: Option<String>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a progress annotation; the generating phase starts from a blank partial
    pub fn on_status(&mut self, message: impl Into<String>, generating: bool) {
        self.status = Some(message.into());
        if generating {
            self.partial = None;
        }
    }

    /// Stage the latest snapshot, replacing any earlier one
    pub fn on_chunk(&mut self, text: impl Into<String>, progress: u8) -> &str {
        self.progress = progress.min(100);
        self.partial.insert(text.into())
    }

    /// Clear partial state and hand back the committed final text
    pub fn on_final(&mut self, text: impl Into<String>) -> String {
        self.partial = None;
        self.status = None;
        self.progress = 100;
        text.into()
    }

    /// Text shown while the response is still streaming
    pub fn partial(&self) -> Option<&str> {
        self.partial.as_deref()
    }

    /// Advisory progress, 0..=100
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }
}
