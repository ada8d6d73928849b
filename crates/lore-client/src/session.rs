//! Conversation sessions and the visible message thread

use chrono::{DateTime, Utc};
use lore_proto::Citation;
use serde::{Deserialize, Serialize};

/// Who produced a thread entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the visible thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Citation>,
    /// Synthesised from a failed exchange rather than sent by the service
    #[serde(default)]
    pub is_error: bool,
}

impl ChatMessage {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            sources: Vec::new(),
            is_error: false,
        }
    }
}

/// A thread bound to a service-assigned session id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: String,
    /// Prefix of the request that started the session
    pub label: String,
    /// Prefix of the latest response
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a reply affected the session list
#[derive(Debug, Clone, PartialEq)]
pub enum SessionChange {
    Created(ConversationSession),
    Updated(ConversationSession),
}

/// Result of deleting a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Missing,
    Removed,
    /// The active session was removed and the thread reset
    RemovedActive,
}

/// Truncate to `max` characters, marking the cut with `...`
pub fn truncate_label(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() > max {
        let prefix: String = text.chars().take(max).collect();
        format!("{}...", prefix)
    } else {
        text.to_string()
    }
}

/// Session list plus the thread of the active session
#[derive(Debug, Clone)]
pub struct Conversation {
    sessions: Vec<ConversationSession>,
    active: Option<String>,
    thread: Vec<ChatMessage>,
    label_chars: usize,
    summary_chars: usize,
}

impl Conversation {
    pub fn new(label_chars: usize, summary_chars: usize) -> Self {
        Self {
            sessions: Vec::new(),
            active: None,
            thread: Vec::new(),
            label_chars,
            summary_chars,
        }
    }

    /// Known sessions, most recently created first
    pub fn sessions(&self) -> &[ConversationSession] {
        &self.sessions
    }

    pub fn session(&self, id: &str) -> Option<&ConversationSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn thread(&self) -> &[ChatMessage] {
        &self.thread
    }

    /// Session id sent with the next request
    pub fn active_session_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.thread.push(ChatMessage::new(Role::User, text));
    }

    /// Append a successful reply and create or refresh the session it belongs to
    ///
    /// Once a session is active its id never changes; a reply naming a
    /// different id is kept in the thread but does not rebind the session.
    pub fn record_reply(
        &mut self,
        request: &str,
        text: &str,
        session_id: Option<&str>,
        sources: Vec<Citation>,
    ) -> Option<SessionChange> {
        let mut message = ChatMessage::new(Role::Assistant, text);
        message.sources = sources;
        self.thread.push(message);

        let now = Utc::now();
        match (self.active.clone(), session_id) {
            (None, Some(id)) => {
                if let Some(existing) = self.sessions.iter().position(|s| s.id == id) {
                    self.active = Some(id.to_string());
                    return Some(self.touch(existing, text, now));
                }
                let session = ConversationSession {
                    id: id.to_string(),
                    label: truncate_label(request, self.label_chars),
                    summary: truncate_label(text, self.summary_chars),
                    created_at: now,
                    updated_at: now,
                };
                tracing::info!(session_id = id, "Session created");
                self.sessions.insert(0, session.clone());
                self.active = Some(id.to_string());
                Some(SessionChange::Created(session))
            }
            (None, None) => {
                tracing::debug!("Reply carried no session id");
                None
            }
            (Some(active), reported) => {
                if let Some(reported) = reported.filter(|r| *r != active) {
                    tracing::warn!(
                        active = %active,
                        reported,
                        "Reply named a different session, keeping the active one"
                    );
                }
                let index = self.sessions.iter().position(|s| s.id == active)?;
                Some(self.touch(index, text, now))
            }
        }
    }

    fn touch(&mut self, index: usize, text: &str, now: DateTime<Utc>) -> SessionChange {
        let session = &mut self.sessions[index];
        session.summary = truncate_label(text, self.summary_chars);
        session.updated_at = now;
        SessionChange::Updated(session.clone())
    }

    /// Append a synthesised failure message; sessions are untouched
    pub fn record_error(&mut self, message: impl Into<String>) {
        let mut entry = ChatMessage::new(Role::Assistant, message);
        entry.is_error = true;
        self.thread.push(entry);
    }

    /// Detach from the active session and clear the thread
    pub fn new_chat(&mut self) {
        self.active = None;
        self.thread.clear();
    }

    /// Make a known session active; the thread starts empty
    pub fn load_session(&mut self, id: &str) -> bool {
        if self.session(id).is_none() {
            return false;
        }
        self.active = Some(id.to_string());
        self.thread.clear();
        true
    }

    /// Forget a session, resetting the thread if it was active
    pub fn delete_session(&mut self, id: &str) -> Removal {
        let Some(index) = self.sessions.iter().position(|s| s.id == id) else {
            return Removal::Missing;
        };
        self.sessions.remove(index);
        if self.active.as_deref() == Some(id) {
            self.new_chat();
            Removal::RemovedActive
        } else {
            Removal::Removed
        }
    }
}
