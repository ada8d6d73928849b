//! Line-mode terminal output

use lore_client::session::truncate_label;
use lore_client::{ClientEvent, ConnectionState, GateDecision, PendingDecision};

/// Turns cumulative response snapshots into incremental terminal output
#[derive(Debug, Default)]
pub struct StreamPrinter {
    shown: String,
}

impl StreamPrinter {
    /// Text to print for a new snapshot
    pub fn update(&mut self, snapshot: &str) -> String {
        let out = match snapshot.strip_prefix(self.shown.as_str()) {
            Some(rest) => rest.to_string(),
            // The service rewrote earlier text; start over on a fresh line
            None => format!("\n{}", snapshot),
        };
        self.shown = snapshot.to_string();
        out
    }

    /// Text to print for the final response; resets for the next exchange
    pub fn finish(&mut self, text: &str) -> String {
        let out = self.update(text);
        self.shown.clear();
        out
    }

    pub fn is_streaming(&self) -> bool {
        !self.shown.is_empty()
    }

    /// Forget what was shown (the exchange failed)
    pub fn reset(&mut self) -> bool {
        let had_output = !self.shown.is_empty();
        self.shown.clear();
        had_output
    }
}

pub fn state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Error => "error",
    }
}

/// One-line notice for events that are not part of the response text
pub fn notice(event: &ClientEvent) -> Option<String> {
    Some(match event {
        ClientEvent::ConnectionChanged { state } => format!("[{}]", state_label(*state)),
        ClientEvent::Status { message, .. } => format!("[{}]", message),
        ClientEvent::SessionCreated { session_id, label } => {
            format!("[session {}: {}]", session_id, label)
        }
        ClientEvent::SessionDeleted { session_id } => format!("[session {} deleted]", session_id),
        ClientEvent::PersistenceStarted { title } => {
            format!("[checking \"{}\" against the library...]", title)
        }
        ClientEvent::PersistenceDeferred { title, matches } => format!(
            "[\"{}\" resembles: {}]",
            title,
            matches.join(", ")
        ),
        ClientEvent::ArtifactSaved { artifact_id, title } => {
            format!("[saved \"{}\" as {}]", title, artifact_id)
        }
        ClientEvent::PersistenceCancelled { title } => format!("[discarded \"{}\"]", title),
        ClientEvent::PersistenceFailed { title, message } => {
            format!("[could not save \"{}\": {}]", title, message)
        }
        _ => return None,
    })
}

/// Question shown when a generated artifact resembles indexed documents
pub fn decision_prompt(pending: &PendingDecision) -> String {
    let verdict = &pending.verdict;
    let mut out = format!("\"{}\" looks similar to existing documents:\n", pending.title);
    for m in &verdict.matches {
        let marker = if m.is_duplicate || m.score >= verdict.threshold {
            "!"
        } else {
            " "
        };
        out.push_str(&format!(
            " {} {:>3.0}%  {}\n",
            marker,
            m.score * 100.0,
            truncate_label(&m.reference, 60)
        ));
    }
    out.push_str(&format!(
        "Threshold {:.0}%. [s]ave, [f]orce save and index, or [c]ancel?",
        verdict.threshold * 100.0
    ));
    out
}

/// Parse an answer to [`decision_prompt`]; empty means cancel
pub fn parse_decision(input: &str) -> Option<GateDecision> {
    match input.trim().to_lowercase().as_str() {
        "s" | "save" | "y" | "yes" => Some(GateDecision::Accept),
        "f" | "force" => Some(GateDecision::ForceAccept),
        "" | "c" | "cancel" | "n" | "no" => Some(GateDecision::Reject),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_printer_prints_only_new_text() {
        let mut printer = StreamPrinter::default();
        assert_eq!(printer.update("Il était"), "Il était");
        assert_eq!(printer.update("Il était une fois"), " une fois");
        assert_eq!(printer.finish("Il était une fois."), ".");
        // Next exchange starts from scratch
        assert_eq!(printer.finish("Bonjour"), "Bonjour");
    }

    #[test]
    fn test_stream_printer_restarts_on_rewrite() {
        let mut printer = StreamPrinter::default();
        printer.update("## Scé");
        assert_eq!(printer.update("# Scénario"), "\n# Scénario");
        assert!(printer.reset());
        assert!(!printer.reset());
    }

    #[test]
    fn test_parse_decision() {
        assert_eq!(parse_decision("S"), Some(GateDecision::Accept));
        assert_eq!(parse_decision(" force "), Some(GateDecision::ForceAccept));
        assert_eq!(parse_decision(""), Some(GateDecision::Reject));
        assert_eq!(parse_decision("peut-être"), None);
    }

    #[test]
    fn test_notice_skips_response_text() {
        let partial = ClientEvent::Partial {
            text: "abc".into(),
            progress: 10,
        };
        assert!(notice(&partial).is_none());

        let saved = ClientEvent::ArtifactSaved {
            artifact_id: "a1".into(),
            title: "Mystère".into(),
        };
        assert_eq!(notice(&saved).unwrap(), "[saved \"Mystère\" as a1]");
    }
}
