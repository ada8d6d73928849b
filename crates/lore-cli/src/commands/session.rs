//! /sessions and /status commands

use super::{CommandContext, CommandResult};
use chrono::Local;
use lore_client::Conversation;

use crate::ui::state_label;

pub struct SessionCommand;

impl SessionCommand {
    pub fn list(conversation: &Conversation) -> CommandResult {
        let sessions = conversation.sessions();
        if sessions.is_empty() {
            return CommandResult::Message("No sessions yet.".to_string());
        }

        let active = conversation.active_session_id();
        let mut output = String::from("Sessions (newest first)\n");
        output.push_str(&"-".repeat(40));
        output.push('\n');
        for session in sessions {
            let marker = if Some(session.id.as_str()) == active {
                "*"
            } else {
                " "
            };
            output.push_str(&format!(
                "{} {}  {}  {}\n",
                marker,
                session.id,
                session.updated_at.with_timezone(&Local).format("%d/%m %H:%M"),
                session.label
            ));
            if !session.summary.is_empty() {
                output.push_str(&format!("    {}\n", session.summary.replace('\n', " ")));
            }
        }
        CommandResult::Message(output.trim_end().to_string())
    }

    pub fn status(ctx: &CommandContext<'_>) -> CommandResult {
        let conversation = ctx.conversation;
        let mut output = String::from("Status\n");
        output.push_str(&"-".repeat(40));
        output.push('\n');

        let transport = match ctx.connection {
            Some(state) => format!("streaming ({})", state_label(state)),
            None => "rest".to_string(),
        };
        output.push_str(&format!("Transport:  {}\n", transport));
        output.push_str(&format!(
            "Session:    {}\n",
            conversation.active_session_id().unwrap_or("(new)")
        ));

        let errors = conversation.thread().iter().filter(|m| m.is_error).count();
        output.push_str(&format!(
            "Messages:   {} ({} failed)\n",
            conversation.thread().len(),
            errors
        ));
        output.push_str(&format!("Sessions:   {}\n", conversation.sessions().len()));
        output.push_str(&format!("Artifacts:  {}", ctx.store.len()));

        CommandResult::Message(output)
    }
}
