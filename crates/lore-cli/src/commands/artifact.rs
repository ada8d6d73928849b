//! Artifact library commands

use super::CommandResult;
use chrono::Local;
use lore_client::ArtifactStore;

pub struct ArtifactCommand;

impl ArtifactCommand {
    pub fn list(store: &ArtifactStore) -> CommandResult {
        let artifacts = store.list();
        if artifacts.is_empty() {
            return CommandResult::Message("The library is empty.".to_string());
        }

        let mut output = format!("Artifacts ({})\n", artifacts.len());
        output.push_str(&"-".repeat(40));
        output.push('\n');
        for artifact in &artifacts {
            let rendering = match artifact.payload {
                Some(ref payload) => payload.filename.as_str(),
                None => "text only",
            };
            output.push_str(&format!(
                "{}  {}  {} [{}]\n",
                artifact.id,
                artifact.created_at.with_timezone(&Local).format("%d/%m/%Y"),
                artifact.title,
                rendering
            ));
        }
        CommandResult::Message(output.trim_end().to_string())
    }

    pub fn show(store: &ArtifactStore, id: &str) -> CommandResult {
        match store.get(id) {
            Some(artifact) => CommandResult::Message(format!(
                "{}\n{}\n\n{}",
                artifact.title,
                "-".repeat(artifact.title.chars().count().max(3)),
                artifact.content
            )),
            None => CommandResult::Message(format!("No artifact with id {}", id)),
        }
    }
}
