//! Recognising generated artifacts in responses
//!
//! Recognition is a heuristic over the response text. The default
//! [`KeywordClassifier`] looks for trigger words and a markdown section
//! marker; callers with better signals can plug in their own
//! [`ArtifactClassifier`].

use std::sync::LazyLock;

use chrono::{Local, NaiveDate};
use regex::Regex;

use crate::config::ClassifierConfig;

static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[#*\s]").unwrap());
static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());

/// Decides whether a finished response is an artifact worth persisting
pub trait ArtifactClassifier: Send + Sync {
    fn is_artifact(&self, text: &str) -> bool;

    /// Title the artifact is stored under
    fn title(&self, text: &str) -> String {
        extract_title(text)
    }
}

/// Trigger-word and section-marker rules
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    keywords: Vec<String>,
    section_marker: String,
}

impl KeywordClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            keywords: config
                .keywords
                .iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            section_marker: config.section_marker.clone(),
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

impl ArtifactClassifier for KeywordClassifier {
    fn is_artifact(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
            || (!self.section_marker.is_empty() && text.contains(&self.section_marker))
    }
}

/// First line that looks like a heading, else a dated fallback
pub fn extract_title(text: &str) -> String {
    title_or_dated(text, Local::now().date_naive())
}

fn title_or_dated(text: &str, today: NaiveDate) -> String {
    for line in text.lines() {
        let cleaned = MARKUP.replace_all(line, "");
        let len = cleaned.chars().count();
        if len > 5 && len < 50 {
            let title = NON_WORD.replace_all(&cleaned, "").trim().to_string();
            if !title.is_empty() {
                return title;
            }
        }
    }
    format!("Scenario_{}", today.format("%d-%m-%Y"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let classifier = KeywordClassifier::default();
        assert!(classifier.is_artifact("Voici votre SCÉNARIO complet"));
        assert!(classifier.is_artifact("Une chasse au trésor dans Paris"));
        assert!(classifier.is_artifact("La Quête du Graal"));
        assert!(!classifier.is_artifact("Bonjour, comment puis-je aider ?"));
    }

    #[test]
    fn test_section_marker() {
        let classifier = KeywordClassifier::default();
        assert!(classifier.is_artifact("## Introduction\nTexte"));
        assert!(!classifier.is_artifact("# Un seul dièse"));
    }

    #[test]
    fn test_custom_rules() {
        let classifier = KeywordClassifier::new(&ClassifierConfig {
            keywords: vec!["Walkthrough".into()],
            section_marker: String::new(),
        });
        assert!(classifier.is_artifact("a walkthrough of the level"));
        assert!(!classifier.is_artifact("## heading only"));
    }

    #[test]
    fn test_title_from_first_heading() {
        let text = "## Le Trésor de Bagdad\n\nIl était une fois...";
        assert_eq!(title_or_dated(text, today()), "LeTrésordeBagdad");
    }

    #[test]
    fn test_title_skips_short_and_long_lines() {
        let long = "x".repeat(60);
        let text = format!("##\n**Bref**\n{}\n### Chapitre premier!", long);
        assert_eq!(title_or_dated(&text, today()), "Chapitrepremier");
    }

    #[test]
    fn test_title_fallback_is_dated() {
        assert_eq!(title_or_dated("ok\n\n#", today()), "Scenario_07-03-2024");
        assert_eq!(title_or_dated("", today()), "Scenario_07-03-2024");
    }

    #[test]
    fn test_extract_title_uses_trait_default() {
        let classifier = KeywordClassifier::default();
        assert_eq!(classifier.title("# Mystère à Lyon\n..."), "MystèreàLyon");
    }
}
