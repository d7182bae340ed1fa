use crate::engine::SearchMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One deferred configuration change for a decoder slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum SlotUpdate {
    AcousticModel(PathBuf),
    Dictionary(PathBuf),
    LanguageModel(PathBuf),
    GrammarFile(PathBuf),
    GrammarString(String),
    LoggingPath(PathBuf),
    SearchMode(SearchMode),
}

impl SlotUpdate {
    /// Updates that replace the active search or reload the decoder, and
    /// therefore cannot be applied under an open utterance.
    pub fn interrupts_utterance(&self) -> bool {
        matches!(
            self,
            SlotUpdate::SearchMode(_)
                | SlotUpdate::GrammarFile(_)
                | SlotUpdate::GrammarString(_)
                | SlotUpdate::AcousticModel(_)
                | SlotUpdate::LoggingPath(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SlotUpdate::AcousticModel(_) => "acoustic-model",
            SlotUpdate::Dictionary(_) => "dictionary",
            SlotUpdate::LanguageModel(_) => "language-model",
            SlotUpdate::GrammarFile(_) => "grammar-file",
            SlotUpdate::GrammarString(_) => "grammar-string",
            SlotUpdate::LoggingPath(_) => "logging-path",
            SlotUpdate::SearchMode(_) => "search-mode",
        }
    }
}

impl fmt::Display for SlotUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotUpdate::AcousticModel(path)
            | SlotUpdate::Dictionary(path)
            | SlotUpdate::LanguageModel(path)
            | SlotUpdate::GrammarFile(path)
            | SlotUpdate::LoggingPath(path) => write!(f, "{} {}", self.kind(), path.display()),
            SlotUpdate::GrammarString(text) => {
                write!(f, "{} ({} bytes)", self.kind(), text.len())
            }
            SlotUpdate::SearchMode(mode) => write!(f, "{} {}", self.kind(), mode),
        }
    }
}
