//! Decoder engine capability.
//!
//! A [`DecoderEngine`] is one independent recognizer instance. The pool owns
//! one per slot and never shares an engine between threads without the
//! slot's engine lock.

pub mod dictionary;
pub mod energy;
pub mod mock;

pub use dictionary::PronunciationDictionary;
pub use energy::{EnergyEngine, EnergyEngineConfig, TranscriberLoader};
pub use mock::{EngineProbe, MockEngine};

use crate::error::{AsrError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which registered search the engine decodes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMode {
    GrammarFile,
    GrammarString,
    LanguageModel,
    AllPhone,
}

impl SearchMode {
    pub const ALL: [SearchMode; 4] = [
        SearchMode::GrammarFile,
        SearchMode::GrammarString,
        SearchMode::LanguageModel,
        SearchMode::AllPhone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::GrammarFile => "grammar-file",
            SearchMode::GrammarString => "grammar-string",
            SearchMode::LanguageModel => "language-model",
            SearchMode::AllPhone => "all-phone",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = AsrError;

    fn from_str(s: &str) -> Result<Self> {
        SearchMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s.trim())
            .ok_or_else(|| AsrError::ConfigInvalidValue {
                key: "search_mode".to_string(),
                message: format!(
                    "unknown search mode '{}' (expected grammar-file, grammar-string, language-model or all-phone)",
                    s
                ),
            })
    }
}

/// Model files an engine is initialized with.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPaths {
    pub acoustic_model: PathBuf,
    pub dictionary: Option<PathBuf>,
    pub log_path: PathBuf,
}

impl ModelPaths {
    pub fn new(acoustic_model: impl Into<PathBuf>) -> Self {
        Self {
            acoustic_model: acoustic_model.into(),
            dictionary: None,
            log_path: PathBuf::from(crate::defaults::LOG_PATH),
        }
    }

    pub fn with_dictionary(mut self, dictionary: impl Into<PathBuf>) -> Self {
        self.dictionary = Some(dictionary.into());
        self
    }

    pub fn with_log_path(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = log_path.into();
        self
    }
}

/// One recognizer instance.
///
/// Utterance bookkeeping (which calls are legal when) lives in the decoder
/// slot; engines only report whether the underlying recognizer accepted
/// a call.
pub trait DecoderEngine: Send {
    /// Load models. Called once per slot before any other call.
    fn initialize(&mut self, models: &ModelPaths) -> Result<()>;

    /// Decode one frame and report whether it contained voice.
    fn process_frame(&mut self, samples: &[i16]) -> Result<bool>;

    fn start_utterance(&mut self) -> Result<()>;

    fn end_utterance(&mut self);

    /// Text for the most recently ended utterance; empty when nothing was recognized.
    fn hypothesis(&mut self) -> String;

    fn lookup_word(&self, word: &str) -> bool;

    fn add_word(&mut self, word: &str, phonemes: &str) -> Result<()>;

    fn set_acoustic_model(&mut self, path: &Path) -> Result<()>;

    fn set_dictionary(&mut self, path: &Path) -> Result<()>;

    fn set_language_model(&mut self, path: &Path) -> Result<()>;

    fn set_grammar_file(&mut self, path: &Path) -> Result<()>;

    fn set_grammar_string(&mut self, jsgf: &str) -> Result<()>;

    fn set_logging_path(&mut self, path: &Path) -> Result<()>;

    /// Deactivate the current search and activate the one registered for `mode`.
    fn select_search_mode(&mut self, mode: SearchMode) -> Result<()>;

    /// Name for logging.
    fn name(&self) -> &'static str {
        "engine"
    }
}

/// Builds the engine for each pool slot.
pub trait EngineFactory: Send + Sync {
    fn create(&self, index: usize) -> Box<dyn DecoderEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn(usize) -> Box<dyn DecoderEngine> + Send + Sync,
{
    fn create(&self, index: usize) -> Box<dyn DecoderEngine> {
        self(index)
    }
}
