//! CMU-format pronunciation dictionary.
//!
//! One entry per line: `word PH1 PH2 ...`. Alternate pronunciations use a
//! numbered suffix (`read(2) R EH D`); lines starting with `;;;` are comments.

use crate::error::{AsrError, Result};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PronunciationDictionary {
    entries: HashMap<String, Vec<String>>,
}

impl PronunciationDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AsrError::ConfigInvalidValue {
            key: "dictionary".to_string(),
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut dictionary = Self::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(";;;") {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(word) = parts.next() else {
                continue;
            };
            let phonemes: Vec<&str> = parts.collect();
            if phonemes.is_empty() {
                return Err(AsrError::ConfigParse {
                    message: format!("dictionary line {}: '{}' has no phonemes", line_no + 1, word),
                });
            }
            dictionary.insert(base_word(word), phonemes.join(" "));
        }
        Ok(dictionary)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.entries.contains_key(&word.to_lowercase())
    }

    pub fn pronunciations(&self, word: &str) -> &[String] {
        self.entries
            .get(&word.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Add a pronunciation; repeated phoneme strings are ignored.
    pub fn add(&mut self, word: &str, phonemes: &str) -> Result<()> {
        let word = word.trim();
        let phonemes = phonemes.split_whitespace().collect::<Vec<_>>().join(" ");
        if word.is_empty() || word.contains(char::is_whitespace) {
            return Err(AsrError::Engine {
                message: format!("invalid dictionary word '{}'", word),
            });
        }
        if phonemes.is_empty() {
            return Err(AsrError::Engine {
                message: format!("no phonemes given for '{}'", word),
            });
        }
        self.insert(word, phonemes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, word: &str, phonemes: String) {
        let variants = self.entries.entry(word.to_lowercase()).or_default();
        if !variants.contains(&phonemes) {
            variants.push(phonemes);
        }
    }
}

/// Strip the `(n)` alternate-pronunciation suffix.
fn base_word(word: &str) -> &str {
    match word.find('(') {
        Some(idx) if word.ends_with(')') && idx > 0 => &word[..idx],
        _ => word,
    }
}
