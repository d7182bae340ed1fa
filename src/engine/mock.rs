//! Scriptable engine for tests and benchmarks.

use crate::engine::{DecoderEngine, ModelPaths, SearchMode};
use crate::error::{AsrError, Result};
use crate::sync::lock;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Everything a [`MockEngine`] was asked to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeLog {
    /// Frames decoded successfully.
    pub frames: usize,
    /// First sample of every decoded frame, in decode order.
    pub frame_marks: Vec<i16>,
    pub utterances_started: usize,
    pub utterances_ended: usize,
    pub hypotheses_read: usize,
    /// Configuration calls as `kind:value`, in call order.
    pub updates: Vec<String>,
}

/// Shared view of one or more engines' activity.
///
/// Give every engine in a pool the same probe to observe global frame
/// order; give each its own to observe per-slot behavior.
#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    log: Arc<Mutex<ProbeLog>>,
}

impl EngineProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProbeLog {
        lock(&self.log).clone()
    }

    pub fn frames(&self) -> usize {
        lock(&self.log).frames
    }

    pub fn frame_marks(&self) -> Vec<i16> {
        lock(&self.log).frame_marks.clone()
    }

    pub fn updates(&self) -> Vec<String> {
        lock(&self.log).updates.clone()
    }

    fn record<F: FnOnce(&mut ProbeLog)>(&self, f: F) {
        f(&mut lock(&self.log));
    }
}

/// Engine whose voice detection is the mean absolute amplitude of a frame.
///
/// A frame is voiced when its mean absolute sample exceeds the threshold
/// (default 1000). The hypothesis is returned only for utterances that
/// contained at least one voiced frame.
#[derive(Debug)]
pub struct MockEngine {
    probe: EngineProbe,
    voice_threshold: i64,
    hypothesis: String,
    hypothesis_delay: Duration,
    fail_init: bool,
    fail_process_at: Option<usize>,
    fail_start: bool,
    fail_search_mode: bool,
    fail_updates: bool,
    processed: usize,
    in_utterance: bool,
    heard_voice: bool,
    last_heard_voice: bool,
    words: HashSet<String>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            probe: EngineProbe::new(),
            voice_threshold: 1000,
            hypothesis: "mock hypothesis".to_string(),
            hypothesis_delay: Duration::ZERO,
            fail_init: false,
            fail_process_at: None,
            fail_start: false,
            fail_search_mode: false,
            fail_updates: false,
            processed: 0,
            in_utterance: false,
            heard_voice: false,
            last_heard_voice: false,
            words: HashSet::new(),
        }
    }

    pub fn with_probe(mut self, probe: EngineProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_hypothesis(mut self, text: &str) -> Self {
        self.hypothesis = text.to_string();
        self
    }

    /// Sleep this long inside `hypothesis`, imitating a slow decoder.
    pub fn with_hypothesis_delay(mut self, delay: Duration) -> Self {
        self.hypothesis_delay = delay;
        self
    }

    pub fn with_voice_threshold(mut self, threshold: i64) -> Self {
        self.voice_threshold = threshold;
        self
    }

    pub fn with_init_failure(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Fail the `n`th (zero-based) and every later call to `process_frame`.
    pub fn with_process_failure_at(mut self, n: usize) -> Self {
        self.fail_process_at = Some(n);
        self
    }

    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn with_search_mode_failure(mut self) -> Self {
        self.fail_search_mode = true;
        self
    }

    /// Fail every model, dictionary, grammar and logging path change.
    pub fn with_update_failure(mut self) -> Self {
        self.fail_updates = true;
        self
    }

    pub fn with_word(mut self, word: &str) -> Self {
        self.words.insert(word.to_lowercase());
        self
    }

    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }

    fn update(&mut self, kind: &str, value: &str) -> Result<()> {
        if self.fail_updates {
            return Err(AsrError::Engine {
                message: format!("mock rejected {} {}", kind, value),
            });
        }
        self.probe
            .record(|log| log.updates.push(format!("{}:{}", kind, value)));
        Ok(())
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderEngine for MockEngine {
    fn initialize(&mut self, models: &ModelPaths) -> Result<()> {
        if self.fail_init {
            return Err(AsrError::EngineInit {
                message: format!(
                    "mock could not load {}",
                    models.acoustic_model.display()
                ),
            });
        }
        Ok(())
    }

    fn process_frame(&mut self, samples: &[i16]) -> Result<bool> {
        if let Some(fail_at) = self.fail_process_at
            && self.processed >= fail_at
        {
            return Err(AsrError::Engine {
                message: format!("mock decode failure at frame {}", self.processed),
            });
        }
        self.processed += 1;

        let voiced = if samples.is_empty() {
            false
        } else {
            let total: i64 = samples.iter().map(|&s| (s as i64).abs()).sum();
            total / samples.len() as i64 > self.voice_threshold
        };
        if voiced {
            self.heard_voice = true;
        }
        let mark = samples.first().copied().unwrap_or_default();
        self.probe.record(|log| {
            log.frames += 1;
            log.frame_marks.push(mark);
        });
        Ok(voiced)
    }

    fn start_utterance(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(AsrError::Engine {
                message: "mock refused to start utterance".to_string(),
            });
        }
        self.in_utterance = true;
        self.heard_voice = false;
        self.probe.record(|log| log.utterances_started += 1);
        Ok(())
    }

    fn end_utterance(&mut self) {
        self.in_utterance = false;
        self.last_heard_voice = self.heard_voice;
        self.probe.record(|log| log.utterances_ended += 1);
    }

    fn hypothesis(&mut self) -> String {
        if !self.hypothesis_delay.is_zero() {
            std::thread::sleep(self.hypothesis_delay);
        }
        self.probe.record(|log| log.hypotheses_read += 1);
        if self.last_heard_voice {
            self.hypothesis.clone()
        } else {
            String::new()
        }
    }

    fn lookup_word(&self, word: &str) -> bool {
        self.words.contains(&word.to_lowercase())
    }

    fn add_word(&mut self, word: &str, phonemes: &str) -> Result<()> {
        if phonemes.split_whitespace().next().is_none() {
            return Err(AsrError::Engine {
                message: format!("no phonemes given for '{}'", word),
            });
        }
        self.words.insert(word.to_lowercase());
        Ok(())
    }

    fn set_acoustic_model(&mut self, path: &Path) -> Result<()> {
        self.update("acoustic-model", &path.display().to_string())
    }

    fn set_dictionary(&mut self, path: &Path) -> Result<()> {
        self.update("dictionary", &path.display().to_string())
    }

    fn set_language_model(&mut self, path: &Path) -> Result<()> {
        self.update("language-model", &path.display().to_string())
    }

    fn set_grammar_file(&mut self, path: &Path) -> Result<()> {
        self.update("grammar-file", &path.display().to_string())
    }

    fn set_grammar_string(&mut self, jsgf: &str) -> Result<()> {
        self.update("grammar-string", jsgf)
    }

    fn set_logging_path(&mut self, path: &Path) -> Result<()> {
        self.update("logging-path", &path.display().to_string())
    }

    fn select_search_mode(&mut self, mode: SearchMode) -> Result<()> {
        if self.fail_search_mode {
            return Err(AsrError::Engine {
                message: format!("mock could not activate {} search", mode),
            });
        }
        self.update("search-mode", mode.as_str())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
