//! One pooled decoder engine with its utterance state machine and
//! pending-update queue.
//!
//! Lock order is `updates` then `engine`. Frame processing only ever
//! takes `engine`, so enqueuing an update never waits on decoding.

use crate::decoder::state::{AtomicSlotState, SlotState};
use crate::decoder::update::SlotUpdate;
use crate::engine::{DecoderEngine, ModelPaths, SearchMode};
use crate::error::{AsrError, Result};
use crate::sync::lock;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Configuration currently in effect on a slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlotSettings {
    pub acoustic_model: Option<PathBuf>,
    pub dictionary: Option<PathBuf>,
    pub language_model: Option<PathBuf>,
    pub grammar_file: Option<PathBuf>,
    pub grammar: Option<String>,
    pub log_path: Option<PathBuf>,
    pub search_mode: Option<SearchMode>,
}

impl SlotSettings {
    fn record(&mut self, update: &SlotUpdate) {
        match update {
            SlotUpdate::AcousticModel(path) => self.acoustic_model = Some(path.clone()),
            SlotUpdate::Dictionary(path) => self.dictionary = Some(path.clone()),
            SlotUpdate::LanguageModel(path) => self.language_model = Some(path.clone()),
            SlotUpdate::GrammarFile(path) => self.grammar_file = Some(path.clone()),
            SlotUpdate::GrammarString(text) => self.grammar = Some(text.clone()),
            SlotUpdate::LoggingPath(path) => self.log_path = Some(path.clone()),
            SlotUpdate::SearchMode(mode) => self.search_mode = Some(*mode),
        }
    }
}

pub struct DecoderSlot {
    index: usize,
    name: String,
    state: AtomicSlotState,
    ready: AtomicBool,
    engine: Mutex<Box<dyn DecoderEngine>>,
    updates: Mutex<VecDeque<SlotUpdate>>,
    settings: Mutex<SlotSettings>,
}

impl DecoderSlot {
    pub fn new(index: usize, engine: Box<dyn DecoderEngine>) -> Self {
        Self {
            index,
            name: format!("decoder-{}", index),
            state: AtomicSlotState::new(SlotState::NotInitialized),
            ready: AtomicBool::new(false),
            engine: Mutex::new(engine),
            updates: Mutex::new(VecDeque::new()),
            settings: Mutex::new(SlotSettings::default()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SlotState {
        self.state.load()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_healthy(&self) -> bool {
        self.state().is_healthy()
    }

    pub fn settings(&self) -> SlotSettings {
        lock(&self.settings).clone()
    }

    /// Only the pool flips readiness off, under its index lock.
    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Load models. Also the way out of `Error`: a failed slot stays
    /// excluded until this succeeds.
    pub fn initialize(&self, models: &ModelPaths) -> Result<()> {
        let mut engine = lock(&self.engine);
        self.set_ready(false);
        match engine.initialize(models) {
            Ok(()) => {
                self.state.store(SlotState::Idle);
                let mut settings = lock(&self.settings);
                settings.acoustic_model = Some(models.acoustic_model.clone());
                settings.dictionary = models.dictionary.clone();
                settings.log_path = Some(models.log_path.clone());
                debug!(slot = %self.name, engine = engine.name(), "decoder initialized");
                Ok(())
            }
            Err(e) => {
                self.mark_error(&format!("initialization failed: {}", e));
                Err(e)
            }
        }
    }

    pub fn mark_error(&self, reason: &str) {
        self.set_ready(false);
        self.state.store(SlotState::Error);
        warn!(slot = %self.name, reason, "decoder slot entered error state");
    }

    /// Open a new utterance. Legal from `Idle` and `UtteranceEnding`;
    /// anything else is a logged no-op.
    pub fn start_utterance(&self) -> Result<()> {
        let mut engine = lock(&self.engine);
        self.start_locked(engine.as_mut())
    }

    /// Close the open utterance. Legal only from `UtteranceStarted`.
    pub fn end_utterance(&self) {
        let mut engine = lock(&self.engine);
        self.end_locked(engine.as_mut());
    }

    /// Hypothesis for the utterance just ended; empty outside an utterance.
    pub fn hypothesis(&self) -> String {
        let state = self.state();
        if !matches!(
            state,
            SlotState::UtteranceEnding | SlotState::UtteranceStarted
        ) {
            warn!(slot = %self.name, %state, "hypothesis requested outside an utterance");
            return String::new();
        }
        lock(&self.engine).hypothesis()
    }

    /// Decode one frame. An engine failure puts the slot in `Error`.
    pub fn process_frame(&self, samples: &[i16]) -> Result<bool> {
        let mut engine = lock(&self.engine);
        // State is read under the engine lock; a worker ending the
        // utterance holds the same lock.
        let state = self.state();
        if state != SlotState::UtteranceStarted {
            return Err(AsrError::InvalidState {
                message: format!("{} cannot decode in state {}", self.name, state),
            });
        }
        engine.process_frame(samples).inspect_err(|e| {
            self.mark_error(&format!("decode failed: {}", e));
        })
    }

    pub fn word_exists(&self, word: &str) -> bool {
        if !self.is_healthy() {
            warn!(slot = %self.name, "dictionary lookup on unusable slot");
            return false;
        }
        lock(&self.engine).lookup_word(word)
    }

    pub fn add_word(&self, word: &str, phonemes: &str) -> Result<()> {
        let state = self.state();
        if !state.is_healthy() {
            return Err(AsrError::InvalidState {
                message: format!("{} cannot add words in state {}", self.name, state),
            });
        }
        lock(&self.engine).add_word(word, phonemes)
    }

    /// Apply `update` now, or queue it for the next `apply_update_queue`.
    pub fn update(&self, update: SlotUpdate, apply_immediately: bool) -> Result<()> {
        if apply_immediately {
            let mut engine = lock(&self.engine);
            self.apply_locked(engine.as_mut(), &update)
        } else {
            self.enqueue(update);
            Ok(())
        }
    }

    pub fn enqueue(&self, update: SlotUpdate) {
        debug!(slot = %self.name, %update, "update queued");
        lock(&self.updates).push_back(update);
    }

    pub fn pending_updates(&self) -> Vec<SlotUpdate> {
        lock(&self.updates).iter().cloned().collect()
    }

    /// Drain the queue in FIFO order. The first failure puts the slot in
    /// `Error`; updates queued behind it are discarded.
    pub fn apply_update_queue(&self) -> Result<usize> {
        let mut queue = lock(&self.updates);
        if queue.is_empty() {
            return Ok(0);
        }
        let mut engine = lock(&self.engine);
        let mut applied = 0;
        while let Some(update) = queue.pop_front() {
            if let Err(e) = self.apply_locked(engine.as_mut(), &update) {
                if !queue.is_empty() {
                    warn!(slot = %self.name, discarded = queue.len(), "dropping updates queued behind a failed one");
                    queue.clear();
                }
                return Err(e);
            }
            applied += 1;
        }
        info!(slot = %self.name, applied, "update queue applied");
        Ok(applied)
    }

    fn start_locked(&self, engine: &mut dyn DecoderEngine) -> Result<()> {
        let state = self.state();
        if !state.can_start() {
            warn!(slot = %self.name, %state, "start_utterance ignored");
            return Ok(());
        }
        match engine.start_utterance() {
            Ok(()) => {
                self.state.store(SlotState::UtteranceStarted);
                self.set_ready(true);
                Ok(())
            }
            Err(e) => {
                self.mark_error(&format!("start_utterance failed: {}", e));
                Err(e)
            }
        }
    }

    fn end_locked(&self, engine: &mut dyn DecoderEngine) {
        let state = self.state();
        if state != SlotState::UtteranceStarted {
            warn!(slot = %self.name, %state, "end_utterance ignored");
            return;
        }
        self.set_ready(false);
        self.state.store(SlotState::UtteranceEnding);
        engine.end_utterance();
    }

    fn apply_locked(&self, engine: &mut dyn DecoderEngine, update: &SlotUpdate) -> Result<()> {
        if update.interrupts_utterance() && self.state() == SlotState::UtteranceStarted {
            debug!(slot = %self.name, %update, "ending utterance before update");
            self.end_locked(engine);
        }
        let result = match update {
            SlotUpdate::AcousticModel(path) => engine.set_acoustic_model(path),
            SlotUpdate::Dictionary(path) => engine.set_dictionary(path),
            SlotUpdate::LanguageModel(path) => engine.set_language_model(path),
            SlotUpdate::GrammarFile(path) => engine.set_grammar_file(path),
            SlotUpdate::GrammarString(text) => engine.set_grammar_string(text),
            SlotUpdate::LoggingPath(path) => engine.set_logging_path(path),
            SlotUpdate::SearchMode(mode) => engine.select_search_mode(*mode),
        };
        match result {
            Ok(()) => {
                lock(&self.settings).record(update);
                debug!(slot = %self.name, %update, "update applied");
                Ok(())
            }
            Err(e) => {
                self.mark_error(&format!("{} failed: {}", update, e));
                Err(AsrError::SlotUpdate {
                    slot: self.name.clone(),
                    message: format!("{}: {}", update, e),
                })
            }
        }
    }
}

impl std::fmt::Debug for DecoderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderSlot")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("ready", &self.is_ready())
            .finish()
    }
}
