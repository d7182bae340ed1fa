//! Decoder engine built from an energy voice detector and a transcriber.
//!
//! Every sample fed during an open utterance is buffered; when the utterance
//! ends the buffer is handed to the transcriber, but only if the detector
//! heard speech in it. Search registrations are tracked so mode switches
//! fail the same way a grammar-driven decoder would.

use crate::audio::vad::{VadConfig, VoiceDetector};
use crate::defaults;
use crate::engine::dictionary::PronunciationDictionary;
use crate::engine::{DecoderEngine, ModelPaths, SearchMode};
use crate::error::{AsrError, Result};
use crate::stt::transcriber::Transcriber;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Loads the transcriber for an acoustic model path.
pub type TranscriberLoader = Arc<dyn Fn(&Path) -> Result<Arc<dyn Transcriber>> + Send + Sync>;

const JSGF_HEADER: &str = "#JSGF";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyEngineConfig {
    pub vad: VadConfig,
    pub sample_rate: u32,
    pub max_utterance_samples: usize,
}

impl Default for EnergyEngineConfig {
    fn default() -> Self {
        Self {
            vad: VadConfig::default(),
            sample_rate: defaults::SAMPLE_RATE,
            max_utterance_samples: defaults::MAX_UTTERANCE_SAMPLES,
        }
    }
}

pub struct EnergyEngine {
    config: EnergyEngineConfig,
    loader: TranscriberLoader,
    transcriber: Option<Arc<dyn Transcriber>>,
    detector: VoiceDetector,
    dictionary: PronunciationDictionary,
    /// What each registered search was built from: a file path or grammar text.
    searches: HashMap<SearchMode, String>,
    active_search: Option<SearchMode>,
    log: Option<File>,
    utterance: Vec<i16>,
    in_utterance: bool,
    heard_speech: bool,
    ended: Option<Vec<i16>>,
}

impl EnergyEngine {
    pub fn new(config: EnergyEngineConfig, loader: TranscriberLoader) -> Self {
        Self {
            detector: VoiceDetector::new(config.vad, config.sample_rate),
            config,
            loader,
            transcriber: None,
            dictionary: PronunciationDictionary::new(),
            searches: HashMap::new(),
            active_search: None,
            log: None,
            utterance: Vec::new(),
            in_utterance: false,
            heard_speech: false,
            ended: None,
        }
    }

    pub fn active_search(&self) -> Option<SearchMode> {
        self.active_search
    }

    pub fn dictionary(&self) -> &PronunciationDictionary {
        &self.dictionary
    }

    fn log_line(&mut self, line: &str) {
        if let Some(file) = self.log.as_mut()
            && let Err(e) = writeln!(file, "{}", line)
        {
            warn!(error = %e, "engine log write failed");
        }
    }

    pub fn registration(&self, mode: SearchMode) -> Option<&str> {
        self.searches.get(&mode).map(String::as_str)
    }

    fn register(&mut self, mode: SearchMode, source: String) {
        self.searches.insert(mode, source);
        self.log_line(&format!("registered {} search", mode));
    }
}

fn require_file(key: &str, path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(AsrError::ConfigInvalidValue {
            key: key.to_string(),
            message: format!("{} does not exist", path.display()),
        })
    }
}

fn check_jsgf(text: &str) -> Result<()> {
    let first = text.lines().map(str::trim).find(|line| !line.is_empty());
    match first {
        Some(line) if line.starts_with(JSGF_HEADER) => Ok(()),
        _ => Err(AsrError::ConfigInvalidValue {
            key: "grammar".to_string(),
            message: format!("grammar text lacks {} header", JSGF_HEADER),
        }),
    }
}

impl DecoderEngine for EnergyEngine {
    fn initialize(&mut self, models: &ModelPaths) -> Result<()> {
        self.set_logging_path(&models.log_path)?;
        if let Some(dictionary) = &models.dictionary {
            self.dictionary = PronunciationDictionary::load(dictionary)?;
        }
        let transcriber = (self.loader)(&models.acoustic_model)?;
        debug!(model = transcriber.model_name(), "energy engine initialized");
        self.transcriber = Some(transcriber);
        Ok(())
    }

    fn process_frame(&mut self, samples: &[i16]) -> Result<bool> {
        if !self.in_utterance {
            return Err(AsrError::Engine {
                message: "frame processed outside an utterance".to_string(),
            });
        }
        let room = self
            .config
            .max_utterance_samples
            .saturating_sub(self.utterance.len());
        self.utterance
            .extend_from_slice(&samples[..samples.len().min(room)]);

        let voiced = self.detector.process(samples);
        if voiced {
            self.heard_speech = true;
        }
        Ok(voiced)
    }

    fn start_utterance(&mut self) -> Result<()> {
        if self.transcriber.is_none() {
            return Err(AsrError::Engine {
                message: "engine not initialized".to_string(),
            });
        }
        self.detector.reset();
        self.utterance.clear();
        self.heard_speech = false;
        self.in_utterance = true;
        Ok(())
    }

    fn end_utterance(&mut self) {
        self.in_utterance = false;
        let audio = std::mem::take(&mut self.utterance);
        let samples = audio.len();
        self.ended = if self.heard_speech { Some(audio) } else { None };
        self.log_line(&format!(
            "utterance ended: {} samples, speech={}",
            samples, self.heard_speech
        ));
    }

    fn hypothesis(&mut self) -> String {
        let (Some(audio), Some(transcriber)) = (self.ended.take(), self.transcriber.as_ref())
        else {
            return String::new();
        };
        match transcriber.transcribe(&audio) {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "transcription failed");
                String::new()
            }
        }
    }

    fn lookup_word(&self, word: &str) -> bool {
        self.dictionary.contains(word)
    }

    fn add_word(&mut self, word: &str, phonemes: &str) -> Result<()> {
        self.dictionary.add(word, phonemes)
    }

    fn set_acoustic_model(&mut self, path: &Path) -> Result<()> {
        let transcriber = (self.loader)(path)?;
        self.transcriber = Some(transcriber);
        self.log_line(&format!("acoustic model {}", path.display()));
        Ok(())
    }

    fn set_dictionary(&mut self, path: &Path) -> Result<()> {
        self.dictionary = PronunciationDictionary::load(path)?;
        self.log_line(&format!("dictionary {} ({} words)", path.display(), self.dictionary.len()));
        Ok(())
    }

    fn set_language_model(&mut self, path: &Path) -> Result<()> {
        require_file("language_model", path)?;
        self.register(SearchMode::LanguageModel, path.display().to_string());
        Ok(())
    }

    fn set_grammar_file(&mut self, path: &Path) -> Result<()> {
        require_file("grammar", path)?;
        let text = std::fs::read_to_string(path)?;
        check_jsgf(&text)?;
        self.register(SearchMode::GrammarFile, path.display().to_string());
        Ok(())
    }

    fn set_grammar_string(&mut self, jsgf: &str) -> Result<()> {
        check_jsgf(jsgf)?;
        self.register(SearchMode::GrammarString, jsgf.to_string());
        Ok(())
    }

    fn set_logging_path(&mut self, path: &Path) -> Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.log = Some(file);
        Ok(())
    }

    fn select_search_mode(&mut self, mode: SearchMode) -> Result<()> {
        if mode != SearchMode::AllPhone && !self.searches.contains_key(&mode) {
            return Err(AsrError::Engine {
                message: format!("no {} search registered", mode),
            });
        }
        if let Some(previous) = self.active_search.take() {
            self.log_line(&format!("deactivated {} search", previous));
        }
        self.active_search = Some(mode);
        self.log_line(&format!("activated {} search", mode));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::transcriber::MockTranscriber;
    use tempfile::{NamedTempFile, TempDir};

    fn loader(text: &'static str) -> TranscriberLoader {
        Arc::new(move |_path: &Path| -> Result<Arc<dyn Transcriber>> {
            Ok(Arc::new(MockTranscriber::new("mock").with_response(text)))
        })
    }

    fn failing_loader() -> TranscriberLoader {
        Arc::new(|path: &Path| -> Result<Arc<dyn Transcriber>> {
            Err(AsrError::EngineInit {
                message: format!("no model at {}", path.display()),
            })
        })
    }

    fn config() -> EnergyEngineConfig {
        EnergyEngineConfig {
            vad: VadConfig {
                speech_threshold: 0.02,
                hangover_ms: 20,
                min_speech_ms: 0,
            },
            sample_rate: 16000,
            max_utterance_samples: 16000,
        }
    }

    fn models(dir: &TempDir) -> ModelPaths {
        ModelPaths::new("/models/hmm").with_log_path(dir.path().join("engine.log"))
    }

    fn ready_engine(dir: &TempDir, text: &'static str) -> EnergyEngine {
        let mut engine = EnergyEngine::new(config(), loader(text));
        engine.initialize(&models(dir)).unwrap();
        engine
    }

    #[test]
    fn transcribes_utterance_with_speech() {
        let dir = TempDir::new().unwrap();
        let mut engine = ready_engine(&dir, "open the door");
        engine.start_utterance().unwrap();
        assert!(!engine.process_frame(&[0; 160]).unwrap());
        assert!(engine.process_frame(&[4000; 160]).unwrap());
        engine.end_utterance();
        assert_eq!(engine.hypothesis(), "open the door");
        assert_eq!(engine.hypothesis(), "", "hypothesis is consumed once");
    }

    #[test]
    fn silent_utterance_has_empty_hypothesis() {
        let dir = TempDir::new().unwrap();
        let mut engine = ready_engine(&dir, "ignored");
        engine.start_utterance().unwrap();
        engine.process_frame(&[0; 160]).unwrap();
        engine.end_utterance();
        assert_eq!(engine.hypothesis(), "");
    }

    #[test]
    fn frames_outside_utterance_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut engine = ready_engine(&dir, "x");
        assert!(engine.process_frame(&[0; 160]).is_err());
    }

    #[test]
    fn start_before_initialize_fails() {
        let mut engine = EnergyEngine::new(config(), loader("x"));
        assert!(engine.start_utterance().is_err());
    }

    #[test]
    fn initialize_propagates_loader_failure() {
        let dir = TempDir::new().unwrap();
        let mut engine = EnergyEngine::new(config(), failing_loader());
        let err = engine.initialize(&models(&dir)).unwrap_err();
        assert!(matches!(err, AsrError::EngineInit { .. }));
    }

    #[test]
    fn utterance_buffer_is_bounded() {
        let dir = TempDir::new().unwrap();
        let mut engine = ready_engine(&dir, "x");
        engine.start_utterance().unwrap();
        for _ in 0..200 {
            engine.process_frame(&[4000; 160]).unwrap();
        }
        assert_eq!(engine.utterance.len(), 16000);
    }

    #[test]
    fn search_mode_requires_registration() {
        let dir = TempDir::new().unwrap();
        let mut engine = ready_engine(&dir, "x");
        assert!(engine.select_search_mode(SearchMode::GrammarString).is_err());
        engine.select_search_mode(SearchMode::AllPhone).unwrap();

        engine
            .set_grammar_string("#JSGF V1.0;\ngrammar cmd;\npublic <cmd> = stop | go;")
            .unwrap();
        engine.select_search_mode(SearchMode::GrammarString).unwrap();
        assert_eq!(engine.active_search(), Some(SearchMode::GrammarString));
    }

    #[test]
    fn grammar_text_needs_header() {
        let dir = TempDir::new().unwrap();
        let mut engine = ready_engine(&dir, "x");
        let err = engine.set_grammar_string("public <cmd> = stop;").unwrap_err();
        assert!(err.to_string().contains("#JSGF"));
    }

    #[test]
    fn grammar_file_is_validated() {
        let dir = TempDir::new().unwrap();
        let mut engine = ready_engine(&dir, "x");
        assert!(engine.set_grammar_file(Path::new("/nonexistent.gram")).is_err());

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "#JSGF V1.0;").unwrap();
        writeln!(file, "grammar yesno; public <yn> = yes | no;").unwrap();
        engine.set_grammar_file(file.path()).unwrap();
        engine.select_search_mode(SearchMode::GrammarFile).unwrap();
    }

    #[test]
    fn language_model_must_exist() {
        let dir = TempDir::new().unwrap();
        let mut engine = ready_engine(&dir, "x");
        assert!(engine.set_language_model(Path::new("/nonexistent.lm.bin")).is_err());
        let lm = NamedTempFile::new().unwrap();
        engine.set_language_model(lm.path()).unwrap();
        engine.select_search_mode(SearchMode::LanguageModel).unwrap();
        assert_eq!(
            engine.registration(SearchMode::LanguageModel),
            Some(lm.path().display().to_string().as_str())
        );
    }

    #[test]
    fn dictionary_words_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut dict = NamedTempFile::new().unwrap();
        writeln!(dict, "hello HH AH L OW").unwrap();
        let mut engine = EnergyEngine::new(config(), loader("x"));
        engine
            .initialize(&models(&dir).with_dictionary(dict.path()))
            .unwrap();
        assert!(engine.lookup_word("hello"));
        assert!(!engine.lookup_word("pool"));
        engine.add_word("pool", "P UW L").unwrap();
        assert!(engine.lookup_word("pool"));
    }

    #[test]
    fn engine_log_records_activity() {
        let dir = TempDir::new().unwrap();
        let mut engine = ready_engine(&dir, "x");
        engine.select_search_mode(SearchMode::AllPhone).unwrap();
        let log = std::fs::read_to_string(dir.path().join("engine.log")).unwrap();
        assert!(log.contains("activated all-phone search"));
    }
}
