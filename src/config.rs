use crate::defaults;
use crate::engine::{ModelPaths, SearchMode};
use crate::error::{AsrError, Result};
use crate::session::{ListeningMode, SessionConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub decoder: DecoderConfig,
    pub audio: AudioConfig,
    pub session: SessionSection,
    pub engine: EngineSection,
}

/// Decoder pool and model configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderConfig {
    pub count: usize,
    pub acoustic_model: PathBuf,
    pub dictionary: Option<PathBuf>,
    pub language_model: Option<PathBuf>,
    /// JSGF grammar file registered at startup.
    pub grammar: Option<PathBuf>,
    pub log_path: PathBuf,
    pub search_mode: SearchMode,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; `None` uses the system default.
    pub device: Option<String>,
    pub sample_rate: u32,
    pub frame_size: usize,
}

/// Listening behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSection {
    pub mode: ListeningMode,
    pub backlog_seconds: u32,
}

/// Energy engine tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSection {
    pub vad_threshold: f32,
    pub silence_duration_ms: u32,
    pub min_speech_ms: u32,
    /// Transcription language code, or "auto".
    pub language: String,
    pub threads: Option<usize>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            count: defaults::DECODER_COUNT,
            acoustic_model: defaults::acoustic_model(),
            dictionary: None,
            language_model: None,
            grammar: None,
            log_path: PathBuf::from(defaults::LOG_PATH),
            search_mode: SearchMode::AllPhone,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            frame_size: defaults::FRAME_SIZE,
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            mode: ListeningMode::Continuous,
            backlog_seconds: defaults::BACKLOG_SECS,
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            vad_threshold: defaults::VAD_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
            min_speech_ms: defaults::MIN_SPEECH_MS,
            language: "en".to_string(),
            threads: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AsrError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                AsrError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(AsrError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Reject values no session can run with.
    pub fn validate(&self) -> Result<()> {
        if self.decoder.count == 0 {
            return Err(AsrError::ConfigInvalidValue {
                key: "decoder.count".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.audio.sample_rate == 0 {
            return Err(AsrError::ConfigInvalidValue {
                key: "audio.sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.audio.frame_size == 0 {
            return Err(AsrError::ConfigInvalidValue {
                key: "audio.frame_size".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - ASRPOOL_DEVICE → audio.device
    /// - ASRPOOL_DECODERS → decoder.count
    /// - ASRPOOL_ACOUSTIC_MODEL → decoder.acoustic_model
    /// - ASRPOOL_MODE → session.mode
    ///
    /// Unparseable numbers and modes are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("ASRPOOL_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(count) = std::env::var("ASRPOOL_DECODERS")
            && let Ok(count) = count.trim().parse::<usize>()
            && count > 0
        {
            self.decoder.count = count;
        }

        if let Ok(model) = std::env::var("ASRPOOL_ACOUSTIC_MODEL")
            && !model.is_empty()
        {
            self.decoder.acoustic_model = PathBuf::from(model);
        }

        if let Ok(mode) = std::env::var("ASRPOOL_MODE")
            && let Ok(mode) = mode.parse::<ListeningMode>()
        {
            self.session.mode = mode;
        }

        self
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AsrError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/asrpool/config.toml on Linux, or a path relative to
    /// the working directory when no config directory is known.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("asrpool")
            .join("config.toml")
    }

    pub fn model_paths(&self) -> ModelPaths {
        let mut paths = ModelPaths::new(&self.decoder.acoustic_model)
            .with_log_path(&self.decoder.log_path);
        if let Some(dictionary) = &self.decoder.dictionary {
            paths = paths.with_dictionary(dictionary);
        }
        paths
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            mode: self.session.mode,
            sample_rate: self.audio.sample_rate,
            frame_size: self.audio.frame_size,
            backlog_seconds: self.session.backlog_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_asrpool_env() {
        remove_env("ASRPOOL_DEVICE");
        remove_env("ASRPOOL_DECODERS");
        remove_env("ASRPOOL_ACOUSTIC_MODEL");
        remove_env("ASRPOOL_MODE");
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();
        assert_eq!(config.decoder.count, 2);
        assert_eq!(config.decoder.search_mode, SearchMode::AllPhone);
        assert_eq!(config.decoder.dictionary, None);
        assert_eq!(config.decoder.language_model, None);
        assert_eq!(config.decoder.log_path, PathBuf::from("/dev/null"));
        assert_eq!(config.audio.device, None);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.frame_size, 2048);
        assert_eq!(config.session.mode, ListeningMode::Continuous);
        assert_eq!(config.session.backlog_seconds, 10);
        assert_eq!(config.engine.language, "en");
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_temp(
            r#"
            [decoder]
            count = 3
            acoustic_model = "/models/hmm"
            dictionary = "/models/words.dict"
            grammar = "/grammars/commands.gram"
            search_mode = "grammar-file"

            [audio]
            device = "hw:0,0"
            sample_rate = 8000
            frame_size = 512

            [session]
            mode = "push-to-talk"
            backlog_seconds = 3

            [engine]
            vad_threshold = 0.05
            language = "auto"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.decoder.count, 3);
        assert_eq!(config.decoder.acoustic_model, PathBuf::from("/models/hmm"));
        assert_eq!(
            config.decoder.grammar,
            Some(PathBuf::from("/grammars/commands.gram"))
        );
        assert_eq!(config.decoder.search_mode, SearchMode::GrammarFile);
        assert_eq!(config.audio.device, Some("hw:0,0".to_string()));
        assert_eq!(config.audio.sample_rate, 8000);
        assert_eq!(config.audio.frame_size, 512);
        assert_eq!(config.session.mode, ListeningMode::PushToTalk);
        assert_eq!(config.session.backlog_seconds, 3);
        assert_eq!(config.engine.vad_threshold, 0.05);
        assert_eq!(config.engine.language, "auto");
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_temp(
            r#"
            [audio]
            device = "pulse"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.device, Some("pulse".to_string()));
        assert_eq!(config.decoder, DecoderConfig::default());
        assert_eq!(config.session, SessionSection::default());
        assert_eq!(config.audio.frame_size, 2048);
    }

    #[test]
    fn test_zero_decoders_rejected() {
        let temp_file = write_temp("[decoder]\ncount = 0\n");
        match Config::load(temp_file.path()) {
            Err(AsrError::ConfigInvalidValue { key, .. }) => assert_eq!(key, "decoder.count"),
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_search_mode_rejected() {
        let temp_file = write_temp("[decoder]\nsearch_mode = \"keyword\"\n");
        assert!(matches!(
            Config::load(temp_file.path()),
            Err(AsrError::Config(_))
        ));
    }

    #[test]
    fn test_env_override_device() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_asrpool_env();

        set_env("ASRPOOL_DEVICE", "hw:1,0");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.device, Some("hw:1,0".to_string()));
        assert_eq!(config.decoder.count, 2); // Not overridden

        clear_asrpool_env();
    }

    #[test]
    fn test_env_override_all() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_asrpool_env();

        set_env("ASRPOOL_DEVICE", "pulse");
        set_env("ASRPOOL_DECODERS", "4");
        set_env("ASRPOOL_ACOUSTIC_MODEL", "/models/other");
        set_env("ASRPOOL_MODE", "ptt");

        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.device, Some("pulse".to_string()));
        assert_eq!(config.decoder.count, 4);
        assert_eq!(
            config.decoder.acoustic_model,
            PathBuf::from("/models/other")
        );
        assert_eq!(config.session.mode, ListeningMode::PushToTalk);

        clear_asrpool_env();
    }

    #[test]
    fn test_env_override_invalid_values_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_asrpool_env();

        set_env("ASRPOOL_DEVICE", "");
        set_env("ASRPOOL_DECODERS", "zero");
        set_env("ASRPOOL_MODE", "sometimes");
        let config = Config::default().with_env_overrides();

        assert_eq!(config, Config::default());

        clear_asrpool_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_temp(
            r#"
            [audio
            device = "broken
        "#,
        );

        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_default_path_ends_with_app_dir() {
        let path = Config::default_path();
        assert!(path.ends_with("asrpool/config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_asrpool_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_rejects_invalid_toml() {
        let temp_file = write_temp("[audio\n");
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_to_toml_loads_back() {
        let mut config = Config::default();
        config.decoder.count = 5;
        config.audio.device = Some("hw:2".to_string());
        let temp_file = write_temp(&config.to_toml().unwrap());
        assert_eq!(Config::load(temp_file.path()).unwrap(), config);
    }

    #[test]
    fn test_model_paths_and_session_config() {
        let config = Config::default();
        let paths = config.model_paths();
        assert_eq!(paths.acoustic_model, defaults::acoustic_model());
        assert_eq!(paths.dictionary, None);
        assert_eq!(config.session_config(), SessionConfig::default());
    }
}
