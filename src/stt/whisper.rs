//! Whisper transcription for the energy engine.
//!
//! Real inference needs the `whisper` feature, which the default build
//! enables. Without it loading is refused, so a decoder pool built on
//! whisper fails at startup instead of hearing nothing.

use crate::error::{AsrError, Result};
use crate::stt::transcriber::{Transcriber, clean_transcript};
use std::path::{Path, PathBuf};

/// Language value that lets whisper detect the spoken language.
pub const AUTO_LANGUAGE: &str = "auto";

#[derive(Debug, Clone, PartialEq)]
pub struct WhisperConfig {
    pub model_path: PathBuf,
    /// Language code such as "en", or [`AUTO_LANGUAGE`].
    pub language: String,
    pub threads: Option<usize>,
}

impl WhisperConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            language: "en".to_string(),
            threads: None,
        }
    }

    /// The language to force, or `None` to auto-detect.
    pub fn language_hint(&self) -> Option<&str> {
        (self.language != AUTO_LANGUAGE).then_some(self.language.as_str())
    }
}

pub struct WhisperTranscriber {
    config: WhisperConfig,
    name: String,
    backend: backend::Backend,
}

impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("config", &self.config)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl WhisperTranscriber {
    pub fn new(config: WhisperConfig) -> Result<Self> {
        if !config.model_path.is_file() {
            return Err(AsrError::EngineInit {
                message: format!("whisper model not found at {}", config.model_path.display()),
            });
        }
        let backend = backend::Backend::load(&config.model_path)?;
        Ok(Self {
            name: stem(&config.model_path),
            config,
            backend,
        })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &[i16]) -> Result<String> {
        let segments = self.backend.run(&self.config, &to_unit_floats(audio))?;
        Ok(clean_transcript(segments.iter().map(String::as_str)))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "whisper".to_string())
}

/// i16 PCM scaled into [-1.0, 1.0).
fn to_unit_floats(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

#[cfg(feature = "whisper")]
mod backend {
    use super::WhisperConfig;
    use crate::error::{AsrError, Result};
    use std::path::Path;
    use std::sync::{Mutex, Once};
    use whisper_rs::{
        FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters,
        install_logging_hooks,
    };

    static HOOKS: Once = Once::new();

    /// Workers create a fresh state per utterance; the context itself is
    /// shared and guarded.
    pub(super) struct Backend {
        context: Mutex<WhisperContext>,
    }

    impl Backend {
        pub(super) fn load(model: &Path) -> Result<Self> {
            HOOKS.call_once(install_logging_hooks);
            let path = model.to_str().ok_or_else(|| AsrError::EngineInit {
                message: format!("model path is not UTF-8: {}", model.display()),
            })?;
            let context = WhisperContext::new_with_params(path, WhisperContextParameters::default())
                .map_err(|e| AsrError::EngineInit {
                    message: format!("loading {}: {}", model.display(), e),
                })?;
            Ok(Self {
                context: Mutex::new(context),
            })
        }

        pub(super) fn run(&self, config: &WhisperConfig, audio: &[f32]) -> Result<Vec<String>> {
            let failed = |stage: &str, e: whisper_rs::WhisperError| AsrError::Transcription {
                message: format!("whisper {}: {}", stage, e),
            };

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_language(config.language_hint());
            if let Some(threads) = config.threads {
                params.set_n_threads(i32::try_from(threads).unwrap_or(i32::MAX));
            }
            params.set_print_special(false);
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);

            let context = crate::sync::lock(&self.context);
            let mut state = context.create_state().map_err(|e| failed("state", e))?;
            state.full(params, audio).map_err(|e| failed("inference", e))?;
            Ok(state.as_iter().map(|segment| segment.to_string()).collect())
        }
    }
}

#[cfg(not(feature = "whisper"))]
mod backend {
    use super::WhisperConfig;
    use crate::error::{AsrError, Result};
    use std::path::Path;

    pub(super) enum Backend {}

    impl Backend {
        pub(super) fn load(model: &Path) -> Result<Self> {
            Err(AsrError::EngineInit {
                message: format!(
                    "cannot load {}: built without the `whisper` feature; rebuild with --features whisper",
                    model.display()
                ),
            })
        }

        pub(super) fn run(&self, _config: &WhisperConfig, _audio: &[f32]) -> Result<Vec<String>> {
            match *self {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_defaults_to_english() {
        let config = WhisperConfig::new("/models/ggml-small.bin");
        assert_eq!(config.language_hint(), Some("en"));
        assert_eq!(config.threads, None);
    }

    #[test]
    fn auto_language_leaves_detection_to_whisper() {
        let config = WhisperConfig {
            language: AUTO_LANGUAGE.to_string(),
            ..WhisperConfig::new("/models/ggml-small.bin")
        };
        assert_eq!(config.language_hint(), None);
    }

    #[test]
    fn missing_model_is_an_init_error() {
        let err = WhisperTranscriber::new(WhisperConfig::new("/no/such/ggml.bin")).unwrap_err();
        assert!(
            matches!(err, AsrError::EngineInit { ref message } if message.contains("/no/such/ggml.bin"))
        );
    }

    #[test]
    fn samples_scale_to_unit_range() {
        let scaled = to_unit_floats(&[0, 16384, -16384, i16::MIN]);
        assert_eq!(scaled, vec![0.0, 0.5, -0.5, -1.0]);
    }

    #[test]
    fn model_name_is_the_file_stem() {
        assert_eq!(stem(Path::new("/models/ggml-tiny.en.bin")), "ggml-tiny.en");
        assert_eq!(stem(Path::new("/")), "whisper");
    }

    #[cfg(not(feature = "whisper"))]
    #[test]
    fn without_whisper_feature_loading_is_refused() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("ggml-tiny.bin");
        std::fs::write(&model, b"not a real model").unwrap();

        let err = WhisperTranscriber::new(WhisperConfig::new(&model)).unwrap_err();
        assert!(
            matches!(err, AsrError::EngineInit { ref message } if message.contains("--features whisper"))
        );
    }

    #[cfg(feature = "whisper")]
    #[test]
    fn garbage_model_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("ggml-tiny.bin");
        std::fs::write(&model, b"not a real model").unwrap();
        assert!(WhisperTranscriber::new(WhisperConfig::new(&model)).is_err());
    }
}
