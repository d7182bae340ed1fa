//! Error types for asrpool.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AsrError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio source errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio file {path}: {message}")]
    AudioFile { path: String, message: String },

    // Decoder engine errors
    #[error("Decoder engine failed to initialize: {message}")]
    EngineInit { message: String },

    #[error("Decoder engine error: {message}")]
    Engine { message: String },

    #[error("Transcription error: {message}")]
    Transcription { message: String },

    // Pool and slot errors
    #[error("No healthy decoder slot available")]
    NoHealthySlot,

    #[error("Update failed on {slot}: {message}")]
    SlotUpdate { slot: String, message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AsrError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn slot_update_names_the_slot() {
        let err = AsrError::SlotUpdate {
            slot: "decoder-1".to_string(),
            message: "grammar text lacks #JSGF header".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Update failed on decoder-1: grammar text lacks #JSGF header"
        );
    }

    #[test]
    fn pool_exhaustion_message() {
        assert_eq!(
            AsrError::NoHealthySlot.to_string(),
            "No healthy decoder slot available"
        );
    }

    #[test]
    fn invalid_config_value_names_the_key() {
        let err = AsrError::ConfigInvalidValue {
            key: "decoder.count".to_string(),
            message: "must be at least 1".to_string(),
        };
        assert!(err.to_string().starts_with("Invalid configuration value for decoder.count"));
    }

    #[test]
    fn audio_file_error_carries_path() {
        let err = AsrError::AudioFile {
            path: "/tmp/in.raw".to_string(),
            message: "odd byte count".to_string(),
        };
        assert_eq!(err.to_string(), "Audio file /tmp/in.raw: odd byte count");
    }

    #[test]
    fn io_and_toml_errors_convert_and_keep_their_source() {
        let io: AsrError = std::io::Error::other("disk gone").into();
        assert!(io.source().is_some());
        assert!(io.to_string().contains("disk gone"));

        let parse = toml::from_str::<toml::Value>("count = = 2").unwrap_err();
        let err: AsrError = parse.into();
        assert!(matches!(err, AsrError::Config(_)));
    }

    #[test]
    fn errors_cross_threads() {
        fn sendable<T: Send + Sync + 'static>() {}
        sendable::<AsrError>();
    }
}
