//! Speech-to-text backends behind the energy engine.

pub mod transcriber;
pub mod whisper;

pub use transcriber::{MockTranscriber, Transcriber};
pub use whisper::{WhisperConfig, WhisperTranscriber};
