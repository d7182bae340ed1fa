//! Audio sources, voice activity detection and recording.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod file;
pub mod recording;
pub mod source;
pub mod vad;

pub use file::FileAudioSource;
pub use recording::WavRecorder;
pub use source::{AudioSource, MockAudioSource, SourceEvent, SourceProbe};
pub use vad::{VadConfig, VoiceDetector};
