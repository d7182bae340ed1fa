//! asrpool - Continuous speech recognition over a pool of decoders
//!
//! Audio frames are routed to one ready decoder at a time; finished
//! utterances are handed to worker threads for hypothesis extraction while
//! the next decoder keeps listening.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod config;
pub mod control;
pub mod decoder;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod events;
pub mod session;
pub mod sink;
pub mod stt;
pub(crate) mod sync;

#[cfg(feature = "cli")]
pub mod app;
#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "cli")]
pub mod output;

// Core traits (source → decoder → sink)
pub use audio::AudioSource;
pub use engine::{DecoderEngine, EngineFactory};
pub use sink::{CollectorSink, HypothesisSink, NullSink};
pub use stt::Transcriber;

// Pool and session
pub use decoder::{DecoderPool, DecoderSlot, SlotState, SlotUpdate};
pub use events::{EventKind, SessionEvent, Subscription};
pub use session::{ListeningMode, RecognitionSession, SessionConfig, SessionStats};

// Error handling
pub use error::{AsrError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
