//! Default configuration constants for asrpool.
//!
//! Shared by the config file layer, the session and the engines so that
//! every entry point agrees on the same values.

use std::path::PathBuf;

/// Default audio sample rate in Hz.
///
/// The acoustic models this front end targets are trained on 16kHz mono.
pub const SAMPLE_RATE: u32 = 16000;

/// Maximum number of samples read from the audio source per frame.
pub const FRAME_SIZE: usize = 2048;

/// Number of decoder slots in the pool.
///
/// Two is the minimum that lets one slot extract a hypothesis while the
/// other keeps consuming audio.
pub const DECODER_COUNT: usize = 2;

/// File name of the default acoustic model inside [`models_dir`].
pub const ACOUSTIC_MODEL_FILE: &str = "ggml-base.en.bin";

/// Where model files are looked up by default: `~/.local/share/asrpool/models/`
/// on Linux.
pub fn models_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("asrpool")
        .join("models")
}

/// Default acoustic model: a ggml whisper model file.
pub fn acoustic_model() -> PathBuf {
    models_dir().join(ACOUSTIC_MODEL_FILE)
}

/// Default engine log destination.
pub const LOG_PATH: &str = "/dev/null";

/// Default audio device name, resolved by the capture backend.
pub const DEVICE: &str = "default";

/// Seconds of audio held while every healthy slot is busy.
///
/// Frames beyond this are dropped oldest-first.
pub const BACKLOG_SECS: u32 = 10;

/// RMS threshold (0.0 to 1.0) above which a frame counts as speech.
pub const VAD_THRESHOLD: f32 = 0.02;

/// Trailing silence in milliseconds before the energy engine reports silence.
pub const SILENCE_DURATION_MS: u32 = 600;

/// Loud audio in milliseconds before the energy engine reports speech.
pub const MIN_SPEECH_MS: u32 = 60;

/// Upper bound on samples buffered for one utterance by the energy engine (30s).
pub const MAX_UTTERANCE_SAMPLES: usize = SAMPLE_RATE as usize * 30;

/// How long `word_exists` waits for a slot to become ready.
pub const READY_WAIT_MS: u64 = 2000;

/// Capacity of each event subscriber's channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Report the GPU backend compiled into this build.
///
/// Only one GPU backend can be active at a time; if none is enabled, returns "CPU".
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else if cfg!(feature = "hipblas") {
        "HipBLAS"
    } else if cfg!(feature = "openblas") {
        "OpenBLAS"
    } else {
        "CPU"
    }
}

/// Number of frames that fit in the backlog for the given geometry.
pub fn backlog_frames(sample_rate: u32, frame_size: usize, seconds: u32) -> usize {
    if frame_size == 0 {
        return 0;
    }
    let samples = sample_rate as usize * seconds as usize;
    samples.div_ceil(frame_size)
}
