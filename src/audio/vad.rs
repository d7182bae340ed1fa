//! Energy-based voice activity detection.
//!
//! Timing is measured in samples rather than wall-clock time so a file
//! decoded faster than real time produces the same speech boundaries as
//! live capture.

use crate::defaults;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// RMS threshold for detecting speech (0.0 to 1.0).
    pub speech_threshold: f32,
    /// Silence needed after speech before the detector reports silence (milliseconds).
    pub hangover_ms: u32,
    /// Loud audio needed before the detector reports speech (milliseconds).
    pub min_speech_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::VAD_THRESHOLD,
            hangover_ms: defaults::SILENCE_DURATION_MS,
            min_speech_ms: defaults::MIN_SPEECH_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No speech; loud samples may be accumulating toward `min_speech_ms`.
    Silence,
    Speech,
    /// Quiet after speech, still reported as voice until the hangover expires.
    Hangover,
}

pub struct VoiceDetector {
    config: VadConfig,
    sample_rate: u32,
    state: VadState,
    loud_samples: usize,
    quiet_samples: usize,
    level: f32,
}

impl VoiceDetector {
    pub fn new(config: VadConfig, sample_rate: u32) -> Self {
        Self {
            config,
            sample_rate,
            state: VadState::Silence,
            loud_samples: 0,
            quiet_samples: 0,
            level: 0.0,
        }
    }

    /// Classify one frame; true while speech (including its hangover) is in progress.
    pub fn process(&mut self, samples: &[i16]) -> bool {
        let rms = calculate_rms(samples);
        self.level = rms;
        let loud = rms > self.config.speech_threshold;
        let n = samples.len();

        match self.state {
            VadState::Silence => {
                if loud {
                    self.loud_samples += n;
                    if self.loud_samples >= self.ms_to_samples(self.config.min_speech_ms) {
                        self.state = VadState::Speech;
                        self.quiet_samples = 0;
                    }
                } else {
                    self.loud_samples = 0;
                }
            }
            VadState::Speech => {
                if !loud {
                    self.state = VadState::Hangover;
                    self.quiet_samples = n;
                }
            }
            VadState::Hangover => {
                if loud {
                    self.state = VadState::Speech;
                    self.quiet_samples = 0;
                } else {
                    self.quiet_samples += n;
                    if self.quiet_samples >= self.ms_to_samples(self.config.hangover_ms) {
                        self.state = VadState::Silence;
                        self.loud_samples = 0;
                    }
                }
            }
        }

        self.state != VadState::Silence
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// RMS of the last processed frame.
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.loud_samples = 0;
        self.quiet_samples = 0;
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.config.speech_threshold = threshold;
    }

    fn ms_to_samples(&self, ms: u32) -> usize {
        (self.sample_rate as u64 * ms as u64 / 1000) as usize
    }
}

/// Calculates the Root Mean Square (RMS) of audio samples.
///
/// Returns a normalized value where 0.0 is silence, ~0.707 a full-scale
/// sine wave and 1.0 maximum amplitude.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}
