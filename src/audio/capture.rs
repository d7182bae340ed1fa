//! Live capture using CPAL (Cross-Platform Audio Library).

use crate::audio::file::resample;
use crate::audio::source::AudioSource;
use crate::defaults;
use crate::error::{AsrError, Result};
use crate::sync::{lock, wait_timeout};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL's backend probing makes ALSA/JACK print harmless but alarming
/// messages.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` on file descriptor 2. Safe as long as no
/// other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Device name patterns that are never microphones.
const FILTERED_PATTERNS: &[&str] = &["surround", "front:", "rear:", "HDMI", "S/PDIF"];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

/// List input device names, skipping outputs that only look like inputs.
pub fn list_devices() -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().input_devices()).map_err(|e| {
        AsrError::AudioCapture {
            message: format!("Failed to enumerate input devices: {}", e),
        }
    })?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .collect())
}

fn find_device(name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match name {
            None | Some(defaults::DEVICE) => {
                host.default_input_device()
                    .ok_or_else(|| AsrError::AudioDeviceNotFound {
                        device: defaults::DEVICE.to_string(),
                    })
            }
            Some(name) => {
                let devices = host.input_devices().map_err(|e| AsrError::AudioCapture {
                    message: format!("Failed to enumerate devices: {}", e),
                })?;
                devices
                    .into_iter()
                    .find(|dev| dev.name().is_ok_and(|dev_name| dev_name == name))
                    .ok_or_else(|| AsrError::AudioDeviceNotFound {
                        device: name.to_string(),
                    })
            }
        }
    })
}

/// Samples handed from the CPAL callback thread to `read_frame`.
struct CaptureBuffer {
    samples: Mutex<VecDeque<i16>>,
    arrived: Condvar,
    capacity: usize,
}

impl CaptureBuffer {
    fn push(&self, data: &[i16]) {
        let mut samples = lock(&self.samples);
        samples.extend(data.iter().copied());
        let overflow = samples.len().saturating_sub(self.capacity);
        if overflow > 0 {
            samples.drain(..overflow);
            warn!(dropped = overflow, "capture buffer overrun");
        }
        drop(samples);
        self.arrived.notify_one();
    }
}

/// SAFETY: the stream is only touched from the thread that owns the
/// source (the session's management thread); CPAL's callback thread only
/// sees the `CaptureBuffer`.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Mono i16 capture at the session sample rate.
///
/// Tries a native i16 mono stream at the requested rate first, then falls
/// back to the device default format with software mixing and resampling.
pub struct CpalAudioSource {
    device_name: Option<String>,
    device: Option<cpal::Device>,
    stream: Option<SendableStream>,
    buffer: Arc<CaptureBuffer>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// `None` (or `"default"`) selects the host's default input device.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            device: None,
            stream: None,
            buffer: Arc::new(CaptureBuffer {
                samples: Mutex::new(VecDeque::new()),
                arrived: Condvar::new(),
                capacity: defaults::SAMPLE_RATE as usize * defaults::BACKLOG_SECS as usize,
            }),
            sample_rate: defaults::SAMPLE_RATE,
        }
    }

    fn device(&self) -> Result<&cpal::Device> {
        self.device.as_ref().ok_or_else(|| AsrError::AudioCapture {
            message: "device not opened".to_string(),
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let device = self.device()?;
        let preferred = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::clone(&self.buffer);
        if let Ok(stream) = device.build_input_stream(
            &preferred,
            move |data: &[i16], _: &cpal::InputCallbackInfo| buffer.push(data),
            |err| error!(error = %err, "audio stream error"),
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native(device)
    }

    fn build_stream_native(&self, device: &cpal::Device) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config = device
            .default_input_config()
            .map_err(|e| AsrError::AudioCapture {
                message: format!("Failed to query default input config: {}", e),
            })?;
        let native_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();
        debug!(
            channels,
            native_rate,
            format = ?default_config.sample_format(),
            "using native capture format with software conversion"
        );

        let buffer = Arc::clone(&self.buffer);
        let result = match default_config.sample_format() {
            SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    buffer.push(&to_mono(data, channels, native_rate, target_rate));
                },
                |err| error!(error = %err, "audio stream error"),
                None,
            ),
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let ints: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    buffer.push(&to_mono(&ints, channels, native_rate, target_rate));
                },
                |err| error!(error = %err, "audio stream error"),
                None,
            ),
            fmt => {
                return Err(AsrError::AudioCapture {
                    message: format!("Unsupported native sample format: {:?}", fmt),
                });
            }
        };
        result.map_err(|e| AsrError::AudioCapture {
            message: format!("Failed to build input stream: {}", e),
        })
    }
}

/// Average interleaved channels to mono and resample to `target_rate`.
fn to_mono(samples: &[i16], channels: usize, source_rate: u32, target_rate: u32) -> Vec<i16> {
    let mono: Vec<i16> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };
    resample(&mono, source_rate, target_rate)
}

impl AudioSource for CpalAudioSource {
    fn open(&mut self, sample_rate: u32) -> Result<()> {
        self.sample_rate = sample_rate;
        self.device = Some(find_device(self.device_name.as_deref())?);
        lock(&self.buffer.samples).clear();
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.build_stream()?;
        stream.play().map_err(|e| AsrError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn read_frame(&mut self, buffer: &mut [i16]) -> Result<usize> {
        if self.stream.is_none() {
            return Err(AsrError::AudioCapture {
                message: "read from a stopped stream".to_string(),
            });
        }
        let period = Duration::from_secs_f64(buffer.len() as f64 / self.sample_rate.max(1) as f64);
        let deadline = Instant::now() + period;

        let mut samples = lock(&self.buffer.samples);
        while samples.len() < buffer.len() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            samples = wait_timeout(&self.buffer.arrived, samples, deadline - now);
        }
        let n = samples.len().min(buffer.len());
        for (slot, sample) in buffer.iter_mut().zip(samples.drain(..n)) {
            *slot = sample;
        }
        Ok(n)
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.0.pause().map_err(|e| AsrError::AudioCapture {
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "stopping stream during close failed");
        }
        self.device = None;
        lock(&self.buffer.samples).clear();
    }

    fn describe(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| defaults::DEVICE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_non_microphone_devices() {
        assert!(should_filter_device("surround51:CARD=PCH"));
        assert!(should_filter_device("HDMI 1"));
        assert!(!should_filter_device("pipewire"));
    }

    #[test]
    fn to_mono_averages_channels() {
        assert_eq!(to_mono(&[100, 300, -200, 200], 2, 16000, 16000), vec![200, 0]);
    }

    #[test]
    fn capture_buffer_drops_oldest_on_overrun() {
        let buffer = CaptureBuffer {
            samples: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
            capacity: 4,
        };
        buffer.push(&[1, 2, 3]);
        buffer.push(&[4, 5, 6]);
        assert_eq!(
            lock(&buffer.samples).iter().copied().collect::<Vec<_>>(),
            vec![3, 4, 5, 6]
        );
    }

    #[test]
    fn read_before_start_fails() {
        let mut source = CpalAudioSource::new(Some("nonexistent".to_string()));
        assert!(source.read_frame(&mut [0i16; 16]).is_err());
        assert_eq!(source.describe(), "nonexistent");
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn captures_from_default_device() {
        let mut source = CpalAudioSource::new(None);
        source.open(16000).unwrap();
        source.start().unwrap();
        let mut buf = [0i16; 1600];
        let mut total = 0;
        for _ in 0..10 {
            total += source.read_frame(&mut buf).unwrap();
        }
        source.close();
        assert!(total > 0);
    }
}
