//! File-backed audio source.
//!
//! `.wav` files are decoded with hound, mixed to mono and resampled to the
//! session rate. Anything else is read as headerless little-endian signed
//! 16-bit mono samples already at the session rate.

use crate::audio::source::AudioSource;
use crate::error::{AsrError, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct FileAudioSource {
    path: PathBuf,
    samples: Vec<i16>,
    position: usize,
    started: bool,
}

impl FileAudioSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            samples: Vec::new(),
            position: 0,
            started: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_error(&self, message: String) -> AsrError {
        AsrError::AudioFile {
            path: self.path.display().to_string(),
            message,
        }
    }

    fn is_wav(&self) -> bool {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
    }
}

/// Decode WAV data to mono samples at `target_rate`.
pub fn decode_wav(reader: impl Read, target_rate: u32) -> std::result::Result<Vec<i16>, String> {
    let mut wav_reader =
        hound::WavReader::new(reader).map_err(|e| format!("Failed to parse WAV file: {}", e))?;
    let spec = wav_reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(format!(
            "unsupported WAV format: {}-bit {:?} (need 16-bit integer)",
            spec.bits_per_sample, spec.sample_format
        ));
    }

    let raw: Vec<i16> = wav_reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("Failed to read WAV samples: {}", e))?;

    let channels = spec.channels.max(1) as usize;
    let mono: Vec<i16> = if channels == 1 {
        raw
    } else {
        raw.chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    Ok(resample(&mono, spec.sample_rate, target_rate))
}

/// Interpret bytes as little-endian signed 16-bit samples.
///
/// A trailing odd byte is ignored.
pub fn decode_raw(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

impl AudioSource for FileAudioSource {
    fn open(&mut self, sample_rate: u32) -> Result<()> {
        let file = std::fs::File::open(&self.path)
            .map_err(|e| self.file_error(format!("cannot open: {}", e)))?;
        let samples = if self.is_wav() {
            decode_wav(std::io::BufReader::new(file), sample_rate)
                .map_err(|message| self.file_error(message))?
        } else {
            let mut bytes = Vec::new();
            std::io::BufReader::new(file)
                .read_to_end(&mut bytes)
                .map_err(|e| self.file_error(format!("read failed: {}", e)))?;
            if bytes.len() % 2 != 0 {
                warn!(path = %self.path.display(), "raw audio has an odd byte count; last byte ignored");
            }
            decode_raw(&bytes)
        };
        debug!(path = %self.path.display(), samples = samples.len(), "audio file loaded");
        self.samples = samples;
        self.position = 0;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn read_frame(&mut self, buffer: &mut [i16]) -> Result<usize> {
        if !self.started || self.position >= self.samples.len() {
            return Ok(0);
        }
        let end = (self.position + buffer.len()).min(self.samples.len());
        let n = end - self.position;
        buffer[..n].copy_from_slice(&self.samples[self.position..end]);
        self.position = end;
        Ok(n)
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn close(&mut self) {
        self.started = false;
        self.samples = Vec::new();
        self.position = 0;
    }

    fn is_finite(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn read_all(source: &mut FileAudioSource, frame: usize) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut buf = vec![0i16; frame];
        loop {
            let n = source.read_frame(&mut buf).unwrap();
            if n == 0 {
                return sizes;
            }
            sizes.push(n);
        }
    }

    #[test]
    fn raw_file_is_read_in_frames_until_eof() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("speech.raw");
        let bytes: Vec<u8> = (0..2500i16).flat_map(|s| s.to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();

        let mut source = FileAudioSource::new(&path);
        source.open(16000).unwrap();
        source.start().unwrap();
        assert_eq!(read_all(&mut source, 1024), vec![1024, 1024, 452]);
        assert_eq!(source.read_frame(&mut [0i16; 8]).unwrap(), 0);
    }

    #[test]
    fn wav_file_is_downmixed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stereo.WAV");
        std::fs::write(&path, make_wav_data(16000, 2, &[100, 200, 300, 400])).unwrap();

        let mut source = FileAudioSource::new(&path);
        source.open(16000).unwrap();
        source.start().unwrap();
        let mut buf = [0i16; 8];
        assert_eq!(source.read_frame(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[150, 350]);
    }

    #[test]
    fn missing_file_fails_to_open() {
        let mut source = FileAudioSource::new("/nonexistent/audio.raw");
        match source.open(16000) {
            Err(AsrError::AudioFile { path, .. }) => assert_eq!(path, "/nonexistent/audio.raw"),
            other => panic!("Expected AudioFile error, got {:?}", other),
        }
    }

    #[test]
    fn invalid_wav_fails_to_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, [0u8, 1, 2, 3]).unwrap();
        let err = FileAudioSource::new(&path).open(16000).unwrap_err();
        assert!(err.to_string().contains("Failed to parse WAV file"));
    }

    #[test]
    fn reopen_rewinds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.raw");
        std::fs::write(&path, decode_raw_inverse(&[1, 2, 3])).unwrap();

        let mut source = FileAudioSource::new(&path);
        source.open(16000).unwrap();
        source.start().unwrap();
        assert_eq!(read_all(&mut source, 2), vec![2, 1]);
        source.close();
        source.open(16000).unwrap();
        source.start().unwrap();
        assert_eq!(read_all(&mut source, 8), vec![3]);
    }

    #[test]
    fn reads_nothing_before_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idle.raw");
        std::fs::write(&path, decode_raw_inverse(&[1, 2])).unwrap();
        let mut source = FileAudioSource::new(&path);
        source.open(16000).unwrap();
        assert_eq!(source.read_frame(&mut [0i16; 4]).unwrap(), 0);
    }

    fn decode_raw_inverse(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn decode_raw_ignores_trailing_byte() {
        assert_eq!(decode_raw(&[0x01, 0x00, 0xff, 0xff, 0x07]), vec![1, -1]);
    }

    #[test]
    fn decode_wav_resamples_48k() {
        let data = make_wav_data(48000, 1, &vec![1000i16; 48000]);
        let samples = decode_wav(Cursor::new(data), 16000).unwrap();
        assert!(samples.len() >= 15900 && samples.len() <= 16100);
        assert!(samples.iter().all(|&s| (900..=1100).contains(&s)));
    }

    #[test]
    fn decode_wav_rejects_float() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.finalize().unwrap();
        let err = decode_wav(Cursor::new(cursor.into_inner()), 16000).unwrap_err();
        assert!(err.contains("unsupported WAV format"));
    }

    #[test]
    fn resample_identity_same_rate() {
        let samples = vec![100i16, 200, 300];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn resample_upsample_interpolates() {
        let resampled = resample(&[0i16, 1000, 2000], 8000, 16000);
        assert_eq!(resampled.len(), 6);
        assert_eq!(resampled[1], 500);
    }

    #[test]
    fn resample_empty_input() {
        assert!(resample(&[], 48000, 16000).is_empty());
    }
}
