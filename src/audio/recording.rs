//! Tee captured frames into a WAV file.

use crate::error::{AsrError, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub struct WavRecorder {
    path: PathBuf,
    writer: hound::WavWriter<BufWriter<File>>,
    samples: u64,
}

impl WavRecorder {
    /// Create (or truncate) a 16-bit mono WAV file.
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec).map_err(|e| AsrError::AudioFile {
            path: path.display().to_string(),
            message: format!("cannot create recording: {}", e),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            samples: 0,
        })
    }

    pub fn write(&mut self, samples: &[i16]) -> Result<()> {
        for &sample in samples {
            self.writer
                .write_sample(sample)
                .map_err(|e| self.error(e))?;
        }
        self.samples += samples.len() as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples
    }

    /// Write the final header; dropping without finalizing leaves a file
    /// most readers still accept but with a wrong length.
    pub fn finalize(self) -> Result<u64> {
        let samples = self.samples;
        let path = self.path.display().to_string();
        self.writer.finalize().map_err(|e| AsrError::AudioFile {
            path,
            message: format!("cannot finalize recording: {}", e),
        })?;
        Ok(samples)
    }

    fn error(&self, e: hound::Error) -> AsrError {
        AsrError::AudioFile {
            path: self.path.display().to_string(),
            message: format!("write failed: {}", e),
        }
    }
}
