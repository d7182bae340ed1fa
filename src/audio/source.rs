use crate::error::{AsrError, Result};
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Producer of fixed-size raw audio frames (16-bit PCM mono).
///
/// The device name or file path is fixed when the source is constructed;
/// `open` binds it at a sample rate. A source may be opened and closed
/// repeatedly over a session's lifetime.
pub trait AudioSource: Send {
    fn open(&mut self, sample_rate: u32) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Fill `buffer` with up to `buffer.len()` samples.
    ///
    /// Live sources block for at most about one frame period and may return
    /// `Ok(0)` when nothing arrived. Finite sources return `Ok(0)` only at
    /// end of data.
    fn read_frame(&mut self, buffer: &mut [i16]) -> Result<usize>;

    fn stop(&mut self) -> Result<()>;

    fn close(&mut self);

    /// True for sources that end (files), false for devices.
    fn is_finite(&self) -> bool {
        false
    }

    /// Device name or path, for logs.
    fn describe(&self) -> String;
}

/// Lifecycle calls seen by a [`MockAudioSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    Open,
    Start,
    Stop,
    Close,
}

#[derive(Debug, Clone, Default)]
pub struct SourceLog {
    pub events: Vec<SourceEvent>,
    pub reads: usize,
}

/// Shared view of a [`MockAudioSource`]'s activity, usable after the source
/// has been moved into a session.
#[derive(Debug, Clone, Default)]
pub struct SourceProbe {
    log: Arc<Mutex<SourceLog>>,
}

impl SourceProbe {
    pub fn events(&self) -> Vec<SourceEvent> {
        lock(&self.log).events.clone()
    }

    pub fn reads(&self) -> usize {
        lock(&self.log).reads
    }

    pub fn count(&self, event: SourceEvent) -> usize {
        lock(&self.log).events.iter().filter(|e| **e == event).count()
    }

    fn push(&self, event: SourceEvent) {
        lock(&self.log).events.push(event);
    }
}

/// Mock audio source for testing.
///
/// Plays back scripted frames. Once the script runs out a finite source
/// reports end of data; a live source keeps producing idle frames, or
/// numbered frames whose every sample is the frame's sequence number.
#[derive(Debug)]
pub struct MockAudioSource {
    script: VecDeque<Vec<i16>>,
    finite: bool,
    idle_frame: Vec<i16>,
    numbered: Option<usize>,
    sequence: i16,
    frame_delay: Duration,
    fail_open: bool,
    fail_start: bool,
    fail_read_at: Option<usize>,
    error_message: String,
    opened: bool,
    started: bool,
    probe: SourceProbe,
}

impl MockAudioSource {
    /// A finite source with an empty script.
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            finite: true,
            idle_frame: vec![0i16; 160],
            numbered: None,
            sequence: 0,
            frame_delay: Duration::ZERO,
            fail_open: false,
            fail_start: false,
            fail_read_at: None,
            error_message: "mock audio error".to_string(),
            opened: false,
            started: false,
            probe: SourceProbe::default(),
        }
    }

    pub fn with_frames(mut self, frames: Vec<Vec<i16>>) -> Self {
        self.script = frames.into();
        self
    }

    /// Never reach end of data; silence follows the script.
    pub fn live(mut self) -> Self {
        self.finite = false;
        self
    }

    /// Live source producing frames of `frame_len` samples, each filled with
    /// its sequence number (0, 1, 2, ...).
    pub fn numbered(mut self, frame_len: usize) -> Self {
        self.finite = false;
        self.numbered = Some(frame_len);
        self
    }

    /// Sleep before every read, imitating a device delivering in real time.
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    pub fn with_open_failure(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Fail the `n`th (zero-based) read.
    pub fn with_read_failure_at(mut self, n: usize) -> Self {
        self.fail_read_at = Some(n);
        self
    }

    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    pub fn probe(&self) -> SourceProbe {
        self.probe.clone()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    fn error(&self) -> AsrError {
        AsrError::AudioCapture {
            message: self.error_message.clone(),
        }
    }

    fn next_frame(&mut self) -> Option<Vec<i16>> {
        if let Some(frame) = self.script.pop_front() {
            return Some(frame);
        }
        if self.finite {
            return None;
        }
        match self.numbered {
            Some(len) => {
                let frame = vec![self.sequence; len];
                self.sequence = self.sequence.wrapping_add(1);
                Some(frame)
            }
            None => Some(self.idle_frame.clone()),
        }
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn open(&mut self, _sample_rate: u32) -> Result<()> {
        if self.fail_open {
            return Err(AsrError::AudioDeviceNotFound {
                device: "mock".to_string(),
            });
        }
        self.opened = true;
        self.probe.push(SourceEvent::Open);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(self.error());
        }
        if !self.opened {
            return Err(AsrError::AudioCapture {
                message: "start before open".to_string(),
            });
        }
        self.started = true;
        self.probe.push(SourceEvent::Start);
        Ok(())
    }

    fn read_frame(&mut self, buffer: &mut [i16]) -> Result<usize> {
        if !self.started {
            return Err(AsrError::AudioCapture {
                message: "read while stopped".to_string(),
            });
        }
        let index = {
            let mut log = lock(&self.probe.log);
            log.reads += 1;
            log.reads - 1
        };
        if self.fail_read_at == Some(index) {
            return Err(self.error());
        }
        if !self.frame_delay.is_zero() {
            std::thread::sleep(self.frame_delay);
        }
        let Some(frame) = self.next_frame() else {
            return Ok(0);
        };
        let n = frame.len().min(buffer.len());
        buffer[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        self.probe.push(SourceEvent::Stop);
        Ok(())
    }

    fn close(&mut self) {
        self.started = false;
        self.opened = false;
        self.probe.push(SourceEvent::Close);
    }

    fn is_finite(&self) -> bool {
        self.finite
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened(source: MockAudioSource) -> MockAudioSource {
        let mut source = source;
        source.open(16000).unwrap();
        source.start().unwrap();
        source
    }

    #[test]
    fn test_mock_audio_source_plays_script_then_ends() {
        let mut source = opened(MockAudioSource::new().with_frames(vec![vec![1, 2], vec![3]]));
        let mut buf = [0i16; 4];
        assert_eq!(source.read_frame(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[1, 2]);
        assert_eq!(source.read_frame(&mut buf).unwrap(), 1);
        assert_eq!(source.read_frame(&mut buf).unwrap(), 0);
        assert!(source.is_finite());
    }

    #[test]
    fn test_live_source_keeps_producing() {
        let mut source = opened(MockAudioSource::new().live());
        let mut buf = [7i16; 160];
        for _ in 0..5 {
            assert_eq!(source.read_frame(&mut buf).unwrap(), 160);
        }
        assert!(buf.iter().all(|&s| s == 0));
        assert!(!source.is_finite());
    }

    #[test]
    fn test_numbered_frames_count_up() {
        let mut source = opened(MockAudioSource::new().numbered(4));
        let mut buf = [0i16; 4];
        for expected in 0..3 {
            source.read_frame(&mut buf).unwrap();
            assert_eq!(buf, [expected; 4]);
        }
    }

    #[test]
    fn test_frame_is_truncated_to_buffer() {
        let mut source = opened(MockAudioSource::new().with_frames(vec![vec![5; 10]]));
        let mut buf = [0i16; 4];
        assert_eq!(source.read_frame(&mut buf).unwrap(), 4);
    }

    #[test]
    fn test_read_failure_at_index() {
        let mut source = opened(
            MockAudioSource::new()
                .live()
                .with_read_failure_at(1)
                .with_error_message("overrun"),
        );
        let mut buf = [0i16; 160];
        assert!(source.read_frame(&mut buf).is_ok());
        match source.read_frame(&mut buf) {
            Err(AsrError::AudioCapture { message }) => assert_eq!(message, "overrun"),
            other => panic!("Expected AudioCapture error, got {:?}", other),
        }
        assert!(source.read_frame(&mut buf).is_ok());
    }

    #[test]
    fn test_read_requires_start() {
        let mut source = MockAudioSource::new().live();
        source.open(16000).unwrap();
        assert!(source.read_frame(&mut [0i16; 10]).is_err());
    }

    #[test]
    fn test_open_failure() {
        let mut source = MockAudioSource::new().with_open_failure();
        assert!(matches!(
            source.open(16000),
            Err(AsrError::AudioDeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_probe_tracks_lifecycle() {
        let source = MockAudioSource::new().live();
        let probe = source.probe();
        let mut source = opened(source);
        source.read_frame(&mut [0i16; 8]).unwrap();
        source.stop().unwrap();
        source.close();
        assert_eq!(
            probe.events(),
            vec![
                SourceEvent::Open,
                SourceEvent::Start,
                SourceEvent::Stop,
                SourceEvent::Close
            ]
        );
        assert_eq!(probe.reads(), 1);
        assert_eq!(probe.count(SourceEvent::Start), 1);
        assert!(!source.is_started());
    }

    #[test]
    fn test_audio_source_trait_is_object_safe() {
        let mut source: Box<dyn AudioSource> =
            Box::new(MockAudioSource::new().with_frames(vec![vec![1, 2, 3]]));
        source.open(16000).unwrap();
        source.start().unwrap();
        let mut buf = [0i16; 3];
        assert_eq!(source.read_frame(&mut buf).unwrap(), 3);
        assert_eq!(source.describe(), "mock");
    }
}
