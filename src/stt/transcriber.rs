use crate::error::{AsrError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Turns the samples of one finished utterance into text.
///
/// Shared between every energy engine that loaded the same model, so
/// implementations take `&self` and synchronize internally.
pub trait Transcriber: Send + Sync {
    /// `audio` is 16-bit mono PCM at the session sample rate.
    fn transcribe(&self, audio: &[i16]) -> Result<String>;

    fn model_name(&self) -> &str;
}

impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    fn transcribe(&self, audio: &[i16]) -> Result<String> {
        T::transcribe(self, audio)
    }

    fn model_name(&self) -> &str {
        T::model_name(self)
    }
}

/// Joins raw segment texts, dropping non-speech markers such as
/// `[BLANK_AUDIO]` or `(music)` and collapsing whitespace.
pub fn clean_transcript<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    let mut words: Vec<&str> = Vec::new();
    for segment in segments {
        let trimmed = segment.trim();
        let bracketed = (trimmed.starts_with('[') && trimmed.ends_with(']'))
            || (trimmed.starts_with('(') && trimmed.ends_with(')'));
        if bracketed {
            continue;
        }
        words.extend(trimmed.split_whitespace());
    }
    words.join(" ")
}

/// Scripted transcriber for tests. Answers every utterance with the same
/// text, or fails every time.
#[derive(Debug)]
pub struct MockTranscriber {
    name: String,
    reply: std::result::Result<String, String>,
    calls: AtomicUsize,
}

impl MockTranscriber {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reply: Ok(String::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_response(mut self, text: &str) -> Self {
        self.reply = Ok(text.to_string());
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.reply = Err(format!("{} refused the utterance", self.name));
        self
    }

    /// Number of `transcribe` calls so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, _audio: &[i16]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.reply.clone().map_err(|message| AsrError::Transcription { message })
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
