//! Recognition session: owns the decoder pool and audio source, runs the
//! management thread and exposes the control surface.
//!
//! A session is an ordinary value. Construct it, share it behind an `Arc`
//! if several threads need to drive it, and drop it to tear everything
//! down. Dropping joins the management thread and every outstanding
//! hypothesis worker before the pool goes away.

mod continuous;
mod frames;
mod lifecycle;
mod push_to_talk;
mod updates;
mod worker;

use crate::audio::{AudioSource, WavRecorder};
use crate::decoder::{DecoderPool, SlotUpdate};
use crate::defaults;
use crate::engine::SearchMode;
use crate::error::{AsrError, Result};
use crate::events::{EventBus, EventKind, SessionEvent, Subscription};
use crate::sink::{HypothesisSink, NullSink};
use crate::sync::{lock, wait_timeout};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use worker::WorkerSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListeningMode {
    /// Utterance boundaries come from voice activity.
    #[default]
    Continuous,
    /// Utterance boundaries come from press and release signals.
    PushToTalk,
}

impl ListeningMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ListeningMode::Continuous => "continuous",
            ListeningMode::PushToTalk => "push-to-talk",
        }
    }
}

impl fmt::Display for ListeningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListeningMode {
    type Err = AsrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "continuous" => Ok(ListeningMode::Continuous),
            "push-to-talk" | "ptt" => Ok(ListeningMode::PushToTalk),
            other => Err(AsrError::ConfigInvalidValue {
                key: "mode".to_string(),
                message: format!(
                    "unknown listening mode '{}', expected continuous or push-to-talk",
                    other
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub mode: ListeningMode,
    pub sample_rate: u32,
    /// Samples per frame read from the source.
    pub frame_size: usize,
    /// Audio held while no decoder is ready, in seconds.
    pub backlog_seconds: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: ListeningMode::Continuous,
            sample_rate: defaults::SAMPLE_RATE,
            frame_size: defaults::FRAME_SIZE,
            backlog_seconds: defaults::BACKLOG_SECS,
        }
    }
}

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub managers_spawned: u64,
    pub workers_spawned: u64,
    pub frames_read: u64,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    /// Hypothesis workers running right now.
    pub workers_active: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) managers_spawned: AtomicU64,
    pub(crate) workers_spawned: AtomicU64,
    pub(crate) frames_read: AtomicU64,
    pub(crate) frames_decoded: AtomicU64,
    pub(crate) frames_dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            managers_spawned: self.managers_spawned.load(Ordering::Relaxed),
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            workers_active: 0,
        }
    }
}

/// Flags guarded together so that waiters on `signal` never miss a change.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    pub(crate) listening: bool,
    pub(crate) pressed: bool,
}

/// State shared between the session handle, its management thread and
/// hypothesis workers.
pub(crate) struct Shared {
    pub(crate) pool: DecoderPool,
    pub(crate) config: SessionConfig,
    pub(crate) source: Mutex<Box<dyn AudioSource>>,
    pub(crate) run: Mutex<RunState>,
    pub(crate) signal: Condvar,
    pub(crate) end_loop: AtomicBool,
    pub(crate) paused: AtomicBool,
    pub(crate) in_utterance: AtomicBool,
    pub(crate) mode: Mutex<ListeningMode>,
    pub(crate) update_lock: Mutex<()>,
    pub(crate) workers: WorkerSet,
    pub(crate) events: EventBus,
    pub(crate) sink: Mutex<Box<dyn HypothesisSink>>,
    pub(crate) recorder: Mutex<Option<WavRecorder>>,
    pub(crate) counters: Counters,
    pub(crate) last_error: Mutex<Option<String>>,
}

impl Shared {
    pub(crate) fn is_listening(&self) -> bool {
        lock(&self.run).listening
    }

    pub(crate) fn set_listening(&self, listening: bool) {
        lock(&self.run).listening = listening;
        self.signal.notify_all();
    }

    pub(crate) fn is_pressed(&self) -> bool {
        lock(&self.run).pressed
    }

    pub(crate) fn set_pressed(&self, pressed: bool) {
        lock(&self.run).pressed = pressed;
        self.signal.notify_all();
    }

    /// Wake anything waiting on `signal` after an atomic flag changed.
    pub(crate) fn wake(&self) {
        let _run = lock(&self.run);
        self.signal.notify_all();
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.end_loop.load(Ordering::Acquire)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn mode(&self) -> ListeningMode {
        *lock(&self.mode)
    }

    /// Read one frame and tee it to the recorder, if any.
    pub(crate) fn read_frame(&self, buffer: &mut [i16]) -> Result<usize> {
        let n = lock(&self.source).read_frame(buffer)?;
        if n > 0 {
            Counters::bump(&self.counters.frames_read);
            self.record(&buffer[..n]);
        }
        Ok(n)
    }

    pub(crate) fn source_is_finite(&self) -> bool {
        lock(&self.source).is_finite()
    }

    fn record(&self, samples: &[i16]) {
        let mut recorder = lock(&self.recorder);
        if let Some(active) = recorder.as_mut()
            && let Err(e) = active.write(samples)
        {
            warn!(error = %e, "recording stopped after write failure");
            *recorder = None;
        }
    }

    /// Report a session-fatal error upward.
    pub(crate) fn fail(&self, e: &AsrError) {
        error!(error = %e, "recognition stopped");
        *lock(&self.last_error) = Some(e.to_string());
        self.events.emit(SessionEvent::Error {
            message: e.to_string(),
        });
    }

    /// Queue `update` on every slot.
    fn enqueue_all(&self, update: SlotUpdate) {
        let _updates = lock(&self.update_lock);
        info!(%update, "queueing decoder update");
        for slot in self.pool.slots() {
            slot.enqueue(update.clone());
        }
    }
}

/// Owned handle to one recognition session.
pub struct RecognitionSession {
    shared: Arc<Shared>,
    /// Management thread; the mutex also serializes start, stop and mode switches.
    manager: Mutex<Option<JoinHandle<()>>>,
}

impl RecognitionSession {
    pub fn new(pool: DecoderPool, source: Box<dyn AudioSource>, config: SessionConfig) -> Self {
        let mode = config.mode;
        info!(
            slots = pool.len(),
            source = %source.describe(),
            %mode,
            "recognition session created"
        );
        let shared = Shared {
            pool,
            config,
            source: Mutex::new(source),
            run: Mutex::new(RunState::default()),
            signal: Condvar::new(),
            end_loop: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            in_utterance: AtomicBool::new(false),
            mode: Mutex::new(mode),
            update_lock: Mutex::new(()),
            workers: WorkerSet::default(),
            events: EventBus::new(),
            sink: Mutex::new(Box::new(NullSink)),
            recorder: Mutex::new(None),
            counters: Counters::default(),
            last_error: Mutex::new(None),
        };
        Self {
            shared: Arc::new(shared),
            manager: Mutex::new(None),
        }
    }

    /// Deliver hypotheses to `sink` in addition to `Hypothesis` events.
    pub fn with_sink(self, sink: impl HypothesisSink) -> Self {
        *lock(&self.shared.sink) = Box::new(sink);
        self
    }

    pub fn pool(&self) -> &DecoderPool {
        &self.shared.pool
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn start_listening(&self) -> Result<()> {
        let mut manager = lock(&self.manager);
        if self.shared.is_listening() {
            match self.shared.mode() {
                ListeningMode::PushToTalk => self.resume(),
                ListeningMode::Continuous => debug!("start_listening ignored, already listening"),
            }
            return Ok(());
        }
        lifecycle::reap(&mut manager);
        self.shared.paused.store(false, Ordering::Release);
        *manager = Some(lifecycle::launch(&self.shared, self.shared.mode())?);
        Ok(())
    }

    pub fn stop_listening(&self) {
        let mut manager = lock(&self.manager);
        lifecycle::halt(&self.shared, &mut manager);
    }

    pub fn is_listening(&self) -> bool {
        self.shared.is_listening()
    }

    pub fn listening_mode(&self) -> ListeningMode {
        self.shared.mode()
    }

    /// Switch modes. While listening, the old management thread is stopped
    /// and joined before the new one starts.
    pub fn set_listening_mode(&self, mode: ListeningMode) -> Result<()> {
        let mut manager = lock(&self.manager);
        let previous = std::mem::replace(&mut *lock(&self.shared.mode), mode);
        if previous == mode {
            return Ok(());
        }
        info!(from = %previous, to = %mode, "switching listening mode");
        if !self.shared.is_listening() {
            return Ok(());
        }
        lifecycle::halt(&self.shared, &mut manager);
        *manager = Some(lifecycle::launch(&self.shared, mode)?);
        Ok(())
    }

    /// Block until the management thread exits on its own (end of file or
    /// fatal error) or is stopped from elsewhere.
    pub fn wait_for_stop(&self) {
        let mut run = lock(&self.shared.run);
        while run.listening {
            run = wait_timeout(&self.shared.signal, run, Duration::from_millis(100));
        }
        drop(run);
        lifecycle::reap(&mut lock(&self.manager));
    }

    /// Like [`wait_for_stop`](Self::wait_for_stop) but gives up after `timeout`.
    pub fn wait_for_stop_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut run = lock(&self.shared.run);
        while run.listening {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            run = wait_timeout(&self.shared.signal, run, deadline - now);
        }
        drop(run);
        lifecycle::reap(&mut lock(&self.manager));
        true
    }

    pub fn set_search_mode(&self, mode: SearchMode) {
        self.shared.enqueue_all(SlotUpdate::SearchMode(mode));
    }

    /// Queue a JSGF grammar given as text.
    pub fn set_grammar(&self, jsgf: &str) {
        self.shared
            .enqueue_all(SlotUpdate::GrammarString(jsgf.to_string()));
    }

    pub fn set_grammar_file(&self, path: &Path) {
        self.shared
            .enqueue_all(SlotUpdate::GrammarFile(path.to_path_buf()));
    }

    pub fn set_language_model(&self, path: &Path) {
        self.shared
            .enqueue_all(SlotUpdate::LanguageModel(path.to_path_buf()));
    }

    pub fn update_dictionary(&self, path: &Path) {
        self.shared
            .enqueue_all(SlotUpdate::Dictionary(path.to_path_buf()));
    }

    pub fn update_acoustic_model(&self, path: &Path) {
        self.shared
            .enqueue_all(SlotUpdate::AcousticModel(path.to_path_buf()));
    }

    pub fn update_logging_path(&self, path: &Path) {
        self.shared
            .enqueue_all(SlotUpdate::LoggingPath(path.to_path_buf()));
    }

    /// Apply every queued update. While listening this never stops capture.
    /// Returns the first slot failure; other slots keep their updates.
    pub fn apply_updates(&self) -> Result<()> {
        updates::apply(&self.shared)
    }

    pub fn word_exists(&self, word: &str) -> Result<bool> {
        let pool = &self.shared.pool;
        let index = match pool.select_current() {
            Some(index) => index,
            None => pool
                .wait_for_ready(Duration::from_millis(defaults::READY_WAIT_MS))
                .ok_or(AsrError::NoHealthySlot)?,
        };
        let slot = pool.slot(index).ok_or(AsrError::NoHealthySlot)?;
        Ok(slot.word_exists(word))
    }

    /// Add a pronunciation to every healthy slot.
    pub fn add_word(&self, word: &str, phonemes: &str) -> Result<()> {
        let _updates = lock(&self.shared.update_lock);
        let mut added = 0;
        for slot in self.shared.pool.slots() {
            if !slot.is_healthy() {
                warn!(slot = slot.name(), word, "skipping unusable slot for add_word");
                continue;
            }
            slot.add_word(word, phonemes)?;
            added += 1;
        }
        if added == 0 {
            return Err(AsrError::NoHealthySlot);
        }
        info!(word, slots = added, "word added");
        Ok(())
    }

    pub fn press_to_talk_down(&self) {
        if self.shared.is_paused() {
            debug!("press ignored while paused");
            return;
        }
        self.shared.set_pressed(true);
    }

    pub fn press_to_talk_up(&self) {
        self.shared.set_pressed(false);
    }

    pub fn is_pressed(&self) -> bool {
        self.shared.is_pressed()
    }

    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::AcqRel) {
            info!("recognition paused");
            self.shared.wake();
            self.shared.events.emit(SessionEvent::Paused);
        }
    }

    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::AcqRel) {
            info!("recognition resumed");
            self.shared.wake();
            self.shared.events.emit(SessionEvent::Resumed);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Tee captured audio into a WAV file, replacing any active recording.
    pub fn record_to(&self, path: &Path) -> Result<()> {
        let recorder = WavRecorder::create(path, self.shared.config.sample_rate)?;
        let previous = lock(&self.shared.recorder).replace(recorder);
        if let Some(previous) = previous {
            finalize_recording(previous);
        }
        info!(path = %path.display(), "recording audio");
        Ok(())
    }

    /// Finalize the active recording, returning the samples written.
    pub fn stop_recording(&self) -> Option<u64> {
        let recorder = lock(&self.shared.recorder).take()?;
        finalize_recording(recorder)
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.shared.recorder).is_some()
    }

    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        self.shared.events.subscribe(kinds)
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.shared.events.subscribe_all()
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.shared.events.unsubscribe(id)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            workers_active: self.shared.workers.active_count() as u64,
            ..self.shared.counters.snapshot()
        }
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.last_error).clone()
    }

    /// Stop listening, join every worker and flush the sink and recorder.
    /// Also run on drop.
    pub fn shutdown(&self) {
        self.stop_listening();
        self.shared.workers.join_all();
        if let Some(text) = lock(&self.shared.sink).finish() {
            debug!(chars = text.len(), "sink finished");
        }
        self.stop_recording();
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn finalize_recording(recorder: WavRecorder) -> Option<u64> {
    let path = recorder.path().display().to_string();
    match recorder.finalize() {
        Ok(samples) => {
            info!(%path, samples, "recording finalized");
            Some(samples)
        }
        Err(e) => {
            warn!(%path, error = %e, "could not finalize recording");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MockAudioSource;
    use crate::engine::{DecoderEngine, MockEngine, ModelPaths};
    use tempfile::TempDir;

    fn session(size: usize, source: MockAudioSource) -> RecognitionSession {
        let factory = |_: usize| -> Box<dyn DecoderEngine> { Box::new(MockEngine::new()) };
        let pool = DecoderPool::new(size, &ModelPaths::new("/models/hmm"), &factory);
        let config = SessionConfig {
            frame_size: 160,
            ..SessionConfig::default()
        };
        RecognitionSession::new(pool, Box::new(source), config)
    }

    #[test]
    fn listening_mode_parses() {
        assert_eq!(
            "push-to-talk".parse::<ListeningMode>().unwrap(),
            ListeningMode::PushToTalk
        );
        assert_eq!("PTT".parse::<ListeningMode>().unwrap(), ListeningMode::PushToTalk);
        assert_eq!(
            " continuous ".parse::<ListeningMode>().unwrap(),
            ListeningMode::Continuous
        );
        assert!("sometimes".parse::<ListeningMode>().is_err());
    }

    #[test]
    fn new_session_is_idle() {
        let session = session(2, MockAudioSource::new());
        assert!(!session.is_listening());
        assert!(!session.is_paused());
        assert_eq!(session.stats(), SessionStats::default());
        assert_eq!(session.last_error(), None);
    }

    #[test]
    fn pause_and_resume_emit_only_on_change() {
        let session = session(1, MockAudioSource::new());
        let sub = session.subscribe(&[EventKind::Paused, EventKind::Resumed]);
        session.pause();
        session.pause();
        session.resume();
        session.resume();
        let events: Vec<_> = sub.receiver.try_iter().collect();
        assert_eq!(events, vec![SessionEvent::Paused, SessionEvent::Resumed]);
    }

    #[test]
    fn press_ignored_while_paused() {
        let session = session(1, MockAudioSource::new());
        session.pause();
        session.press_to_talk_down();
        assert!(!session.is_pressed());
        session.resume();
        session.press_to_talk_down();
        assert!(session.is_pressed());
        session.press_to_talk_up();
        assert!(!session.is_pressed());
    }

    #[test]
    fn setters_queue_on_every_slot() {
        let session = session(3, MockAudioSource::new());
        session.set_search_mode(SearchMode::AllPhone);
        session.update_dictionary(Path::new("/dict"));
        for slot in session.pool().slots() {
            assert_eq!(
                slot.pending_updates(),
                vec![
                    SlotUpdate::SearchMode(SearchMode::AllPhone),
                    SlotUpdate::Dictionary("/dict".into()),
                ]
            );
        }
    }

    #[test]
    fn add_word_reaches_every_healthy_slot() {
        let session = session(2, MockAudioSource::new());
        session.pool().slot(1).unwrap().mark_error("test");
        session.add_word("pool", "P UW L").unwrap();
        assert!(session.pool().slot(0).unwrap().word_exists("pool"));
    }

    #[test]
    fn add_word_without_healthy_slot_fails() {
        let session = session(1, MockAudioSource::new());
        session.pool().slot(0).unwrap().mark_error("test");
        assert!(matches!(
            session.add_word("pool", "P UW L"),
            Err(AsrError::NoHealthySlot)
        ));
    }

    #[test]
    fn word_exists_without_ready_slot_fails() {
        let session = session(1, MockAudioSource::new());
        session.pool().slot(0).unwrap().mark_error("test");
        assert!(matches!(
            session.word_exists("pool"),
            Err(AsrError::NoHealthySlot)
        ));
    }

    #[test]
    fn word_exists_on_ready_slot() {
        let session = session(2, MockAudioSource::new());
        session.add_word("cache", "K AE SH").unwrap();
        session.pool().slot(1).unwrap().start_utterance().unwrap();
        assert!(session.word_exists("cache").unwrap());
        assert!(!session.word_exists("missing").unwrap());
    }

    #[test]
    fn record_to_and_stop() {
        let dir = TempDir::new().unwrap();
        let session = session(1, MockAudioSource::new());
        session.record_to(&dir.path().join("a.wav")).unwrap();
        assert!(session.is_recording());
        assert_eq!(session.stop_recording(), Some(0));
        assert!(!session.is_recording());
        assert_eq!(session.stop_recording(), None);
    }

    #[test]
    fn mode_switch_while_idle_only_records_mode() {
        let session = session(1, MockAudioSource::new());
        session
            .set_listening_mode(ListeningMode::PushToTalk)
            .unwrap();
        assert_eq!(session.listening_mode(), ListeningMode::PushToTalk);
        assert!(!session.is_listening());
        assert_eq!(session.stats().managers_spawned, 0);
    }
}
