//! Per-frame routing on the management thread: pick the target slot, fail
//! over, track voice transitions and hand finished utterances to workers.

use super::{Counters, ListeningMode, Shared, worker};
use crate::decoder::SlotState;
use crate::defaults::{READY_WAIT_MS, backlog_frames};
use crate::error::{AsrError, Result};
use crate::events::SessionEvent;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, warn};

pub(super) struct FrameRouter<'a> {
    shared: &'a Arc<Shared>,
    mode: ListeningMode,
    /// Frames read while no slot was ready, oldest first.
    backlog: VecDeque<Vec<i16>>,
    capacity: usize,
    voice: bool,
    dropped: u64,
}

impl<'a> FrameRouter<'a> {
    pub(super) fn new(shared: &'a Arc<Shared>, mode: ListeningMode) -> Self {
        let config = &shared.config;
        let capacity =
            backlog_frames(config.sample_rate, config.frame_size, config.backlog_seconds).max(1);
        Self {
            shared,
            mode,
            backlog: VecDeque::new(),
            capacity,
            voice: false,
            dropped: 0,
        }
    }

    /// Decode `frame`, or hold it until a slot is ready. Frames always
    /// reach the decoders in the order they were read.
    pub(super) fn route(&mut self, frame: &[i16]) -> Result<()> {
        // Older frames first, or speech would be decoded out of order.
        self.drain()?;
        if self.backlog.is_empty() && self.feed(frame)? {
            return Ok(());
        }
        self.hold(frame.to_vec());
        Ok(())
    }

    /// Decode as much of the backlog as the ready slots allow.
    pub(super) fn drain(&mut self) -> Result<()> {
        while let Some(frame) = self.backlog.pop_front() {
            if !self.feed(&frame)? {
                self.backlog.push_front(frame);
                break;
            }
        }
        Ok(())
    }

    /// Drain the backlog completely, waiting for slots to come back.
    pub(super) fn flush(&mut self) -> Result<()> {
        let wait = Duration::from_millis(READY_WAIT_MS);
        loop {
            self.drain()?;
            if self.backlog.is_empty() {
                return Ok(());
            }
            if self.shared.pool.wait_for_ready(wait).is_none() {
                let lost = self.backlog.len() as u64;
                warn!(frames = lost, "no decoder became ready, discarding backlog");
                self.dropped += lost;
                self.shared
                    .counters
                    .frames_dropped
                    .fetch_add(lost, Ordering::Relaxed);
                self.backlog.clear();
                return Ok(());
            }
        }
    }

    /// Close an open speech segment: emit `SpeechEnd` and hand the current
    /// slot to a worker.
    pub(super) fn end_speech(&mut self) {
        if !self.voice && !self.shared.in_utterance.load(Ordering::Acquire) {
            return;
        }
        let index = self.shared.pool.current_index();
        self.voice = false;
        self.shared.events.emit(SessionEvent::SpeechEnd { slot: index });
        self.shared.in_utterance.store(false, Ordering::Release);
        self.handoff(index);
    }

    /// End of a press window: the current slot's utterance is extracted
    /// whether or not voice was detected.
    pub(super) fn release(&mut self) {
        let index = self.shared.pool.current_index();
        if self.voice {
            self.voice = false;
            self.shared.events.emit(SessionEvent::SpeechEnd { slot: index });
        }
        self.shared.in_utterance.store(false, Ordering::Release);
        self.handoff(index);
    }

    /// Drop the open utterance on the current slot and start a fresh one.
    /// An open speech segment is closed for subscribers without a hypothesis.
    pub(super) fn restart_current(&mut self) {
        let pool = &self.shared.pool;
        let index = pool.current_index();
        if self.voice {
            self.shared.events.emit(SessionEvent::SpeechEnd { slot: index });
        }
        self.voice = false;
        self.shared.in_utterance.store(false, Ordering::Release);
        let Some(slot) = pool.slot(index) else {
            return;
        };
        // Out of rotation means a worker or an update owns it now.
        if slot.state() != SlotState::UtteranceStarted || !slot.is_ready() {
            return;
        }
        slot.end_utterance();
        if let Err(e) = slot.start_utterance() {
            warn!(slot = slot.name(), error = %e, "slot could not restart after pause");
        }
        pool.notify_ready();
    }

    pub(super) fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Try to decode one frame. `Ok(false)` means no slot could take it.
    fn feed(&mut self, frame: &[i16]) -> Result<bool> {
        let pool = &self.shared.pool;
        loop {
            let Some(index) = self.target()? else {
                return Ok(false);
            };
            let Some(slot) = pool.slot(index) else {
                pool.frame_done();
                return Ok(false);
            };
            let decoded = slot.process_frame(frame);
            if let Ok(voiced) = decoded {
                Counters::bump(&self.shared.counters.frames_decoded);
                self.on_voice(index, voiced);
            }
            // `in_utterance` is settled by now, so an update waiting to
            // switch slots sees this frame's voice decision.
            pool.frame_done();
            match decoded {
                Ok(_) => return Ok(true),
                Err(e) if slot.state() == SlotState::Error => {
                    warn!(slot = slot.name(), error = %e, "decoder failed, retrying frame elsewhere");
                }
                Err(e) => {
                    // Taken out of rotation between selection and decode.
                    debug!(slot = slot.name(), error = %e, "slot unavailable, holding frame");
                    return Ok(false);
                }
            }
        }
    }

    /// The slot the next frame goes to, failing over away from an errored
    /// current slot. `None` while every healthy slot is busy. A returned
    /// slot is claimed and must be released with `frame_done`.
    fn target(&mut self) -> Result<Option<usize>> {
        let pool = &self.shared.pool;
        let current = pool.current_index();
        let errored = pool
            .slot(current)
            .is_none_or(|slot| slot.state() == SlotState::Error);
        if errored && pool.failover_from(current).is_none() {
            // Busy slots come back; failed ones never do.
            if pool.healthy_count() == 0 {
                return Err(AsrError::NoHealthySlot);
            }
            return Ok(None);
        }
        Ok(pool.claim_current())
    }

    fn on_voice(&mut self, index: usize, voiced: bool) {
        let was_voiced = self.voice;
        self.voice = voiced;
        if !was_voiced && voiced {
            self.shared.in_utterance.store(true, Ordering::Release);
            debug!(slot = index, "speech started");
            self.shared.events.emit(SessionEvent::SpeechStart { slot: index });
        } else if was_voiced && !voiced {
            debug!(slot = index, "speech ended");
            self.shared.events.emit(SessionEvent::SpeechEnd { slot: index });
            self.shared.in_utterance.store(false, Ordering::Release);
            // Push-to-talk hands off on release instead.
            if self.mode == ListeningMode::Continuous {
                self.handoff(index);
            }
        }
    }

    /// Take `index` out of rotation, move the current index on, then let a
    /// worker extract the hypothesis.
    fn handoff(&mut self, index: usize) {
        let pool = &self.shared.pool;
        let Some(slot) = pool.slot(index) else {
            return;
        };
        // Out of rotation first, then move the index, so no frame can reach
        // the slot while its hypothesis is being read.
        if slot.state() != SlotState::UtteranceStarted || !pool.begin_handoff(index) {
            debug!(slot = slot.name(), state = %slot.state(), "nothing to hand off");
            return;
        }
        match pool.advance_to_ready() {
            Some(next) => debug!(from = index, to = next, "current decoder advanced"),
            None => debug!(slot = index, "no other decoder ready"),
        }
        worker::spawn(self.shared, index);
    }

    fn hold(&mut self, frame: Vec<i16>) {
        // Bounded: a stalled pool loses the oldest audio, never the newest.
        if self.backlog.len() >= self.capacity {
            self.backlog.pop_front();
            self.dropped += 1;
            Counters::bump(&self.shared.counters.frames_dropped);
            if self.dropped == 1 || self.dropped.is_multiple_of(100) {
                warn!(dropped = self.dropped, "frame backlog full, dropping oldest");
            }
        }
        if self.backlog.is_empty() {
            debug!("no decoder ready, buffering audio");
        }
        self.backlog.push_back(frame);
    }
}
