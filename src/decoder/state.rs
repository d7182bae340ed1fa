use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Utterance state of one decoder slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum SlotState {
    NotInitialized = 0,
    Idle = 1,
    UtteranceStarted = 2,
    /// Narrow window between `end_utterance` and the next `start_utterance`
    /// while a hypothesis worker reads the result.
    UtteranceEnding = 3,
    Error = 4,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SlotState::NotInitialized,
            1 => SlotState::Idle,
            2 => SlotState::UtteranceStarted,
            3 => SlotState::UtteranceEnding,
            _ => SlotState::Error,
        }
    }

    /// A slot that can still take part in recognition.
    pub fn is_healthy(self) -> bool {
        !matches!(self, SlotState::NotInitialized | SlotState::Error)
    }

    /// `start_utterance` is legal from here.
    pub fn can_start(self) -> bool {
        matches!(self, SlotState::Idle | SlotState::UtteranceEnding)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SlotState::NotInitialized => "not-initialized",
            SlotState::Idle => "idle",
            SlotState::UtteranceStarted => "utterance-started",
            SlotState::UtteranceEnding => "utterance-ending",
            SlotState::Error => "error",
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free cell holding a [`SlotState`].
#[derive(Debug)]
pub struct AtomicSlotState(AtomicU8);

impl AtomicSlotState {
    pub fn new(state: SlotState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> SlotState {
        SlotState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: SlotState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
