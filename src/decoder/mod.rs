//! Decoder slots, their state machine and the pool that routes between them.

pub mod pool;
pub mod slot;
pub mod state;
pub mod update;

pub use pool::DecoderPool;
pub use slot::{DecoderSlot, SlotSettings};
pub use state::{AtomicSlotState, SlotState};
pub use update::SlotUpdate;
