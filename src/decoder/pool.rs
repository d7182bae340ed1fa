//! Fixed pool of decoder slots plus the "current slot" index that frames
//! are routed to.
//!
//! Every change of the current index, and every readiness flip that must
//! be atomic with respect to it, happens under the `current` lock. A slot
//! is only ever made current while its `ready` flag is set.

use crate::decoder::slot::DecoderSlot;
use crate::decoder::state::SlotState;
use crate::engine::{EngineFactory, ModelPaths};
use crate::sync::{lock, wait_timeout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct DecoderPool {
    slots: Vec<DecoderSlot>,
    current: Mutex<usize>,
    /// Set while the management thread decodes a frame on the current slot.
    /// Only written with `current` held.
    feeding: AtomicBool,
    readiness: Condvar,
}

impl DecoderPool {
    /// Build and initialize `size` slots. Slots that fail to initialize
    /// stay in the pool in `Error` state.
    pub fn new(size: usize, models: &ModelPaths, factory: &dyn EngineFactory) -> Self {
        let size = size.max(1);
        let slots: Vec<DecoderSlot> = (0..size)
            .map(|index| DecoderSlot::new(index, factory.create(index)))
            .collect();

        for slot in &slots {
            if let Err(e) = slot.initialize(models) {
                warn!(slot = slot.name(), error = %e, "decoder failed to initialize");
            }
        }

        let healthy = slots.iter().filter(|s| s.is_healthy()).count();
        info!(size, healthy, "decoder pool created");

        Self {
            slots,
            current: Mutex::new(0),
            feeding: AtomicBool::new(false),
            readiness: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&DecoderSlot> {
        self.slots.get(index)
    }

    pub fn slots(&self) -> &[DecoderSlot] {
        &self.slots
    }

    pub fn current_index(&self) -> usize {
        *lock(&self.current)
    }

    pub fn healthy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_healthy()).count()
    }

    pub fn ready_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_ready()).count()
    }

    /// The current slot if it is ready, otherwise the lowest ready slot,
    /// which becomes current.
    pub fn select_current(&self) -> Option<usize> {
        let mut current = lock(&self.current);
        self.pick(&mut current)
    }

    /// [`select_current`](Self::select_current) for a frame about to be
    /// decoded. The index cannot be switched away until
    /// [`frame_done`](Self::frame_done), so a voiced frame never lands on
    /// a slot that has just stopped being current.
    pub fn claim_current(&self) -> Option<usize> {
        let mut current = lock(&self.current);
        let index = self.pick(&mut current)?;
        self.feeding.store(true, Ordering::Release);
        Some(index)
    }

    pub fn frame_done(&self) {
        let _current = lock(&self.current);
        self.feeding.store(false, Ordering::Release);
    }

    /// Make the lowest ready slot current, if there is one.
    pub fn advance_to_ready(&self) -> Option<usize> {
        let mut current = lock(&self.current);
        let next = self.lowest_ready()?;
        *current = next;
        Some(next)
    }

    /// Scan circularly from the slot after `failed`, never returning
    /// `failed` itself. The first ready slot becomes current.
    pub fn failover_from(&self, failed: usize) -> Option<usize> {
        let mut current = lock(&self.current);
        let len = self.slots.len();
        // Start after `failed` so a pool of one never fails over to itself.
        let next = (1..len)
            .map(|offset| (failed + offset) % len)
            .find(|&candidate| self.slots[candidate].is_ready())?;
        if *current == failed {
            *current = next;
        }
        info!(from = failed, to = next, "failing over to next decoder");
        Some(next)
    }

    /// Take `index` out of rotation before its hypothesis is extracted.
    /// False if it was already out, so at most one caller wins.
    pub fn begin_handoff(&self, index: usize) -> bool {
        let _current = lock(&self.current);
        let slot = &self.slots[index];
        // A worker or the update coordinator may have claimed it first.
        if !slot.is_ready() {
            return false;
        }
        slot.set_ready(false);
        true
    }

    /// Claim a non-current slot with an open utterance for a hot update.
    /// The slot stops being eligible for frames until it restarts.
    pub fn reserve_for_update(&self, index: usize) -> bool {
        let current = lock(&self.current);
        let slot = &self.slots[index];
        if index == *current
            || !slot.is_ready()
            || slot.state() != SlotState::UtteranceStarted
        {
            return false;
        }
        slot.set_ready(false);
        true
    }

    /// Claim the current slot itself. Only used when it is the last
    /// healthy slot and there is nowhere else to route frames.
    pub fn reserve_current(&self, index: usize) -> bool {
        let current = lock(&self.current);
        let slot = &self.slots[index];
        if index != *current || !slot.is_ready() {
            return false;
        }
        slot.set_ready(false);
        true
    }

    /// Move the current index from `from` to `to` if `to` is ready, no
    /// frame is being decoded and `allowed` agrees. `allowed` runs under
    /// the index lock.
    pub fn switch_current(&self, from: usize, to: usize, allowed: impl FnOnce() -> bool) -> bool {
        let mut current = lock(&self.current);
        // A frame in flight may yet open an utterance on `from`; the caller
        // retries on its next pass.
        if *current != from
            || self.feeding.load(Ordering::Acquire)
            || !self.slots[to].is_ready()
            || !allowed()
        {
            return false;
        }
        *current = to;
        true
    }

    pub fn mark_errored(&self, index: usize, reason: &str) {
        let _current = lock(&self.current);
        self.slots[index].mark_error(reason);
    }

    /// Wake anything blocked in [`wait_for_ready`](Self::wait_for_ready).
    pub fn notify_ready(&self) {
        let _current = lock(&self.current);
        self.readiness.notify_all();
    }

    /// Block until some slot is ready, returning the lowest ready index.
    /// Does not move the current index.
    pub fn wait_for_ready(&self, timeout: Duration) -> Option<usize> {
        let deadline = Instant::now() + timeout;
        let mut current = lock(&self.current);
        loop {
            if let Some(index) = self.lowest_ready() {
                return Some(index);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            current = wait_timeout(&self.readiness, current, deadline - now);
        }
    }

    /// Wait once for a readiness notification, at most `timeout`.
    pub fn wait_for_change(&self, timeout: Duration) {
        let current = lock(&self.current);
        drop(wait_timeout(&self.readiness, current, timeout));
    }

    fn pick(&self, current: &mut usize) -> Option<usize> {
        if self.slots[*current].is_ready() {
            return Some(*current);
        }
        let next = self.lowest_ready()?;
        *current = next;
        Some(next)
    }

    fn lowest_ready(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_ready())
    }
}

impl std::fmt::Debug for DecoderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderPool")
            .field("slots", &self.slots)
            .field("current", &self.current_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DecoderEngine, MockEngine};
    use std::sync::Arc;
    use std::thread;

    fn pool(size: usize) -> DecoderPool {
        let factory = |_: usize| -> Box<dyn DecoderEngine> { Box::new(MockEngine::new()) };
        DecoderPool::new(size, &ModelPaths::new("/models/hmm"), &factory)
    }

    fn start_all(pool: &DecoderPool) {
        for slot in pool.slots() {
            slot.start_utterance().unwrap();
        }
    }

    #[test]
    fn new_initializes_every_slot() {
        let pool = pool(3);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.healthy_count(), 3);
        assert_eq!(pool.ready_count(), 0);
        assert!(pool.slots().iter().all(|s| s.state() == SlotState::Idle));
    }

    #[test]
    fn zero_size_is_clamped_to_one() {
        assert_eq!(pool(0).len(), 1);
    }

    #[test]
    fn failed_slots_stay_in_pool() {
        let factory = |index: usize| -> Box<dyn DecoderEngine> {
            if index == 1 {
                Box::new(MockEngine::new().with_init_failure())
            } else {
                Box::new(MockEngine::new())
            }
        };
        let pool = DecoderPool::new(3, &ModelPaths::new("/m"), &factory);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.healthy_count(), 2);
        assert_eq!(pool.slot(1).unwrap().state(), SlotState::Error);
    }

    #[test]
    fn advance_picks_lowest_ready() {
        let pool = pool(3);
        assert_eq!(pool.advance_to_ready(), None);
        pool.slot(2).unwrap().start_utterance().unwrap();
        assert_eq!(pool.advance_to_ready(), Some(2));
        assert_eq!(pool.current_index(), 2);
    }

    #[test]
    fn select_current_keeps_ready_current() {
        let pool = pool(3);
        start_all(&pool);
        assert_eq!(pool.advance_to_ready(), Some(0));
        assert_eq!(pool.select_current(), Some(0));
        assert!(pool.begin_handoff(0));
        assert!(!pool.begin_handoff(0));
        assert_eq!(pool.select_current(), Some(1));
    }

    #[test]
    fn failover_is_circular_and_skips_failed_slot() {
        let pool = pool(3);
        start_all(&pool);
        pool.switch_current(0, 2, || true);
        pool.mark_errored(2, "test");
        assert_eq!(pool.failover_from(2), Some(0));
        assert_eq!(pool.current_index(), 0);
    }

    #[test]
    fn failover_never_returns_failed_slot() {
        let pool = pool(2);
        start_all(&pool);
        assert!(pool.begin_handoff(1));
        pool.mark_errored(0, "test");
        assert_eq!(pool.failover_from(0), None);
        assert_eq!(pool.current_index(), 0);
    }

    #[test]
    fn failover_on_single_slot_finds_nothing() {
        let pool = pool(1);
        start_all(&pool);
        assert_eq!(pool.failover_from(0), None);
    }

    #[test]
    fn reserve_rejects_current_and_unstarted() {
        let pool = pool(3);
        pool.slot(1).unwrap().start_utterance().unwrap();
        pool.slot(0).unwrap().start_utterance().unwrap();
        assert!(!pool.reserve_for_update(0));
        assert!(!pool.reserve_for_update(2));
        assert!(pool.reserve_for_update(1));
        assert!(!pool.slot(1).unwrap().is_ready());
        assert!(!pool.reserve_for_update(1));
    }

    #[test]
    fn reserve_current_only_for_current() {
        let pool = pool(2);
        start_all(&pool);
        assert!(!pool.reserve_current(1));
        assert!(pool.reserve_current(0));
        assert!(!pool.slot(0).unwrap().is_ready());
    }

    #[test]
    fn switch_requires_ready_target_and_permission() {
        let pool = pool(2);
        pool.slot(0).unwrap().start_utterance().unwrap();
        assert!(!pool.switch_current(0, 1, || true));
        pool.slot(1).unwrap().start_utterance().unwrap();
        assert!(!pool.switch_current(0, 1, || false));
        assert!(!pool.switch_current(1, 0, || true));
        assert!(pool.switch_current(0, 1, || true));
        assert_eq!(pool.current_index(), 1);
    }

    #[test]
    fn switch_waits_for_the_frame_being_decoded() {
        let pool = pool(2);
        start_all(&pool);
        assert_eq!(pool.claim_current(), Some(0));
        assert!(!pool.switch_current(0, 1, || true));
        assert_eq!(pool.current_index(), 0);

        pool.frame_done();
        assert!(pool.switch_current(0, 1, || true));
        assert_eq!(pool.current_index(), 1);
    }

    #[test]
    fn claim_moves_off_a_slot_that_is_not_ready() {
        let pool = pool(2);
        pool.slot(1).unwrap().start_utterance().unwrap();
        assert_eq!(pool.claim_current(), Some(1));
        assert_eq!(pool.current_index(), 1);
        pool.frame_done();
    }

    #[test]
    fn wait_for_ready_times_out() {
        let pool = pool(2);
        let start = Instant::now();
        assert_eq!(pool.wait_for_ready(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wait_for_ready_wakes_on_notify() {
        let pool = Arc::new(pool(2));
        let worker = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                pool.slot(1).unwrap().start_utterance().unwrap();
                pool.notify_ready();
            })
        };
        assert_eq!(pool.wait_for_ready(Duration::from_secs(5)), Some(1));
        worker.join().unwrap();
    }

    #[test]
    fn wait_for_change_returns_after_timeout() {
        let pool = pool(1);
        let start = Instant::now();
        pool.wait_for_change(Duration::from_millis(10));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
