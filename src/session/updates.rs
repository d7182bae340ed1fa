//! Applying queued slot updates without interrupting capture.
//!
//! While listening, slots are updated one at a time while they are out of
//! rotation. The current slot is updated last: once every other slot is
//! done, frames are switched to an updated slot between utterances and the
//! old current slot is picked up on a later pass.

use super::Shared;
use crate::decoder::{DecoderSlot, SlotState};
use crate::error::{AsrError, Result};
use crate::sync::lock;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Wait between passes; a slot becoming ready cuts it short.
const PASS_WAIT: Duration = Duration::from_millis(5);

pub(super) fn apply(shared: &Shared) -> Result<()> {
    // One coordinator at a time; a second caller waits and then finds
    // the queues it would have applied already empty.
    let _updates = lock(&shared.update_lock);
    let started = Instant::now();
    let result = if shared.is_listening() {
        apply_live(shared)
    } else {
        apply_idle(shared, &mut vec![false; shared.pool.len()])
    };
    shared.pool.notify_ready();
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        ok = result.is_ok(),
        "decoder updates applied"
    );
    result
}

/// Nothing is decoding: update every slot in place and restart it.
fn apply_idle(shared: &Shared, done: &mut [bool]) -> Result<()> {
    let pool = &shared.pool;
    let mut first_error = None;
    for slot in pool.slots() {
        if done[slot.index()] {
            continue;
        }
        done[slot.index()] = true;
        if !slot.is_healthy() {
            warn!(slot = slot.name(), "skipping updates for unusable slot");
            continue;
        }
        if let Err(e) = refresh(slot) {
            first_error.get_or_insert(e);
        }
    }
    pool.advance_to_ready();
    first_error.map_or(Ok(()), Err)
}

fn apply_live(shared: &Shared) -> Result<()> {
    let pool = &shared.pool;
    let mut done: Vec<bool> = pool
        .slots()
        .iter()
        .map(|slot| !slot.is_healthy() || slot.pending_updates().is_empty())
        .collect();
    let mut first_error: Option<AsrError> = None;

    while !done.iter().all(|&d| d) {
        // The management thread may exit mid-pass; nothing is routing then.
        if !shared.is_listening() {
            debug!("listening stopped during update, finishing in place");
            if let Err(e) = apply_idle(shared, &mut done) {
                first_error.get_or_insert(e);
            }
            break;
        }

        for slot in pool.slots() {
            let index = slot.index();
            if done[index] {
                continue;
            }
            if !slot.is_healthy() {
                done[index] = true;
                continue;
            }
            // Fails while the slot is current or a worker holds it; retried
            // on the next pass.
            if pool.reserve_for_update(index) {
                debug!(slot = slot.name(), "updating idle slot");
                if let Err(e) = refresh(slot) {
                    first_error.get_or_insert(e);
                }
                done[index] = true;
            }
        }

        let current = pool.current_index();
        let others_done = done
            .iter()
            .enumerate()
            .all(|(index, &d)| index == current || d);
        // The current slot goes last so frames always have an updated slot
        // to move to.
        if !done[current] && others_done {
            update_current(shared, current, &mut done, &mut first_error);
        }

        if !done.iter().all(|&d| d) {
            pool.wait_for_change(PASS_WAIT);
        }
    }

    first_error.map_or(Ok(()), Err)
}

/// Move frames off the current slot once it is between utterances, or
/// update it in place when no other healthy slot exists.
fn update_current(
    shared: &Shared,
    current: usize,
    done: &mut [bool],
    first_error: &mut Option<AsrError>,
) {
    let pool = &shared.pool;
    // Evaluated under the index lock, after any frame in flight settled it.
    let between_utterances = || !shared.in_utterance.load(Ordering::Acquire);

    let replacement = pool
        .slots()
        .iter()
        .find(|slot| slot.index() != current && slot.is_ready());
    if let Some(replacement) = replacement {
        if pool.switch_current(current, replacement.index(), between_utterances) {
            debug!(
                from = current,
                to = replacement.index(),
                "moved frames to updated slot"
            );
        }
        // The old current slot is reserved like any other on a later pass.
        return;
    }

    let alone = pool
        .slots()
        .iter()
        .all(|slot| slot.index() == current || !slot.is_healthy());
    if alone && between_utterances() && pool.reserve_current(current) {
        if let Some(slot) = pool.slot(current) {
            debug!(slot = slot.name(), "updating the only healthy slot in place");
            if let Err(e) = refresh(slot) {
                first_error.get_or_insert(e);
            }
        }
        done[current] = true;
        pool.notify_ready();
    }
}

/// Apply the queue, then give the slot a fresh utterance.
fn refresh(slot: &DecoderSlot) -> Result<()> {
    let applied = slot.apply_update_queue();
    // A failed queue leaves the slot in Error and it is not restarted.
    if slot.state() == SlotState::UtteranceStarted {
        slot.end_utterance();
    }
    if slot.state().can_start() {
        slot.start_utterance()?;
    }
    applied.map(|count| debug!(slot = slot.name(), count, "slot refreshed"))
}
