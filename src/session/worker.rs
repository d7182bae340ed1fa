//! Hypothesis extraction off the capture thread.

use super::{Counters, Shared};
use crate::events::SessionEvent;
use crate::sync::lock;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Outstanding workers, at most one per slot.
#[derive(Default)]
pub(crate) struct WorkerSet {
    state: Mutex<WorkerState>,
}

#[derive(Default)]
struct WorkerState {
    handles: Vec<JoinHandle<()>>,
    active: HashSet<usize>,
}

impl WorkerSet {
    /// Join every worker spawned so far, including ones spawned while joining.
    pub(crate) fn join_all(&self) {
        loop {
            // Take the handles out so the lock is not held across join.
            let handles = std::mem::take(&mut lock(&self.state).handles);
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if handle.join().is_err() {
                    error!("hypothesis worker panicked");
                }
            }
        }
    }

    pub(crate) fn active_count(&self) -> usize {
        lock(&self.state).active.len()
    }

    fn claim(&self, index: usize) -> bool {
        let mut state = lock(&self.state);
        // Finished handles are reaped here, not joined.
        state.handles.retain(|handle| !handle.is_finished());
        state.active.insert(index)
    }

    fn release(&self, index: usize) {
        lock(&self.state).active.remove(&index);
    }

    fn track(&self, handle: JoinHandle<()>) {
        lock(&self.state).handles.push(handle);
    }
}

/// Extract the hypothesis of slot `index` on a new thread.
pub(super) fn spawn(shared: &Arc<Shared>, index: usize) {
    if !shared.workers.claim(index) {
        warn!(slot = index, "hypothesis worker already running for slot");
        return;
    }
    Counters::bump(&shared.counters.workers_spawned);

    let worker_shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("hypothesis-{}", index))
        .spawn(move || extract(&worker_shared, index));
    match spawned {
        Ok(handle) => shared.workers.track(handle),
        Err(e) => {
            warn!(slot = index, error = %e, "could not spawn worker, extracting inline");
            extract(shared, index);
        }
    }
}

fn extract(shared: &Shared, index: usize) {
    let Some(slot) = shared.pool.slot(index) else {
        shared.workers.release(index);
        return;
    };

    slot.end_utterance();
    let hypothesis = slot.hypothesis();
    let text = hypothesis.trim();
    if text.is_empty() {
        info!(slot = slot.name(), "no hypothesis");
    } else {
        info!(slot = slot.name(), text, "hypothesis");
        shared.events.emit(SessionEvent::Hypothesis {
            slot: index,
            text: text.to_string(),
        });
        let mut sink = lock(&shared.sink);
        if let Err(e) = sink.handle(text) {
            warn!(sink = sink.name(), error = %e, "hypothesis sink failed");
        }
    }

    // Release before restarting: once the slot is ready it may be handed
    // off again and needs a free worker claim.
    shared.workers.release(index);
    if let Err(e) = slot.start_utterance() {
        warn!(slot = slot.name(), error = %e, "slot could not restart after extraction");
    }
    shared.pool.notify_ready();
}
