//! Starting, stopping and tearing down the management thread.

use super::frames::FrameRouter;
use super::{Counters, ListeningMode, Shared, continuous, push_to_talk};
use crate::defaults::READY_WAIT_MS;
use crate::error::{AsrError, Result};
use crate::sync::lock;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Why a management loop returned.
pub(super) enum Exit {
    /// `end_loop` was observed.
    Stopped,
    /// A finite source ran out.
    EndOfInput,
    Failed(AsrError),
}

/// Start slots and the source, then spawn the loop for `mode`.
pub(super) fn launch(shared: &Arc<Shared>, mode: ListeningMode) -> Result<JoinHandle<()>> {
    let started = Instant::now();
    if let Err(e) = prepare(shared, mode) {
        shared.fail(&e);
        return Err(e);
    }

    shared.end_loop.store(false, Ordering::Release);
    shared.in_utterance.store(false, Ordering::Release);
    shared.set_listening(true);
    Counters::bump(&shared.counters.managers_spawned);

    let thread_shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("{}-manager", mode))
        .spawn(move || run(thread_shared, mode));

    match spawned {
        Ok(handle) => {
            info!(%mode, elapsed_ms = started.elapsed().as_millis() as u64, "listening");
            Ok(handle)
        }
        Err(e) => {
            lock(&shared.source).close();
            shared.set_listening(false);
            let e = AsrError::from(e);
            shared.fail(&e);
            Err(e)
        }
    }
}

/// Signal the management thread to stop and join it.
pub(super) fn halt(shared: &Shared, manager: &mut Option<JoinHandle<()>>) {
    if manager.is_none() {
        return;
    }
    shared.end_loop.store(true, Ordering::Release);
    shared.wake();
    reap(manager);
}

/// Join a management thread that has exited or is about to.
pub(super) fn reap(manager: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = manager.take()
        && handle.join().is_err()
    {
        error!("management thread panicked");
    }
}

fn prepare(shared: &Shared, mode: ListeningMode) -> Result<()> {
    let _updates = lock(&shared.update_lock);
    let pool = &shared.pool;
    if pool.healthy_count() == 0 {
        return Err(AsrError::NoHealthySlot);
    }

    for slot in pool.slots() {
        if slot.state().can_start()
            && let Err(e) = slot.start_utterance()
        {
            warn!(slot = slot.name(), error = %e, "slot could not start");
        }
    }
    if pool.select_current().is_none() {
        // Slots still busy with a previous session's hypotheses.
        pool.wait_for_ready(Duration::from_millis(READY_WAIT_MS))
            .ok_or(AsrError::NoHealthySlot)?;
        pool.select_current().ok_or(AsrError::NoHealthySlot)?;
    }

    let mut source = lock(&shared.source);
    source.open(shared.config.sample_rate)?;
    if mode == ListeningMode::Continuous
        && let Err(e) = source.start()
    {
        source.close();
        return Err(e);
    }
    debug!(source = %source.describe(), "audio source opened");
    Ok(())
}

fn run(shared: Arc<Shared>, mode: ListeningMode) {
    shared.events.emit(crate::events::SessionEvent::Ready);
    let mut router = FrameRouter::new(&shared, mode);
    let exit = match mode {
        ListeningMode::Continuous => continuous::run(&shared, &mut router),
        ListeningMode::PushToTalk => push_to_talk::run(&shared, &mut router),
    };
    finish(&shared, &mut router, mode, exit);
}

fn finish(shared: &Shared, router: &mut FrameRouter<'_>, mode: ListeningMode, exit: Exit) {
    match exit {
        Exit::Stopped | Exit::EndOfInput => {
            if let Err(e) = router.flush() {
                shared.fail(&e);
            } else if mode == ListeningMode::Continuous {
                router.end_speech();
            }
        }
        Exit::Failed(e) => shared.fail(&e),
    }

    {
        let mut source = lock(&shared.source);
        if mode == ListeningMode::Continuous
            && let Err(e) = source.stop()
        {
            debug!(error = %e, "audio source stop failed");
        }
        source.close();
    }

    shared.in_utterance.store(false, Ordering::Release);
    if router.dropped() > 0 {
        warn!(frames = router.dropped(), "frames dropped from backlog");
    }
    shared.set_listening(false);
    info!(%mode, "management thread exited");
}
