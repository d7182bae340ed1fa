//! Press-gated management loop. Utterances span exactly one press window.

use super::Shared;
use super::frames::FrameRouter;
use super::lifecycle::Exit;
use crate::sync::{lock, wait_timeout};
use std::time::Duration;
use tracing::debug;

/// Upper bound on one condition wait; end_loop and pause also notify.
const PRESS_POLL: Duration = Duration::from_millis(100);

pub(super) fn run(shared: &Shared, router: &mut FrameRouter<'_>) -> Exit {
    let mut buffer = vec![0i16; shared.config.frame_size.max(1)];
    let finite = shared.source_is_finite();

    loop {
        if !wait_for_press(shared) {
            return Exit::Stopped;
        }

        debug!("press, starting capture");
        if let Err(e) = lock(&shared.source).start() {
            return Exit::Failed(e);
        }
        let streamed = stream_while_pressed(shared, router, &mut buffer, finite);
        if let Err(e) = lock(&shared.source).stop() {
            debug!(error = %e, "audio source stop failed");
        }
        debug!("release, capture stopped");

        let end_of_input = match streamed {
            Ok(end_of_input) => end_of_input,
            Err(e) => return Exit::Failed(e),
        };
        if let Err(e) = router.flush() {
            return Exit::Failed(e);
        }
        router.release();

        if end_of_input {
            return Exit::EndOfInput;
        }
    }
}

/// Block until pressed (and not paused). False once the loop should end.
fn wait_for_press(shared: &Shared) -> bool {
    let mut run = lock(&shared.run);
    loop {
        if shared.should_stop() {
            return false;
        }
        if run.pressed && !shared.is_paused() {
            return true;
        }
        run = wait_timeout(&shared.signal, run, PRESS_POLL);
    }
}

/// Returns true if a finite source ran out during the window.
fn stream_while_pressed(
    shared: &Shared,
    router: &mut FrameRouter<'_>,
    buffer: &mut [i16],
    finite: bool,
) -> crate::error::Result<bool> {
    while shared.is_pressed() && !shared.should_stop() && !shared.is_paused() {
        match shared.read_frame(buffer)? {
            0 if finite => return Ok(true),
            0 => router.drain()?,
            n => router.route(&buffer[..n])?,
        }
    }
    Ok(false)
}
