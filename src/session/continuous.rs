//! Voice-activity driven management loop.

use super::Shared;
use super::frames::FrameRouter;
use super::lifecycle::Exit;
use tracing::debug;

pub(super) fn run(shared: &Shared, router: &mut FrameRouter<'_>) -> Exit {
    let mut buffer = vec![0i16; shared.config.frame_size.max(1)];
    let finite = shared.source_is_finite();
    let mut was_paused = false;

    loop {
        if shared.should_stop() {
            return Exit::Stopped;
        }

        if shared.is_paused() {
            if !was_paused {
                was_paused = true;
                router.restart_current();
                debug!("paused, discarding audio");
            }
            // Keep reading so the device buffer does not overrun.
            match shared.read_frame(&mut buffer) {
                Ok(0) if finite => return Exit::EndOfInput,
                Ok(_) => continue,
                Err(e) => return Exit::Failed(e),
            }
        }
        was_paused = false;

        let n = match shared.read_frame(&mut buffer) {
            Ok(0) if finite => return Exit::EndOfInput,
            Ok(0) => {
                if let Err(e) = router.drain() {
                    return Exit::Failed(e);
                }
                continue;
            }
            Ok(n) => n,
            Err(e) => return Exit::Failed(e),
        };

        if let Err(e) = router.route(&buffer[..n]) {
            return Exit::Failed(e);
        }
    }
}
