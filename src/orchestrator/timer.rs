//! Single-shot liveness timer.
//!
//! The timer owns two tokens. `stop` fires once when the armed duration
//! elapses; the messaging loop is its only consumer. `done` is cancelled by
//! the orchestrator when the run ends so every timer or exit-watcher task
//! finishes even if it never fired.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::proc::WorkerProcess;

/// Liveness timer for one document run.
#[derive(Debug, Default)]
pub struct LivenessTimer {
    stop: CancellationToken,
    done: CancellationToken,
}

impl LivenessTimer {
    /// Create an unarmed timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that fires when the timer expires.
    #[must_use]
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    /// Whether the timer has fired.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Fire after `after`, unless the run ends first.
    pub fn arm(&self, after: Duration) -> JoinHandle<()> {
        let stop = self.stop.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = done.cancelled() => {}
                () = tokio::time::sleep(after) => {
                    debug!(after_secs = after.as_secs(), "liveness timer fired");
                    stop.cancel();
                }
            }
        })
    }

    /// Wait for `process` to exit, then fire after `after`, unless the run
    /// ends first.
    pub fn arm_on_exit(
        &self,
        mut process: Box<dyn WorkerProcess>,
        after: Duration,
    ) -> JoinHandle<()> {
        let stop = self.stop.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            let pid = process.pid();
            let exited = tokio::select! {
                () = done.cancelled() => return,
                exited = process.wait() => exited,
            };

            match exited {
                Ok(state) if state.success => info!(pid, "worker exited"),
                Ok(state) => warn!(pid, status = %state.describe(), "worker exited unsuccessfully"),
                Err(err) => warn!(pid, %err, "failed to collect worker exit status"),
            }

            tokio::select! {
                () = done.cancelled() => {}
                () = tokio::time::sleep(after) => {
                    debug!(pid, "liveness timer fired after worker exit");
                    stop.cancel();
                }
            }
        })
    }

    /// End the run: every armed task completes without firing.
    pub fn release(&self) {
        self.done.cancel();
    }
}
