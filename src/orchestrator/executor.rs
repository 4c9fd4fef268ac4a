//! Out-of-process executor.
//!
//! Runs one document in a detached worker process, or hands it to the
//! in-process fallback when the channel or worker cannot be prepared.
//!
//! ## Preparing a run
//!
//! The channel is opened in master role. If it already existed, a previous
//! supervisor spawned a worker for this document:
//!
//! - the recorded `(pid, start_time)` is still alive → *orphan*: arm the long
//!   timeout and resume messaging;
//! - otherwise → *zombie*: arm the short timeout so stale messages are
//!   drained and the run ends promptly.
//!
//! If the channel is new the document is posted to it as `start`, then a
//! worker is spawned with [`form_argv`]. Its identity is recorded and
//! checkpointed immediately, and the short timeout is armed once the
//! process exits.
//!
//! ## Running
//!
//! `run` returns the result stream right away. A background task drives the
//! messaging loop, contains panics, then saves the document state and only
//! after that closes the stream.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::cancel::CancelFlag;
use crate::channel::{Channel, ChannelFactory, Message, Opened, Role};
use crate::messaging::{self, ExecutorBackend};
use crate::models::{DocumentResult, DocumentState, ResultStatus};
use crate::orchestrator::registry::RunRegistry;
use crate::orchestrator::timer::LivenessTimer;
use crate::orchestrator::{DocumentStore, Executor};
use crate::proc::{LaunchFailure, LivenessChecker, ProcessLauncher};
use crate::worker::form_argv;
use crate::Result;

/// How long to wait for a worker that is known to be gone.
pub const ZOMBIE_PROCESS_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for a live worker found after a restart; the maximum
/// command duration.
pub const ORPHAN_PROCESS_TIMEOUT: Duration = Duration::from_secs(172_800);

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Liveness timeouts. Defaults to the protocol constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Wait after the worker is gone.
    pub zombie: Duration,
    /// Wait for an orphaned but live worker.
    pub orphan: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            zombie: ZOMBIE_PROCESS_TIMEOUT,
            orphan: ORPHAN_PROCESS_TIMEOUT,
        }
    }
}

/// Timeout to arm when reattaching to an existing channel.
#[must_use]
pub fn reattach_timeout(worker_alive: bool, timeouts: &Timeouts) -> Duration {
    if worker_alive {
        timeouts.orphan
    } else {
        timeouts.zombie
    }
}

/// How the supervisor came to be attached to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// A new worker was spawned for this run.
    Spawned,
    /// Existing channel, recorded worker still alive.
    Orphan,
    /// Existing channel, recorded worker gone.
    Zombie,
}

struct Prepared {
    channel: Box<dyn Channel>,
    attachment: Attachment,
}

/// Executor that runs documents in a detached worker process.
pub struct OutOfProcExecutor {
    channels: Arc<dyn ChannelFactory>,
    launcher: Arc<dyn ProcessLauncher>,
    liveness: Arc<dyn LivenessChecker>,
    fallback: Arc<dyn Executor>,
    worker_program: PathBuf,
    timeouts: Timeouts,
    poll_interval: Duration,
    registry: RunRegistry,
}

impl OutOfProcExecutor {
    /// Wire the executor to its collaborators.
    #[must_use]
    pub fn new(
        channels: Arc<dyn ChannelFactory>,
        launcher: Arc<dyn ProcessLauncher>,
        liveness: Arc<dyn LivenessChecker>,
        fallback: Arc<dyn Executor>,
        worker_program: impl Into<PathBuf>,
    ) -> Self {
        Self {
            channels,
            launcher,
            liveness,
            fallback,
            worker_program: worker_program.into(),
            timeouts: Timeouts::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            registry: RunRegistry::new(),
        }
    }

    /// Override the liveness timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Override how often the cancel flag is polled while the worker is silent.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Share a run registry with other executors in the same supervisor.
    #[must_use]
    pub fn with_registry(mut self, registry: RunRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Active liveness timeouts.
    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Registry of documents this executor is coordinating.
    #[must_use]
    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    fn initialize(
        &self,
        state: &mut DocumentState,
        store: &dyn DocumentStore,
        timer: &LivenessTimer,
    ) -> Result<Prepared> {
        let Opened {
            mut channel,
            existed,
        } = self
            .channels
            .open(Role::Master, &state.document_id)
            .inspect_err(|err| error!(%err, "failed to create ipc channel"))?;

        if existed {
            let proc_info = state.proc_info;
            info!(
                pid = proc_info.pid,
                "discovered existing channel, looking for detached worker"
            );

            let alive = self.liveness.is_alive(&proc_info);
            let attachment = if alive {
                info!(
                    pid = proc_info.pid,
                    start_time = proc_info.start_time,
                    "found orphan worker"
                );
                Attachment::Orphan
            } else {
                info!(pid = proc_info.pid, "worker not found, treating as exited");
                Attachment::Zombie
            };

            let timeout = reattach_timeout(alive, &self.timeouts);
            info!(timeout_secs = timeout.as_secs(), ?attachment, "liveness timer armed");
            timer.arm(timeout);
            return Ok(Prepared {
                channel,
                attachment,
            });
        }

        debug!("channel not found, starting a new worker");
        // Must be durable before the worker exists.
        let start = Message::Start {
            document: state.clone(),
        };
        if let Err(err) = channel.send(&start) {
            error!(%err, "failed to post document to new channel");
            if let Err(close_err) = channel.close() {
                warn!(%close_err, "failed to discard unused channel");
            }
            return Err(err);
        }

        let argv = form_argv(&state.document_id);
        match self.launcher.start(&self.worker_program, &argv) {
            Ok(process) => {
                state.proc_info = process.proc_info();
                info!(
                    pid = state.proc_info.pid,
                    start_time = state.proc_info.start_time,
                    "worker launched"
                );
                store.checkpoint(state);
                timer.arm_on_exit(process, self.timeouts.zombie);
                Ok(Prepared {
                    channel,
                    attachment: Attachment::Spawned,
                })
            }
            Err(LaunchFailure { error, partial }) => {
                error!(
                    program = %self.worker_program.display(),
                    %error,
                    "failed to start worker"
                );
                if let Some(mut process) = partial {
                    if let Err(err) = process.kill() {
                        warn!(pid = process.pid(), %err, "failed to kill partially started worker");
                    }
                }
                if let Err(err) = channel.close() {
                    warn!(%err, "failed to discard unused channel");
                }
                Err(error)
            }
        }
    }
}

impl Executor for OutOfProcExecutor {
    fn run(
        &self,
        cancel: CancelFlag,
        store: Arc<dyn DocumentStore>,
    ) -> mpsc::Receiver<DocumentResult> {
        let mut state = store.load();
        let span = info_span!("outofproc", document_id = %state.document_id);

        let guard = match self.registry.claim(&state.document_id) {
            Ok(guard) => guard,
            Err(err) => {
                span.in_scope(|| error!(%err, "refusing concurrent run of the same document"));
                let (_tx, rx) = mpsc::channel(1);
                return rx;
            }
        };

        let timer = LivenessTimer::new();
        let prepared =
            match span.in_scope(|| self.initialize(&mut state, store.as_ref(), &timer)) {
                Ok(prepared) => prepared,
                Err(err) => {
                    span.in_scope(|| {
                        warn!(%err, "out-of-process setup failed, falling back to in-process execution");
                    });
                    timer.release();
                    drop(guard);
                    return self.fallback.run(cancel, store);
                }
            };

        if !state.status.is_terminal() {
            state.status = ResultStatus::InProgress;
        }

        let (results_tx, results_rx) = mpsc::channel(state.plugins.len() + 1);
        let poll_interval = self.poll_interval;

        tokio::spawn(
            async move {
                let _guard = guard;
                let Prepared {
                    mut channel,
                    attachment,
                } = prepared;

                let driven = AssertUnwindSafe(drive(
                    &mut state,
                    channel.as_mut(),
                    &results_tx,
                    cancel,
                    timer.stop_token(),
                    attachment,
                    poll_interval,
                ))
                .catch_unwind()
                .await;

                if let Err(panic) = driven {
                    error!(reason = panic_message(panic.as_ref()), "executor task panicked");
                    if let Err(err) = channel.close() {
                        warn!(%err, "failed to close channel after panic");
                    }
                }

                timer.release();
                store.save(&state);
                drop(results_tx);
                info!("executor closed");
            }
            .instrument(span),
        );

        results_rx
    }
}

/// Hand the document to the backend and pump the channel until the run ends.
async fn drive(
    state: &mut DocumentState,
    channel: &mut dyn Channel,
    results: &mpsc::Sender<DocumentResult>,
    cancel: CancelFlag,
    stop: &CancellationToken,
    attachment: Attachment,
    poll_interval: Duration,
) {
    info!(?attachment, "launching messaging worker");
    let mut backend = ExecutorBackend::new(results, state, cancel);

    match messaging::run(channel, &mut backend, stop, poll_interval).await {
        Ok(outcome) => debug!(?outcome, "messaging ended"),
        Err(err) => {
            error!(%err, "messaging worker encountered error");
            backend.fail_if_in_progress();
            if let Err(close_err) = channel.close() {
                warn!(%close_err, "failed to close channel");
            }
        }
    }

    backend.finish();
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
