//! Messaging loop between the supervisor and a worker.
//!
//! [`run`] pumps a single channel: it flushes whatever the [`Backend`] wants
//! to send, then waits for the first of
//!
//! 1. the liveness `stop` token firing,
//! 2. the next inbound message,
//! 3. the cancel-poll tick (so the backend can notice a cancel request
//!    while the worker is silent).
//!
//! `stop` is polled first, so nothing is processed once it has fired. The
//! loop is the only consumer of `stop`.

pub mod backend;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::{Channel, Message};
use crate::{AppError, Result};

pub use backend::ExecutorBackend;

/// How a messaging run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The worker reported the document complete.
    Completed,
    /// The supervisor is shutting down; the worker keeps running.
    Detached,
}

/// Protocol semantics plugged into the messaging loop.
pub trait Backend {
    /// Interpret one inbound message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the message is not acceptable.
    fn accept(&mut self, message: Message) -> Result<()>;

    /// Next outbound control message, if any. Called once per cycle; this is
    /// where the backend polls its cancel flag.
    fn poll_outbound(&mut self) -> Option<Message>;

    /// Set once the run should end.
    fn outcome(&self) -> Option<Outcome>;
}

/// Pump `channel` until the backend finishes, the channel fails, or `stop` fires.
///
/// The channel is closed on every exit path except [`Outcome::Detached`],
/// which must leave it intact for a later reattach.
///
/// # Errors
///
/// Returns `AppError::Timeout` when `stop` fires, and any transport or
/// backend error unchanged.
pub async fn run<B>(
    channel: &mut dyn Channel,
    backend: &mut B,
    stop: &CancellationToken,
    poll_interval: Duration,
) -> Result<Outcome>
where
    B: Backend + ?Sized,
{
    let result = pump(channel, backend, stop, poll_interval).await;

    if !matches!(result, Ok(Outcome::Detached)) {
        if let Err(err) = channel.close() {
            warn!(%err, "failed to close channel");
        }
    }
    result
}

async fn pump<B>(
    channel: &mut dyn Channel,
    backend: &mut B,
    stop: &CancellationToken,
    poll_interval: Duration,
) -> Result<Outcome>
where
    B: Backend + ?Sized,
{
    loop {
        while let Some(outbound) = backend.poll_outbound() {
            debug!(kind = outbound.kind(), "sending control message");
            channel.send(&outbound)?;
        }

        if let Some(outcome) = backend.outcome() {
            debug!(?outcome, "messaging finished");
            return Ok(outcome);
        }

        let inbound = tokio::select! {
            biased;

            () = stop.cancelled() => {
                return Err(AppError::Timeout("liveness timer fired".into()));
            }
            received = channel.receive() => received?,
            () = tokio::time::sleep(poll_interval) => continue,
        };

        backend.accept(inbound)?;
    }
}
