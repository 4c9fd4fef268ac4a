//! Worker-side protocol endpoint.
//!
//! The supervisor launches the worker with [`form_argv`]; the document ID in
//! that vector is the only rendezvous key, so the worker opens the same
//! channel without further negotiation. The session then:
//!
//! 1. waits for `start` carrying the document,
//! 2. runs every plugin that has no result yet, reporting each as a
//!    `plugin_result`,
//! 3. stops early on `cancel`, abandoning the running plugin,
//! 4. reports `complete` with the final status and closes its side.

use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelFactory, Message, Role};
use crate::models::{DocumentState, ResultStatus};
use crate::plugin::PluginRunner;
use crate::{AppError, Result};

/// Subcommand that selects the worker entry point.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Flag carrying the document ID.
pub const DOCUMENT_ID_FLAG: &str = "--document-id";

/// Argument vector for a worker serving `document_id`.
#[must_use]
pub fn form_argv(document_id: &str) -> Vec<String> {
    vec![
        WORKER_SUBCOMMAND.to_owned(),
        DOCUMENT_ID_FLAG.to_owned(),
        document_id.to_owned(),
    ]
}

/// Worker end of one document's channel.
pub struct WorkerSession {
    document_id: String,
    channel: Box<dyn Channel>,
}

impl WorkerSession {
    /// Open the worker side of the channel for `document_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the supervisor has not prepared the
    /// channel, or any error from the factory.
    pub fn open(channels: &dyn ChannelFactory, document_id: &str) -> Result<Self> {
        let opened = channels.open(Role::Worker, document_id)?;
        let mut channel = opened.channel;
        if !opened.existed {
            if let Err(err) = channel.close() {
                warn!(document_id, %err, "failed to close unexpected channel");
            }
            return Err(AppError::Ipc(format!(
                "no channel prepared for document {document_id}"
            )));
        }
        Ok(Self {
            document_id: document_id.to_owned(),
            channel,
        })
    }

    /// Serve the document to completion and close the worker side.
    ///
    /// Returns the status reported to the supervisor.
    ///
    /// # Errors
    ///
    /// Returns transport errors, or `AppError::Protocol` if the supervisor
    /// sends something other than `start` first.
    pub async fn serve(mut self, runner: &dyn PluginRunner) -> Result<ResultStatus> {
        let served = self.drive(runner).await;
        if let Err(err) = self.channel.close() {
            warn!(document_id = %self.document_id, %err, "failed to close channel");
        }
        served
    }

    async fn drive(&mut self, runner: &dyn PluginRunner) -> Result<ResultStatus> {
        let mut state = self.await_start().await?;
        state.status = ResultStatus::InProgress;
        info!(
            document_id = %self.document_id,
            plugins = state.plugins.len(),
            "worker started document"
        );

        let pending: Vec<_> = state.pending_plugins().cloned().collect();
        let mut cancelled = false;

        for plugin in pending {
            debug!(plugin_id = %plugin.id, "running plugin");
            let mut running = runner.run(&plugin);

            let result = loop {
                tokio::select! {
                    result = &mut running => break Some(result),
                    received = self.channel.receive() => match received? {
                        Message::Cancel => break None,
                        other => warn!(kind = other.kind(), "ignoring unexpected message"),
                    },
                }
            };

            let Some(result) = result else {
                info!(plugin_id = %plugin.id, "cancel received, abandoning plugin");
                cancelled = true;
                break;
            };

            self.channel
                .send(&Message::PluginResult {
                    result: result.clone(),
                })?;
            if let Some(slot) = state.plugin_mut(&plugin.id) {
                slot.result = Some(result);
            }
        }

        let status = if cancelled {
            ResultStatus::Cancelled
        } else {
            state.aggregate_status()
        };
        self.channel.send(&Message::Complete { status })?;
        info!(document_id = %self.document_id, ?status, "worker completed document");
        Ok(status)
    }

    async fn await_start(&mut self) -> Result<DocumentState> {
        match self.channel.receive().await? {
            Message::Start { document } if document.document_id == self.document_id => {
                Ok(document)
            }
            Message::Start { document } => Err(AppError::Protocol(format!(
                "start for document {} on channel of {}",
                document.document_id, self.document_id
            ))),
            other => Err(AppError::Protocol(format!(
                "expected start, received {}",
                other.kind()
            ))),
        }
    }
}
