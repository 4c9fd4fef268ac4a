//! Supervisor-side protocol backend.
//!
//! Turns worker messages into [`DocumentResult`]s on the caller's result
//! stream and turns the cancel flag into a `cancel` message for the worker.
//!
//! The result stream has room for one update per plugin plus the summary.
//! Each plugin is therefore reported at most once (a reattached worker may
//! resend results), and the summary at most once per run.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::CancelFlag;
use crate::channel::Message;
use crate::messaging::{Backend, Outcome};
use crate::models::{DocumentResult, DocumentState, PluginResult, ResultStatus};
use crate::{AppError, Result};

/// Backend that owns the document state for the duration of one run.
#[derive(Debug)]
pub struct ExecutorBackend<'a> {
    results: &'a mpsc::Sender<DocumentResult>,
    document: &'a mut DocumentState,
    cancel: CancelFlag,
    outbound: VecDeque<Message>,
    cancel_sent: bool,
    summary_sent: bool,
    outcome: Option<Outcome>,
}

impl<'a> ExecutorBackend<'a> {
    /// Build a backend. The worker already has its `start`; it is posted
    /// before the worker is launched.
    pub fn new(
        results: &'a mpsc::Sender<DocumentResult>,
        document: &'a mut DocumentState,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            results,
            document,
            cancel,
            outbound: VecDeque::new(),
            cancel_sent: false,
            summary_sent: false,
            outcome: None,
        }
    }

    /// Document state as the backend currently sees it.
    #[must_use]
    pub fn document(&self) -> &DocumentState {
        self.document
    }

    /// Resolve an abnormal end: a run that never reached a terminal status
    /// becomes `Failed`.
    pub fn fail_if_in_progress(&mut self) {
        if self.document.fail_if_in_progress() {
            info!(
                document_id = %self.document.document_id,
                "document marked failed"
            );
        }
    }

    /// Emit the terminal summary unless it was already sent or the run
    /// detached.
    pub fn finish(&mut self) {
        if self.outcome == Some(Outcome::Detached) {
            return;
        }
        self.emit_summary();
    }

    fn emit_summary(&mut self) {
        if self.summary_sent {
            return;
        }
        self.summary_sent = true;
        self.push(DocumentResult::summary(self.document));
    }

    fn push(&self, result: DocumentResult) {
        if let Err(err) = self.results.try_send(result) {
            warn!(
                document_id = %self.document.document_id,
                %err,
                "result stream rejected update"
            );
        }
    }

    fn record_plugin(&mut self, result: PluginResult) {
        let document_id = self.document.document_id.clone();
        let plugin_id = result.plugin_id.clone();

        let Some(plugin) = self.document.plugin_mut(&plugin_id) else {
            warn!(%document_id, %plugin_id, "result for unknown plugin ignored");
            return;
        };
        if plugin.result.is_some() {
            debug!(%document_id, %plugin_id, "duplicate plugin result ignored");
            return;
        }

        debug!(%document_id, %plugin_id, status = ?result.status, "plugin finished");
        plugin.result = Some(result);
        if !self.document.status.is_terminal() {
            self.document.status = ResultStatus::InProgress;
        }
        self.push(DocumentResult::incremental(self.document, &plugin_id));
    }

    fn complete(&mut self, status: ResultStatus) {
        info!(
            document_id = %self.document.document_id,
            ?status,
            "worker completed document"
        );
        self.document.status = status;
        self.emit_summary();
        self.outcome = Some(Outcome::Completed);
    }
}

impl Backend for ExecutorBackend<'_> {
    fn accept(&mut self, message: Message) -> Result<()> {
        match message {
            Message::PluginResult { result } => {
                self.record_plugin(result);
                Ok(())
            }
            Message::Complete { status } => {
                if !status.is_terminal() {
                    return Err(AppError::Protocol(format!(
                        "complete with non-terminal status {status:?}"
                    )));
                }
                self.complete(status);
                Ok(())
            }
            other @ (Message::Start { .. } | Message::Cancel) => Err(AppError::Protocol(format!(
                "unexpected {} message from worker",
                other.kind()
            ))),
        }
    }

    fn poll_outbound(&mut self) -> Option<Message> {
        if self.outcome.is_none() {
            if self.cancel.is_shutdown_requested() {
                info!(
                    document_id = %self.document.document_id,
                    "shutdown requested, detaching from worker"
                );
                self.outcome = Some(Outcome::Detached);
            } else if self.cancel.is_cancel_requested() && !self.cancel_sent {
                info!(
                    document_id = %self.document.document_id,
                    "cancel requested, notifying worker"
                );
                self.cancel_sent = true;
                self.outbound.push_back(Message::Cancel);
            }
        }
        self.outbound.pop_front()
    }

    fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }
}
