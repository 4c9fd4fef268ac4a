//! In-process executor.
//!
//! Runs a document's plugins inside the supervisor. Used as the fallback
//! when the out-of-process path cannot prepare a channel or worker, and
//! emits the same stream shape: one incremental result per plugin, then one
//! summary.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::cancel::CancelFlag;
use crate::models::{DocumentResult, DocumentState, ResultStatus};
use crate::orchestrator::{DocumentStore, Executor};
use crate::plugin::PluginRunner;

/// Executor that runs plugins on the supervisor's own runtime.
#[derive(Clone)]
pub struct InProcExecutor {
    runner: Arc<dyn PluginRunner>,
}

impl InProcExecutor {
    /// Executor running plugins through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn PluginRunner>) -> Self {
        Self { runner }
    }
}

impl Executor for InProcExecutor {
    fn run(
        &self,
        cancel: CancelFlag,
        store: Arc<dyn DocumentStore>,
    ) -> mpsc::Receiver<DocumentResult> {
        let mut state = store.load();
        let span = info_span!("inproc", document_id = %state.document_id);
        let (results_tx, results_rx) = mpsc::channel(state.plugins.len() + 1);
        let runner = Arc::clone(&self.runner);

        tokio::spawn(
            async move {
                let executed = AssertUnwindSafe(execute(
                    runner.as_ref(),
                    &mut state,
                    &cancel,
                    &results_tx,
                ))
                .catch_unwind()
                .await;

                if executed.is_err() {
                    error!("in-process execution panicked");
                    if state.fail_if_in_progress() {
                        push(&results_tx, DocumentResult::summary(&state));
                    }
                }

                store.save(&state);
                drop(results_tx);
                info!("executor closed");
            }
            .instrument(span),
        );

        results_rx
    }
}

async fn execute(
    runner: &dyn PluginRunner,
    state: &mut DocumentState,
    cancel: &CancelFlag,
    results: &mpsc::Sender<DocumentResult>,
) {
    if state.status.is_terminal() {
        debug!(status = ?state.status, "document already finished");
        push(results, DocumentResult::summary(state));
        return;
    }

    state.status = ResultStatus::InProgress;
    let pending: Vec<_> = state.pending_plugins().cloned().collect();

    for plugin in pending {
        if cancel.is_shutdown_requested() {
            info!("shutdown requested, leaving remaining plugins for the next run");
            return;
        }
        if cancel.is_cancel_requested() {
            info!("cancel requested, skipping remaining plugins");
            state.status = ResultStatus::Cancelled;
            push(results, DocumentResult::summary(state));
            return;
        }

        debug!(plugin_id = %plugin.id, "running plugin");
        let result = runner.run(&plugin).await;
        if let Some(slot) = state.plugin_mut(&plugin.id) {
            slot.result = Some(result);
        }
        push(results, DocumentResult::incremental(state, &plugin.id));
    }

    state.status = state.aggregate_status();
    info!(status = ?state.status, "document finished");
    push(results, DocumentResult::summary(state));
}

fn push(results: &mpsc::Sender<DocumentResult>, result: DocumentResult) {
    if let Err(err) = results.try_send(result) {
        warn!(%err, "result stream rejected update");
    }
}
