//! Document state and worker process identity.

use serde::{Deserialize, Serialize};

use crate::models::result::PluginResult;

/// Lifecycle status shared by documents and individual plugin results.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// Accepted but not yet started.
    #[default]
    Pending,
    /// Currently executing.
    InProgress,
    /// Finished successfully.
    Success,
    /// Finished with an error, or abandoned.
    Failed,
    /// Stopped on operator request.
    Cancelled,
    /// Exceeded its own execution timeout.
    TimedOut,
}

impl ResultStatus {
    /// Whether no further transitions are expected.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }
}

/// Identity of the worker process associated with a document.
///
/// Liveness is always judged on the pair; a bare pid can be reused by an
/// unrelated process after the worker exits.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcInfo {
    /// OS process id; `0` means no worker was ever started.
    pub pid: u32,
    /// Process start time in clock ticks since boot, as reported by the OS.
    pub start_time: u64,
}

impl ProcInfo {
    /// Whether a worker has ever been recorded for the document.
    #[must_use]
    pub fn is_recorded(&self) -> bool {
        self.pid != 0
    }
}

/// One plugin invocation within a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct PluginState {
    /// Identifier unique within the document.
    pub id: String,
    /// Plugin kind, e.g. `shell`.
    pub name: String,
    /// Plugin-specific input, opaque to the supervisor.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Outcome once the plugin has run.
    #[serde(default)]
    pub result: Option<PluginResult>,
}

/// A unit of work and everything the supervisor knows about its execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct DocumentState {
    /// Document identifier; also the channel rendezvous key.
    pub document_id: String,
    /// Overall document status.
    #[serde(default)]
    pub status: ResultStatus,
    /// Worker process recorded for this document.
    #[serde(default)]
    pub proc_info: ProcInfo,
    /// Ordered plugin invocations.
    #[serde(default)]
    pub plugins: Vec<PluginState>,
}

impl DocumentState {
    /// Construct a pending document with no recorded worker.
    #[must_use]
    pub fn new(document_id: impl Into<String>, plugins: Vec<PluginState>) -> Self {
        Self {
            document_id: document_id.into(),
            status: ResultStatus::Pending,
            proc_info: ProcInfo::default(),
            plugins,
        }
    }

    /// Look up a plugin by id.
    pub fn plugin_mut(&mut self, plugin_id: &str) -> Option<&mut PluginState> {
        self.plugins.iter_mut().find(|plugin| plugin.id == plugin_id)
    }

    /// Results recorded so far, in document order.
    #[must_use]
    pub fn plugin_results(&self) -> Vec<PluginResult> {
        self.plugins
            .iter()
            .filter_map(|plugin| plugin.result.clone())
            .collect()
    }

    /// Mark the document failed if it never reached a terminal status.
    ///
    /// Returns `true` when the status changed.
    pub fn fail_if_in_progress(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ResultStatus::Failed;
        true
    }

    /// Plugins that have not produced a result yet, in order.
    pub fn pending_plugins(&self) -> impl Iterator<Item = &PluginState> {
        self.plugins.iter().filter(|plugin| plugin.result.is_none())
    }

    /// Document status implied by the plugin results: `Success` when every
    /// plugin succeeded, otherwise the first non-successful plugin status.
    #[must_use]
    pub fn aggregate_status(&self) -> ResultStatus {
        self.plugins
            .iter()
            .map(|plugin| {
                plugin
                    .result
                    .as_ref()
                    .map(|result| result.status)
                    .filter(|status| status.is_terminal())
                    .unwrap_or(ResultStatus::Failed)
            })
            .find(|status| *status != ResultStatus::Success)
            .unwrap_or(ResultStatus::Success)
    }
}
