//! Results pushed to callers while a document runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::document::{DocumentState, ResultStatus};

/// Outcome of a single plugin invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct PluginResult {
    /// Plugin identifier within the document.
    pub plugin_id: String,
    /// Plugin kind.
    pub plugin_name: String,
    /// Final plugin status.
    pub status: ResultStatus,
    /// Exit or result code reported by the plugin.
    pub code: i32,
    /// Combined output, possibly truncated by the plugin.
    #[serde(default)]
    pub output: String,
    /// When the plugin started.
    pub started_at: DateTime<Utc>,
    /// When the plugin finished.
    pub ended_at: DateTime<Utc>,
}

/// Incremental or terminal snapshot of a document run.
///
/// `last_plugin` names the plugin that produced an incremental update; it is
/// `None` on the single terminal summary of the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DocumentResult {
    /// Document the result belongs to.
    pub document_id: String,
    /// Document status at the time of the snapshot.
    pub status: ResultStatus,
    /// Plugin results recorded so far.
    pub plugin_results: Vec<PluginResult>,
    /// Plugin that triggered this update, or `None` for the summary.
    pub last_plugin: Option<String>,
    /// Number of plugins in the document.
    pub plugin_count: usize,
}

impl DocumentResult {
    /// Incremental update emitted after `plugin_id` reported.
    #[must_use]
    pub fn incremental(state: &DocumentState, plugin_id: &str) -> Self {
        Self {
            document_id: state.document_id.clone(),
            status: state.status,
            plugin_results: state.plugin_results(),
            last_plugin: Some(plugin_id.to_owned()),
            plugin_count: state.plugins.len(),
        }
    }

    /// Terminal summary for the whole document.
    #[must_use]
    pub fn summary(state: &DocumentState) -> Self {
        Self {
            document_id: state.document_id.clone(),
            status: state.status,
            plugin_results: state.plugin_results(),
            last_plugin: None,
            plugin_count: state.plugins.len(),
        }
    }

    /// Whether this is the terminal summary.
    #[must_use]
    pub fn is_summary(&self) -> bool {
        self.last_plugin.is_none()
    }
}
