//! Plugin execution.
//!
//! A [`PluginRunner`] turns one [`PluginState`] into a [`PluginResult`]. The
//! worker process and the in-process fallback share the same runner, so a
//! document produces the same results whichever path executes it.
//!
//! [`ShellRunner`] understands these parameters:
//!
//! ```json
//! { "commands": ["echo hello", "uname -a"], "timeout_seconds": 60 }
//! ```
//!
//! The commands run as one `sh -c` script. Exit code 0 maps to `Success`,
//! anything else to `Failed`, and exceeding the timeout to `TimedOut`.

use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::models::{PluginResult, PluginState, ResultStatus};
use crate::BoxFuture;

/// Default plugin timeout (one hour).
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 3600;

/// Captured output kept per plugin; the tail is dropped beyond this.
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Exit code reported when the process produced none.
const NO_EXIT_CODE: i32 = -1;

/// Executes a single plugin.
///
/// Dropping the returned future must abandon the plugin; callers rely on this
/// to honour cancellation.
pub trait PluginRunner: Send + Sync {
    /// Run `plugin` to completion.
    fn run<'a>(&'a self, plugin: &'a PluginState) -> BoxFuture<'a, PluginResult>;
}

/// Build a finished result for `plugin`.
#[must_use]
pub fn finished(
    plugin: &PluginState,
    status: ResultStatus,
    code: i32,
    output: impl Into<String>,
    started_at: DateTime<Utc>,
) -> PluginResult {
    PluginResult {
        plugin_id: plugin.id.clone(),
        plugin_name: plugin.name.clone(),
        status,
        code,
        output: output.into(),
        started_at,
        ended_at: Utc::now(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ShellParameters {
    commands: Commands,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Commands {
    One(String),
    Many(Vec<String>),
}

impl Commands {
    fn script(self) -> String {
        match self {
            Self::One(command) => command,
            Self::Many(commands) => commands.join("\n"),
        }
    }
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

/// Runs shell commands with `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: "sh".to_owned(),
        }
    }
}

impl ShellRunner {
    /// Runner using the system `sh`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner using another POSIX-compatible shell.
    #[must_use]
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    async fn execute(&self, plugin: &PluginState) -> PluginResult {
        let started_at = Utc::now();

        let params = match ShellParameters::deserialize(&plugin.parameters) {
            Ok(params) => params,
            Err(err) => {
                warn!(plugin_id = %plugin.id, %err, "invalid plugin parameters");
                return finished(
                    plugin,
                    ResultStatus::Failed,
                    NO_EXIT_CODE,
                    format!("invalid parameters: {err}"),
                    started_at,
                );
            }
        };

        let timeout = Duration::from_secs(params.timeout_seconds);
        let script = params.commands.script();
        debug!(plugin_id = %plugin.id, timeout_secs = timeout.as_secs(), "running shell plugin");

        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(err) => {
                return finished(
                    plugin,
                    ResultStatus::Failed,
                    NO_EXIT_CODE,
                    format!("failed to start {}: {err}", self.shell),
                    started_at,
                );
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Err(_) => finished(
                plugin,
                ResultStatus::TimedOut,
                NO_EXIT_CODE,
                format!("timed out after {}s", timeout.as_secs()),
                started_at,
            ),
            Ok(Err(err)) => finished(
                plugin,
                ResultStatus::Failed,
                NO_EXIT_CODE,
                format!("failed to collect output: {err}"),
                started_at,
            ),
            Ok(Ok(output)) => {
                let code = output.status.code().unwrap_or(NO_EXIT_CODE);
                let status = if output.status.success() {
                    ResultStatus::Success
                } else {
                    ResultStatus::Failed
                };
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                finished(plugin, status, code, truncate_output(text), started_at)
            }
        }
    }
}

impl PluginRunner for ShellRunner {
    fn run<'a>(&'a self, plugin: &'a PluginState) -> BoxFuture<'a, PluginResult> {
        Box::pin(self.execute(plugin))
    }
}

fn truncate_output(mut text: String) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text;
    }
    let mut cut = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}
