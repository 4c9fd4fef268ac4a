//! Worker process abstraction.
//!
//! The orchestrator never touches OS processes directly. It receives a
//! [`ProcessLauncher`] and a [`LivenessChecker`] at construction so both
//! can be substituted in tests.

pub mod os;

use std::path::Path;

use crate::models::ProcInfo;
use crate::{AppError, BoxFuture, Result};

pub use os::{process_start_time, OsLivenessChecker, OsProcess, OsProcessLauncher};

/// Terminal status of a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitState {
    /// Whether the process exited with code 0.
    pub success: bool,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
}

impl ExitState {
    /// Human-readable description for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.success {
            "exited normally (code 0)".to_owned()
        } else {
            self.code.map_or_else(
                || "terminated by signal".to_owned(),
                |c| format!("exited with code {c}"),
            )
        }
    }
}

impl From<std::process::ExitStatus> for ExitState {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            success: status.success(),
            code: status.code(),
        }
    }
}

/// Handle to a started worker process.
pub trait WorkerProcess: Send {
    /// OS process id.
    fn pid(&self) -> u32;

    /// Start time as reported by the OS, used with the pid for liveness.
    fn start_time(&self) -> u64;

    /// Best-effort kill.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the signal could not be delivered.
    fn kill(&mut self) -> Result<()>;

    /// Wait for the process to exit.
    ///
    /// Only ever awaited from a background watcher task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the exit status cannot be collected.
    fn wait(&mut self) -> BoxFuture<'_, Result<ExitState>>;

    /// Identity record persisted in the document state.
    fn proc_info(&self) -> ProcInfo {
        ProcInfo {
            pid: self.pid(),
            start_time: self.start_time(),
        }
    }
}

/// A failed launch, possibly leaving a partially started process behind.
///
/// The caller owns `partial` and must attempt to kill it.
pub struct LaunchFailure {
    /// Why the launch failed.
    pub error: AppError,
    /// Process that was spawned before the failure, if any.
    pub partial: Option<Box<dyn WorkerProcess>>,
}

impl LaunchFailure {
    /// Failure with nothing left running.
    #[must_use]
    pub fn new(error: AppError) -> Self {
        Self {
            error,
            partial: None,
        }
    }

    /// Failure after a process was already spawned.
    #[must_use]
    pub fn with_partial(error: AppError, partial: Box<dyn WorkerProcess>) -> Self {
        Self {
            error,
            partial: Some(partial),
        }
    }
}

impl std::fmt::Debug for LaunchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchFailure")
            .field("error", &self.error)
            .field("partial_pid", &self.partial.as_ref().map(|p| p.pid()))
            .finish()
    }
}

/// Starts worker processes.
pub trait ProcessLauncher: Send + Sync {
    /// Start `program` with `argv` and capture its identity.
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchFailure`]; if a process was already spawned it is
    /// handed back in `partial` for cleanup.
    fn start(
        &self,
        program: &Path,
        argv: &[String],
    ) -> std::result::Result<Box<dyn WorkerProcess>, LaunchFailure>;
}

/// Decides whether a recorded worker is still running.
pub trait LivenessChecker: Send + Sync {
    /// True only if a live process has `pid` and its start time equals `start_time`.
    fn exists(&self, pid: u32, start_time: u64) -> bool;

    /// Liveness of a recorded worker. A never-started worker (`pid == 0`) is
    /// never alive, whatever the checker would say.
    fn is_alive(&self, proc_info: &ProcInfo) -> bool {
        if !proc_info.is_recorded() {
            return false;
        }
        self.exists(proc_info.pid, proc_info.start_time)
    }
}
