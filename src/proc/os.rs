//! OS-backed process launcher and liveness checker.
//!
//! Workers are spawned in their own process group and are never killed on
//! drop: a worker must outlive a crashing supervisor so a later run can
//! reattach to it.
//!
//! Start times come from `/proc/<pid>/stat` (field 22, clock ticks since
//! boot). Platforms without procfs cannot pin a worker identity, so
//! launching fails there and the caller falls back to in-process execution.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::proc::{ExitState, LaunchFailure, LivenessChecker, ProcessLauncher, WorkerProcess};
use crate::{AppError, BoxFuture, Result};

/// Spawned worker process.
#[derive(Debug)]
pub struct OsProcess {
    child: Child,
    pid: u32,
    start_time: u64,
}

impl WorkerProcess for OsProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn start_time(&self) -> u64 {
        self.start_time
    }

    fn kill(&mut self) -> Result<()> {
        self.child
            .start_kill()
            .map_err(|err| AppError::Process(format!("failed to kill pid {}: {err}", self.pid)))
    }

    fn wait(&mut self) -> BoxFuture<'_, Result<ExitState>> {
        Box::pin(async move {
            let status = self
                .child
                .wait()
                .await
                .map_err(|err| AppError::Process(format!("wait failed: {err}")))?;
            Ok(ExitState::from(status))
        })
    }
}

/// Launches detached worker processes.
#[derive(Debug, Clone, Default)]
pub struct OsProcessLauncher {
    envs: Vec<(String, String)>,
}

impl OsProcessLauncher {
    /// Launcher that passes the supervisor's environment through unchanged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment variable to every launched worker.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl ProcessLauncher for OsProcessLauncher {
    fn start(
        &self,
        program: &Path,
        argv: &[String],
    ) -> std::result::Result<Box<dyn WorkerProcess>, LaunchFailure> {
        let mut cmd = Command::new(program);
        cmd.args(argv)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|err| {
            LaunchFailure::new(AppError::Process(format!(
                "failed to spawn {}: {err}",
                program.display()
            )))
        })?;

        let Some(pid) = child.id() else {
            return Err(LaunchFailure::with_partial(
                AppError::Process("worker exited before its pid was read".into()),
                Box::new(OsProcess {
                    child,
                    pid: 0,
                    start_time: 0,
                }),
            ));
        };

        match process_start_time(pid) {
            Ok(start_time) => Ok(Box::new(OsProcess {
                child,
                pid,
                start_time,
            })),
            Err(err) => Err(LaunchFailure::with_partial(
                err,
                Box::new(OsProcess {
                    child,
                    pid,
                    start_time: 0,
                }),
            )),
        }
    }
}

/// Liveness checker backed by signals and procfs.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsLivenessChecker;

impl LivenessChecker for OsLivenessChecker {
    fn exists(&self, pid: u32, start_time: u64) -> bool {
        if pid == 0 || !accepts_signals(pid) {
            return false;
        }

        match read_stat(pid) {
            Ok(stat) if stat.is_dead() => {
                debug!(pid, state = %stat.state, "process is a zombie");
                false
            }
            Ok(stat) => stat.start_time == start_time,
            Err(err) => {
                debug!(pid, %err, "cannot read process start time");
                false
            }
        }
    }
}

/// Start time of `pid` in clock ticks since boot.
///
/// # Errors
///
/// Returns `AppError::Process` if the process does not exist or the
/// platform does not expose start times.
pub fn process_start_time(pid: u32) -> Result<u64> {
    read_stat(pid).map(|stat| stat.start_time)
}

struct Stat {
    state: char,
    start_time: u64,
}

impl Stat {
    fn is_dead(&self) -> bool {
        matches!(self.state, 'Z' | 'X' | 'x')
    }
}

#[cfg(target_os = "linux")]
fn read_stat(pid: u32) -> Result<Stat> {
    let raw = std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .map_err(|err| AppError::Process(format!("cannot read stat for pid {pid}: {err}")))?;
    parse_stat(&raw)
        .ok_or_else(|| AppError::Process(format!("malformed stat for pid {pid}")))
}

#[cfg(not(target_os = "linux"))]
fn read_stat(pid: u32) -> Result<Stat> {
    Err(AppError::Process(format!(
        "process start time unavailable on this platform (pid {pid})"
    )))
}

/// Parse state and start time from a `/proc/<pid>/stat` line.
///
/// The command name (field 2) is parenthesised and may itself contain
/// spaces or parentheses, so fields are counted from the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat(raw: &str) -> Option<Stat> {
    let rest = &raw[raw.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    // Field 3 was consumed above; field 22 is 19 further on.
    let start_time = fields.nth(18)?.parse().ok()?;
    Some(Stat { state, start_time })
}

#[cfg(unix)]
fn accepts_signals(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn accepts_signals(_pid: u32) -> bool {
    true
}
