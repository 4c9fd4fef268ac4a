//! Global configuration parsing and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Environment variable through which the supervisor hands its channel root
/// to the worker process.
pub const CHANNEL_ROOT_ENV: &str = "DOC_SUPERVISOR_CHANNEL_ROOT";

fn default_cancel_poll_millis() -> u64 {
    200
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct GlobalConfig {
    /// Directory under which per-document channels are created.
    pub channel_root: PathBuf,
    /// Worker executable; defaults to the running binary.
    #[serde(default)]
    pub worker_program: Option<PathBuf>,
    /// How often the messaging loop re-checks the cancel flag while idle.
    #[serde(default = "default_cancel_poll_millis")]
    pub cancel_poll_millis: u64,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Cancel-flag polling interval as a [`Duration`].
    #[must_use]
    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_millis)
    }

    /// Resolve the worker executable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no program is configured and the
    /// current executable cannot be determined.
    pub fn worker_program(&self) -> Result<PathBuf> {
        match &self.worker_program {
            Some(program) => Ok(program.clone()),
            None => env::current_exe()
                .map_err(|err| AppError::Config(format!("cannot resolve current exe: {err}"))),
        }
    }

    /// Channel root as seen by a worker process, read from [`CHANNEL_ROOT_ENV`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the variable is missing or empty.
    pub fn channel_root_from_env() -> Result<PathBuf> {
        match env::var(CHANNEL_ROOT_ENV) {
            Ok(value) if !value.trim().is_empty() => Ok(PathBuf::from(value)),
            Ok(_) => Err(AppError::Config(format!("{CHANNEL_ROOT_ENV} is empty"))),
            Err(_) => Err(AppError::Config(format!("{CHANNEL_ROOT_ENV} is not set"))),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.channel_root.as_os_str().is_empty() {
            return Err(AppError::Config("channel_root must not be empty".into()));
        }

        if self.cancel_poll_millis == 0 {
            return Err(AppError::Config(
                "cancel_poll_millis must be greater than zero".into(),
            ));
        }

        if self.channel_root.is_relative() {
            warn!(
                channel_root = %self.channel_root.display(),
                "channel_root is relative; worker processes must share the working directory"
            );
        }

        Ok(())
    }
}
