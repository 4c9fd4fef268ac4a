//! Error types shared across the supervisor and worker.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Channel transport failure (open, send, receive, peer closed).
    Ipc(String),
    /// Message could not be encoded or decoded.
    Codec(String),
    /// Message was well formed but not valid in the current direction or state.
    Protocol(String),
    /// Worker process could not be started, awaited, or killed.
    Process(String),
    /// The liveness timer fired before the run completed.
    Timeout(String),
    /// Document state could not be read or written.
    Store(String),
    /// Another run already owns the document.
    Busy(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Store(msg) => write!(f, "store: {msg}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
