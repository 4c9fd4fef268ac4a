#![forbid(unsafe_code)]

//! Out-of-process document execution.
//!
//! A long-running supervisor hands each document to a detached worker
//! process and coordinates with it over a durable, document-addressed
//! channel. If the supervisor restarts mid-run it reattaches to the
//! channel; if no channel can be prepared it runs the document in-process.

pub mod cancel;
pub mod channel;
pub mod config;
pub mod errors;
pub mod inproc;
pub mod messaging;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod plugin;
pub mod proc;
pub mod worker;

pub use cancel::CancelFlag;
pub use config::GlobalConfig;
pub use errors::{AppError, Result};

use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future used at the trait seams that must stay object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
