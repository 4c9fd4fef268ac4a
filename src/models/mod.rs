//! Domain model module declarations.

pub mod document;
pub mod result;

pub use document::{DocumentState, PluginState, ProcInfo, ResultStatus};
pub use result::{DocumentResult, PluginResult};
