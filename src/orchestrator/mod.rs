//! Document orchestration.
//!
//! Covers the executor seam shared by the out-of-process executor and its
//! in-process fallback, the document store the executors persist through,
//! the liveness timer, and the per-document run registry.

pub mod executor;
pub mod registry;
pub mod timer;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cancel::CancelFlag;
use crate::models::{DocumentResult, DocumentState};

pub use executor::{
    reattach_timeout, Attachment, OutOfProcExecutor, Timeouts, ORPHAN_PROCESS_TIMEOUT,
    ZOMBIE_PROCESS_TIMEOUT,
};
pub use registry::{RunGuard, RunRegistry};
pub use timer::LivenessTimer;

/// Persistence for one document's state.
///
/// Executors read it once when a run starts and write it once when the run
/// ends.
pub trait DocumentStore: Send + Sync {
    /// Current document state.
    fn load(&self) -> DocumentState;

    /// Publish the final state of a run.
    fn save(&self, state: &DocumentState);

    /// Record intermediate state that must survive a supervisor crash, such
    /// as the identity of a freshly spawned worker. Not a final save.
    fn checkpoint(&self, _state: &DocumentState) {}
}

/// Runs a document and streams its results.
pub trait Executor: Send + Sync {
    /// Start running the document held by `store`.
    ///
    /// Returns immediately; the stream closes once the run has ended and its
    /// state has been saved. Must be called from within a Tokio runtime.
    fn run(&self, cancel: CancelFlag, store: Arc<dyn DocumentStore>)
        -> mpsc::Receiver<DocumentResult>;
}
