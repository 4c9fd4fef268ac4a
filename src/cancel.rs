//! Cooperative cancellation signal for a document run.
//!
//! The flag is owned by whoever dispatched the document; executors only
//! poll it. Two requests are distinguished: *cancel* asks the worker to
//! stop the document, *shutdown* means the supervisor itself is going
//! away and should detach from the worker without stopping it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const STATE_NONE: u8 = 0;
const STATE_CANCELED: u8 = 1;
const STATE_SHUTDOWN: u8 = 2;

/// Shared, cloneable cancel/shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    state: Arc<AtomicU8>,
}

impl CancelFlag {
    /// Create a flag with no request set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running document to stop.
    ///
    /// Ignored once a shutdown was requested.
    pub fn request_cancel(&self) {
        let _ = self.state.compare_exchange(
            STATE_NONE,
            STATE_CANCELED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Signal that the supervisor is shutting down. Takes precedence over cancel.
    pub fn request_shutdown(&self) {
        self.state.store(STATE_SHUTDOWN, Ordering::Release);
    }

    /// Whether cancellation of the document was requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CANCELED
    }

    /// Whether supervisor shutdown was requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_SHUTDOWN
    }
}
