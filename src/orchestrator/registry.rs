//! Guards against two orchestrations of the same document at once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{AppError, Result};

/// Set of document IDs currently being coordinated by this supervisor.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `document_id` for the lifetime of the returned guard.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Busy` if the document is already claimed.
    pub fn claim(&self, document_id: &str) -> Result<RunGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(document_id.to_owned()) {
            return Err(AppError::Busy(format!(
                "document {document_id} is already running"
            )));
        }
        Ok(RunGuard {
            registry: self.clone(),
            document_id: document_id.to_owned(),
        })
    }

    /// Whether `document_id` is currently claimed.
    #[must_use]
    pub fn is_active(&self, document_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(document_id)
    }
}

/// Releases its document ID when dropped.
#[derive(Debug)]
pub struct RunGuard {
    registry: RunRegistry,
    document_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.document_id);
    }
}
