//! JSON file document store.
//!
//! Keeps the document state in memory after the initial read and writes it
//! back atomically via `tempfile::NamedTempFile::persist()`, so a crash
//! mid-write never leaves a truncated state file behind.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

use crate::models::DocumentState;
use crate::orchestrator::DocumentStore;
use crate::{AppError, Result};

/// Document store backed by a single JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<DocumentState>,
}

impl JsonFileStore {
    /// Read the document state stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path).map_err(|err| {
            AppError::Store(format!("failed to read {}: {err}", path.display()))
        })?;
        let state: DocumentState = serde_json::from_str(&raw).map_err(|err| {
            AppError::Store(format!("failed to parse {}: {err}", path.display()))
        })?;
        if state.document_id.trim().is_empty() {
            return Err(AppError::Store(format!(
                "{} has an empty document_id",
                path.display()
            )));
        }
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Create a store at `path` holding `state`, writing it immediately.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the file cannot be written.
    pub fn create(path: impl Into<PathBuf>, state: DocumentState) -> Result<Self> {
        let path = path.into();
        write_atomically(&path, &state)?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last state handed to `save` or `checkpoint`.
    #[must_use]
    pub fn current(&self) -> DocumentState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, state: &DocumentState) -> Result<()> {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        write_atomically(&self.path, state)?;
        state.clone_into(&mut current);
        Ok(())
    }
}

impl DocumentStore for JsonFileStore {
    fn load(&self) -> DocumentState {
        self.current()
    }

    fn save(&self, state: &DocumentState) {
        match self.store(state) {
            Ok(()) => debug!(
                document_id = %state.document_id,
                status = ?state.status,
                "document state saved"
            ),
            Err(err) => error!(document_id = %state.document_id, %err, "failed to save document state"),
        }
    }

    fn checkpoint(&self, state: &DocumentState) {
        if let Err(err) = self.store(state) {
            warn!(document_id = %state.document_id, %err, "failed to checkpoint document state");
        }
    }
}

fn write_atomically(path: &Path, state: &DocumentState) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Store(format!("failed to create {}: {err}", parent.display()))
    })?;

    let bytes = serde_json::to_vec_pretty(state)
        .map_err(|err| AppError::Store(format!("failed to serialize document state: {err}")))?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Store(format!("failed to create temporary file: {err}")))?;
    tmp.write_all(&bytes)
        .map_err(|err| AppError::Store(format!("failed to write temporary file: {err}")))?;
    tmp.as_file()
        .sync_all()
        .map_err(|err| AppError::Store(format!("failed to sync temporary file: {err}")))?;
    tmp.persist(path).map_err(|err| {
        AppError::Store(format!("failed to persist {}: {err}", path.display()))
    })?;
    Ok(())
}
