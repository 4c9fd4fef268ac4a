//! Versioned wire format for channel messages.
//!
//! Every message is a JSON envelope:
//!
//! ```json
//! {"version": 1, "id": "<uuid>", "payload": {"type": "plugin_result", "result": { ... }}}
//! ```
//!
//! | `type`          | Direction       | Meaning                                 |
//! |-----------------|-----------------|-----------------------------------------|
//! | `start`         | master → worker | document to execute                     |
//! | `plugin_result` | worker → master | one plugin finished                     |
//! | `cancel`        | master → worker | stop the document                       |
//! | `complete`      | worker → master | document finished with `status`         |
//!
//! Decoding is strict: a different `version`, an unknown `type`, or an
//! unknown field is rejected rather than ignored.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::Role;
use crate::models::{DocumentState, PluginResult, ResultStatus};
use crate::{AppError, Result};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Message kinds exchanged between supervisor and worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Message {
    /// Document handed to a freshly spawned worker.
    Start {
        /// Full document state, including plugins already completed.
        document: DocumentState,
    },
    /// A plugin finished.
    PluginResult {
        /// The plugin's outcome.
        result: PluginResult,
    },
    /// The supervisor asks the worker to stop.
    Cancel,
    /// The worker finished the document.
    Complete {
        /// Final document status.
        status: ResultStatus,
    },
}

impl Message {
    /// Short kind label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::PluginResult { .. } => "plugin_result",
            Self::Cancel => "cancel",
            Self::Complete { .. } => "complete",
        }
    }

    /// The role allowed to send this message.
    #[must_use]
    pub fn sender(&self) -> Role {
        match self {
            Self::Start { .. } | Self::Cancel => Role::Master,
            Self::PluginResult { .. } | Self::Complete { .. } => Role::Worker,
        }
    }
}

/// On-the-wire envelope around a [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct Envelope {
    /// Schema version; must equal [`SCHEMA_VERSION`].
    pub version: u32,
    /// Unique message id, for tracing duplicates across restarts.
    pub id: Uuid,
    /// The message itself.
    pub payload: Message,
}

impl Envelope {
    /// Wrap a message in a current-version envelope.
    #[must_use]
    pub fn new(payload: Message) -> Self {
        Self {
            version: SCHEMA_VERSION,
            id: Uuid::new_v4(),
            payload,
        }
    }
}

/// Borrowed form of [`Envelope`] so encoding never clones the payload.
#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    id: Uuid,
    payload: &'a Message,
}

/// Serialize a message into its envelope bytes.
///
/// # Errors
///
/// Returns `AppError::Codec` if serialization fails.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let envelope = EnvelopeRef {
        version: SCHEMA_VERSION,
        id: Uuid::new_v4(),
        payload: message,
    };
    serde_json::to_vec(&envelope).map_err(|err| AppError::Codec(format!("encode failed: {err}")))
}

/// Decode envelope bytes, enforcing the schema version.
///
/// The version is checked before the payload so a message from a newer
/// schema is reported as such instead of as an unknown kind.
///
/// # Errors
///
/// Returns `AppError::Codec` for malformed JSON, unknown message kinds or
/// fields, or a version mismatch.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|err| AppError::Codec(format!("malformed message: {err}")))?;

    let version = value
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| AppError::Codec("message has no version".into()))?;
    if version != u64::from(SCHEMA_VERSION) {
        return Err(AppError::Codec(format!(
            "unsupported message version {version} (expected {SCHEMA_VERSION})"
        )));
    }

    serde_json::from_value(value)
        .map_err(|err| AppError::Codec(format!("malformed message: {err}")))
}
