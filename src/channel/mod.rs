//! Durable, document-addressed message channel.
//!
//! The supervisor and its worker open the same channel independently. The
//! document ID is the only rendezvous key: both sides derive the transport
//! location from it with the same function and never negotiate further.
//! A channel outlives either process, which is what lets a restarted
//! supervisor find and reattach to a worker it spawned earlier.

pub mod file;
pub mod message;

use std::fmt::{Display, Formatter};

use crate::{BoxFuture, Result};

pub use file::{channel_dir, FileChannel, FileChannelFactory};
pub use message::{Envelope, Message, SCHEMA_VERSION};

/// Which end of the channel a process holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The supervisor side.
    Master,
    /// The worker side.
    Worker,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// One end of an open channel.
pub trait Channel: Send {
    /// Deliver a message to the peer.
    ///
    /// Never suspends. Once it returns `Ok` the message outlives both
    /// processes, so it may be posted before the peer is even started.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the channel is closed or the write fails.
    fn send(&mut self, message: &Message) -> Result<()>;

    /// Wait for the next message from the peer.
    ///
    /// Cancel safe: dropping the returned future never loses a message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` once the channel or its peer is closed, and
    /// `AppError::Codec` for an undecodable message.
    fn receive(&mut self) -> BoxFuture<'_, Result<Message>>;

    /// Close this end. Idempotent, and safe to race with the peer's close.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the transport cannot be torn down.
    fn close(&mut self) -> Result<()>;
}

/// A freshly opened channel.
pub struct Opened {
    /// The open channel.
    pub channel: Box<dyn Channel>,
    /// Whether the channel already existed before this open.
    pub existed: bool,
}

impl std::fmt::Debug for Opened {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Opened")
            .field("existed", &self.existed)
            .finish_non_exhaustive()
    }
}

/// Opens channels by document ID.
pub trait ChannelFactory: Send + Sync {
    /// Open the channel for `document_id` in `role`.
    ///
    /// Only the master creates a missing channel; a worker open never
    /// leaves anything behind.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the channel cannot be created, or if a
    /// worker opens a channel no master prepared.
    fn open(&self, role: Role, document_id: &str) -> Result<Opened>;
}
