//! Directory-backed channel.
//!
//! ## Layout
//!
//! ```text
//! <root>/<hex(sha256(document_id))>/
//!     document_id        plain-text id, for operators
//!     to_worker/         master → worker messages
//!     to_master/         worker → master messages
//!     worker.closed      present once the worker closed its end
//! ```
//!
//! Each message is one file `<seq:020>.msg`, written to a temp file in the
//! same directory and renamed into place so readers never observe partial
//! writes. A sender numbers its messages from
//! `max(highest seq already in its outbox + 1, now in µs since epoch)`, so
//! order is preserved across sender restarts.
//!
//! The receiver takes the lowest-numbered file, reads it and deletes it in
//! one synchronous step. Only the master creates the directory. Closing the
//! master end destroys it; a later open therefore starts a fresh channel.

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::channel::message::{self, Message};
use crate::channel::{Channel, ChannelFactory, Opened, Role};
use crate::{AppError, BoxFuture, Result};

const TO_WORKER: &str = "to_worker";
const TO_MASTER: &str = "to_master";
const WORKER_CLOSED: &str = "worker.closed";
const DOCUMENT_ID_FILE: &str = "document_id";
const MESSAGE_EXT: &str = "msg";

/// Upper bound on how long a receive sleeps between directory scans when
/// no file event arrives.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Destroying the directory can race with the worker writing into it.
const DESTROY_ATTEMPTS: u32 = 3;

/// Channel directory for `document_id` under `root`.
///
/// Both processes must call this with the same root; it is the whole
/// rendezvous contract.
#[must_use]
pub fn channel_dir(root: &Path, document_id: &str) -> PathBuf {
    let name: String = Sha256::digest(document_id.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();
    root.join(name)
}

/// Opens [`FileChannel`]s under a fixed root directory.
#[derive(Debug, Clone)]
pub struct FileChannelFactory {
    root: PathBuf,
}

impl FileChannelFactory {
    /// Factory rooted at `root`; the directory is created on first open.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of all channels.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ChannelFactory for FileChannelFactory {
    fn open(&self, role: Role, document_id: &str) -> Result<Opened> {
        if document_id.trim().is_empty() {
            return Err(AppError::Ipc("document id must not be empty".into()));
        }

        let dir = channel_dir(&self.root, document_id);
        let existed = dir.is_dir();
        if role == Role::Worker && !existed {
            return Err(AppError::Ipc(format!(
                "no channel prepared for document {document_id}"
            )));
        }

        for sub in [TO_WORKER, TO_MASTER] {
            fs::create_dir_all(dir.join(sub)).map_err(|err| {
                AppError::Ipc(format!("cannot create channel {}: {err}", dir.display()))
            })?;
        }
        if !existed {
            fs::write(dir.join(DOCUMENT_ID_FILE), document_id).map_err(|err| {
                AppError::Ipc(format!("cannot label channel {}: {err}", dir.display()))
            })?;
        }

        let channel = FileChannel::new(role, dir)?;
        debug!(document_id, %role, existed, "channel opened");

        Ok(Opened {
            channel: Box::new(channel),
            existed,
        })
    }
}

/// One end of a directory-backed channel.
pub struct FileChannel {
    role: Role,
    dir: PathBuf,
    inbox: PathBuf,
    outbox: PathBuf,
    next_seq: u64,
    closed: bool,
    wake: Arc<Notify>,
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for FileChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChannel")
            .field("role", &self.role)
            .field("dir", &self.dir)
            .field("next_seq", &self.next_seq)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl FileChannel {
    fn new(role: Role, dir: PathBuf) -> Result<Self> {
        let (inbox, outbox) = match role {
            Role::Master => (dir.join(TO_MASTER), dir.join(TO_WORKER)),
            Role::Worker => (dir.join(TO_WORKER), dir.join(TO_MASTER)),
        };

        let highest = list_messages(&outbox)
            .map_err(|err| AppError::Ipc(format!("cannot scan outbox: {err}")))?
            .last()
            .copied();
        let next_seq = highest.map_or_else(now_micros, |seq| seq.saturating_add(1).max(now_micros()));

        let wake = Arc::new(Notify::new());
        let watcher = watch_inbox(&inbox, Arc::clone(&wake));

        Ok(Self {
            role,
            dir,
            inbox,
            outbox,
            next_seq,
            closed: false,
            wake,
            watcher,
        })
    }

    /// Directory backing this channel.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(AppError::Ipc("channel is closed".into()))
        } else {
            Ok(())
        }
    }

    fn peer_closed(&self) -> bool {
        match self.role {
            Role::Master => self.dir.join(WORKER_CLOSED).exists(),
            // The master destroys the directory when it closes.
            Role::Worker => !self.dir.is_dir(),
        }
    }

    fn write_message(&mut self, message: &Message) -> Result<()> {
        self.ensure_open()?;
        if message.sender() != self.role {
            return Err(AppError::Protocol(format!(
                "{} may not send {}",
                self.role,
                message.kind()
            )));
        }

        let bytes = message::encode(message)?;
        let seq = self.next_seq;
        let target = self.outbox.join(message_file_name(seq));

        let mut tmp = NamedTempFile::new_in(&self.outbox).map_err(|err| send_error(&err))?;
        tmp.write_all(&bytes).map_err(|err| send_error(&err))?;
        tmp.as_file().sync_all().map_err(|err| send_error(&err))?;
        tmp.persist(&target)
            .map_err(|err| send_error(&err.error))?;

        self.next_seq = seq.saturating_add(1);
        debug!(role = %self.role, kind = message.kind(), seq, "message sent");
        Ok(())
    }

    /// Read and remove the oldest inbound message. No suspension point
    /// between read and delete, which keeps `receive` cancel safe.
    fn take_next(&mut self) -> Result<Option<Message>> {
        let seqs = match list_messages(&self.inbox) {
            Ok(seqs) => seqs,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AppError::Ipc(format!("cannot scan inbox: {err}"))),
        };
        let Some(&seq) = seqs.first() else {
            return Ok(None);
        };

        let path = self.inbox.join(message_file_name(seq));
        let bytes = fs::read(&path)
            .map_err(|err| AppError::Ipc(format!("cannot read message {seq}: {err}")))?;
        fs::remove_file(&path)
            .map_err(|err| AppError::Ipc(format!("cannot consume message {seq}: {err}")))?;

        let envelope = message::decode(&bytes)?;
        if envelope.payload.sender() == self.role {
            return Err(AppError::Protocol(format!(
                "{} received its own {} message",
                self.role,
                envelope.payload.kind()
            )));
        }

        debug!(
            role = %self.role,
            kind = envelope.payload.kind(),
            seq,
            message_id = %envelope.id,
            "message received"
        );
        Ok(Some(envelope.payload))
    }

    async fn next_message(&mut self) -> Result<Message> {
        loop {
            self.ensure_open()?;
            if let Some(message) = self.take_next()? {
                return Ok(message);
            }

            if self.peer_closed() {
                // The peer may have written its last message just before closing.
                if let Some(message) = self.take_next()? {
                    return Ok(message);
                }
                return Err(AppError::Ipc("peer closed the channel".into()));
            }

            tokio::select! {
                () = self.wake.notified() => {}
                () = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }
}

impl Channel for FileChannel {
    fn send(&mut self, message: &Message) -> Result<()> {
        self.write_message(message)
    }

    fn receive(&mut self) -> BoxFuture<'_, Result<Message>> {
        Box::pin(self.next_message())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.watcher = None;

        match self.role {
            Role::Master => destroy(&self.dir),
            Role::Worker => match fs::write(self.dir.join(WORKER_CLOSED), b"") {
                Ok(()) => Ok(()),
                // Master already destroyed the channel.
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(AppError::Ipc(format!("cannot mark channel closed: {err}"))),
            },
        }
    }
}

fn send_error(err: &io::Error) -> AppError {
    AppError::Ipc(format!("send failed: {err}"))
}

fn message_file_name(seq: u64) -> String {
    format!("{seq:020}.{MESSAGE_EXT}")
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX))
}

/// Sequence numbers of complete messages in `dir`, ascending.
fn list_messages(dir: &Path) -> io::Result<Vec<u64>> {
    let mut seqs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == MESSAGE_EXT) {
            if let Some(seq) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok())
            {
                seqs.push(seq);
            }
        }
    }
    seqs.sort_unstable();
    Ok(seqs)
}

fn destroy(dir: &Path) -> Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match fs::remove_dir_all(dir) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) if attempt < DESTROY_ATTEMPTS => {
                debug!(%err, attempt, "retrying channel destroy");
            }
            Err(err) => {
                return Err(AppError::Ipc(format!(
                    "cannot destroy channel {}: {err}",
                    dir.display()
                )))
            }
        }
    }
}

/// Wake pending receives on inbox file events. Polling covers the case
/// where no watcher can be installed.
fn watch_inbox(inbox: &Path, wake: Arc<Notify>) -> Option<RecommendedWatcher> {
    let watcher = notify::recommended_watcher(
        move |result: std::result::Result<Event, notify::Error>| {
            if let Ok(event) = result {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    wake.notify_one();
                }
            }
        },
    );

    let mut watcher = match watcher {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(%err, "file watcher unavailable, polling channel");
            return None;
        }
    };

    if let Err(err) = watcher.watch(inbox, RecursiveMode::NonRecursive) {
        warn!(%err, inbox = %inbox.display(), "cannot watch inbox, polling channel");
        return None;
    }
    Some(watcher)
}
