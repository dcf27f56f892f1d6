//! # Memory store
//!
//! Module dedicated to the in-memory [`MailStore`]. It mimics the
//! behaviour of a remote store closely enough to exercise the
//! reconciliation engine: every session captures the folder content
//! at open time (sequence numbers stay stable for the session
//! lifetime), deletion flags are shared between sessions and
//! expunging renumbers the folder. Failures can be injected at any
//! step of a session.

use std::{
    any::Any,
    collections::{HashMap, HashSet},
    fmt, result,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::{reconcile::partition::SeqRange, AnyBoxedError, AnyError, AnyResult};

use super::{AccessMode, FetchedMessage, Folder, MailStore, ReadOnlyFolder, ReadWriteFolder};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find memory folder {0}")]
    FolderNotFoundError(String),
    #[error("cannot find message {0} in memory folder {1}")]
    MessageNotFoundError(u32, String),
    #[error("cannot {1} memory folder {0}: injected failure")]
    InjectedFailureError(String, FailurePoint),
}

impl AnyError for Error {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<Error> for AnyBoxedError {
    fn from(err: Error) -> Self {
        Box::new(err)
    }
}

/// The step of a session at which a failure can be injected.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FailurePoint {
    OpenReadOnly,
    OpenReadWrite,
    Count,
    /// Fails any fetch whose range contains the given sequence
    /// number.
    Fetch(u32),
    MarkDeleted(u32),
    Close,
}

impl fmt::Display for FailurePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenReadOnly => write!(f, "open (read-only)"),
            Self::OpenReadWrite => write!(f, "open (read-write)"),
            Self::Count => write!(f, "count messages of"),
            Self::Fetch(seq) => write!(f, "fetch message {seq} from"),
            Self::MarkDeleted(seq) => write!(f, "flag message {seq} from"),
            Self::Close => write!(f, "close"),
        }
    }
}

#[derive(Debug)]
struct MemoryMessage {
    uid: u32,
    raw: Vec<u8>,
    deleted: bool,
}

#[derive(Debug, Default)]
struct MemoryFolderState {
    next_uid: u32,
    messages: Vec<MemoryMessage>,
}

#[derive(Debug, Default)]
struct MemoryState {
    folders: HashMap<String, MemoryFolderState>,
    failures: HashSet<(String, FailurePoint)>,
}

impl MemoryState {
    fn folder(&self, folder: &str) -> Result<&MemoryFolderState> {
        self.folders
            .get(folder)
            .ok_or_else(|| Error::FolderNotFoundError(folder.to_owned()))
    }

    fn folder_mut(&mut self, folder: &str) -> Result<&mut MemoryFolderState> {
        self.folders
            .get_mut(folder)
            .ok_or_else(|| Error::FolderNotFoundError(folder.to_owned()))
    }

    fn check(&self, folder: &str, point: FailurePoint) -> Result<()> {
        if self.failures.contains(&(folder.to_owned(), point)) {
            return Err(Error::InjectedFailureError(folder.to_owned(), point));
        }

        Ok(())
    }

    fn check_fetch(&self, folder: &str, range: SeqRange) -> Result<()> {
        let failure = self.failures.iter().find_map(|(name, point)| match point {
            FailurePoint::Fetch(seq) if name == folder && range.contains(*seq) => Some(*point),
            _ => None,
        });

        match failure {
            Some(point) => Err(Error::InjectedFailureError(folder.to_owned(), point)),
            None => Ok(()),
        }
    }
}

/// Counts opened sessions, and remembers the highest number of
/// sessions opened at the same time.
#[derive(Debug, Default)]
struct SessionGauge {
    opened: AtomicUsize,
    peak: AtomicUsize,
    /// Sessions whose close has been requested, successful or not.
    closed: AtomicUsize,
}

/// Decrements the session gauge when the session is dropped, closed
/// or not.
#[derive(Debug)]
struct SessionGuard(Arc<SessionGauge>);

impl SessionGuard {
    fn new(gauge: &Arc<SessionGauge>) -> Self {
        let opened = gauge.opened.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.peak.fetch_max(opened, Ordering::SeqCst);
        Self(gauge.clone())
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.opened.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The in-memory mail store.
///
/// Clones share the same content.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    sessions: Arc<SessionGauge>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the given folder if it does not exist yet.
    pub async fn add_folder(&self, folder: impl ToString) {
        let mut state = self.state.lock().await;
        state.folders.entry(folder.to_string()).or_default();
    }

    /// Append the given raw message to the given folder, creating
    /// the folder if needed.
    pub async fn add_message(&self, folder: impl ToString, raw: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().await;
        let folder = state.folders.entry(folder.to_string()).or_default();

        folder.next_uid += 1;
        let uid = folder.next_uid;

        folder.messages.push(MemoryMessage {
            uid,
            raw: raw.into(),
            deleted: false,
        });
    }

    /// Return the raw messages of the given folder, flagged ones
    /// included, in sequence order.
    pub async fn messages(&self, folder: &str) -> Result<Vec<Vec<u8>>> {
        let state = self.state.lock().await;
        let folder = state.folder(folder)?;
        Ok(folder.messages.iter().map(|msg| msg.raw.clone()).collect())
    }

    /// Return the sequence numbers of the messages flagged for
    /// deletion.
    pub async fn flagged(&self, folder: &str) -> Result<Vec<u32>> {
        let state = self.state.lock().await;
        let folder = state.folder(folder)?;
        Ok(folder
            .messages
            .iter()
            .zip(1..)
            .filter(|(msg, _)| msg.deleted)
            .map(|(_, seq)| seq)
            .collect())
    }

    /// Set the deletion flag of the message matching the given
    /// sequence number, outside of any session.
    pub async fn flag(&self, folder: &str, seq: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        let msg = state
            .folder_mut(folder)?
            .messages
            .get_mut((seq as usize).wrapping_sub(1))
            .ok_or_else(|| Error::MessageNotFoundError(seq, folder.to_owned()))?;
        msg.deleted = true;
        Ok(())
    }

    /// Make the given step fail for every session of the given
    /// folder.
    pub async fn fail(&self, folder: impl ToString, point: FailurePoint) {
        let mut state = self.state.lock().await;
        state.failures.insert((folder.to_string(), point));
    }

    /// Return the highest number of sessions that have been opened
    /// at the same time.
    pub fn peak_sessions(&self) -> usize {
        self.sessions.peak.load(Ordering::SeqCst)
    }

    /// Return the number of sessions currently opened.
    ///
    /// A session dropped without being closed is no longer counted.
    pub fn opened_sessions(&self) -> usize {
        self.sessions.opened.load(Ordering::SeqCst)
    }

    /// Return the number of times a session has been explicitly
    /// closed, whether the close succeeded or not.
    pub fn closed_sessions(&self) -> usize {
        self.sessions.closed.load(Ordering::SeqCst)
    }

    async fn open(&self, folder: &str, mode: AccessMode) -> Result<MemoryFolder> {
        let state = self.state.lock().await;

        state.check(
            folder,
            match mode {
                AccessMode::ReadOnly => FailurePoint::OpenReadOnly,
                AccessMode::ReadWrite => FailurePoint::OpenReadWrite,
            },
        )?;

        let uids = state.folder(folder)?.messages.iter().map(|msg| msg.uid).collect();
        debug!(folder, %mode, "opened memory folder");

        Ok(MemoryFolder {
            store: self.clone(),
            folder: folder.to_owned(),
            uids,
            _guard: SessionGuard::new(&self.sessions),
        })
    }
}

#[async_trait]
impl MailStore for MemoryStore {
    async fn open_read_only(&self, folder: &str) -> AnyResult<Box<dyn ReadOnlyFolder>> {
        Ok(Box::new(self.open(folder, AccessMode::ReadOnly).await?))
    }

    async fn open_read_write(&self, folder: &str) -> AnyResult<Box<dyn ReadWriteFolder>> {
        Ok(Box::new(self.open(folder, AccessMode::ReadWrite).await?))
    }
}

/// A session on a memory folder.
///
/// The session only sees the messages present when it was opened,
/// identified by their uid: expunges made by other sessions do not
/// renumber it.
#[derive(Debug)]
pub struct MemoryFolder {
    store: MemoryStore,
    folder: String,
    uids: Vec<u32>,
    _guard: SessionGuard,
}

impl MemoryFolder {
    fn uid(&self, seq: u32) -> Result<u32> {
        (seq as usize)
            .checked_sub(1)
            .and_then(|idx| self.uids.get(idx))
            .copied()
            .ok_or_else(|| Error::MessageNotFoundError(seq, self.folder.clone()))
    }

    async fn close_folder(&self, expunge: bool) -> Result<()> {
        self.store.sessions.closed.fetch_add(1, Ordering::SeqCst);

        let mut state = self.store.state.lock().await;
        state.check(&self.folder, FailurePoint::Close)?;

        if expunge {
            let folder = state.folder_mut(&self.folder)?;
            let len = folder.messages.len();
            folder.messages.retain(|msg| !msg.deleted);
            debug!(
                folder = self.folder.as_str(),
                count = len - folder.messages.len(),
                "expunged memory folder"
            );
        }

        Ok(())
    }
}

#[async_trait]
impl Folder for MemoryFolder {
    async fn count(&mut self) -> AnyResult<u32> {
        let state = self.store.state.lock().await;
        state.check(&self.folder, FailurePoint::Count)?;
        Ok(self.uids.len() as u32)
    }

    async fn fetch_headers(
        &mut self,
        range: SeqRange,
        headers: &[&str],
    ) -> AnyResult<Vec<FetchedMessage>> {
        let state = self.store.state.lock().await;
        state.check_fetch(&self.folder, range)?;
        let folder = state.folder(&self.folder)?;

        let end = range.end().min(self.uids.len() as u32);
        let mut msgs = Vec::new();

        for seq in range.start()..=end {
            let uid = self.uid(seq)?;
            match folder.messages.iter().find(|msg| msg.uid == uid) {
                Some(msg) => msgs.push(FetchedMessage::new(seq, filter_headers(&msg.raw, headers))),
                None => trace!(folder = self.folder.as_str(), seq, uid, "message vanished, skipping it"),
            }
        }

        Ok(msgs)
    }
}

#[async_trait]
impl ReadOnlyFolder for MemoryFolder {
    async fn close(self: Box<Self>) -> AnyResult<()> {
        Ok(self.close_folder(false).await?)
    }
}

#[async_trait]
impl ReadWriteFolder for MemoryFolder {
    async fn mark_deleted(&mut self, seq: u32) -> AnyResult<()> {
        let uid = self.uid(seq)?;

        let mut state = self.store.state.lock().await;
        state.check(&self.folder, FailurePoint::MarkDeleted(seq))?;

        let msg = state
            .folder_mut(&self.folder)?
            .messages
            .iter_mut()
            .find(|msg| msg.uid == uid)
            .ok_or_else(|| Error::MessageNotFoundError(seq, self.folder.clone()))?;
        msg.deleted = true;

        Ok(())
    }

    async fn close(self: Box<Self>, expunge: bool) -> AnyResult<()> {
        Ok(self.close_folder(expunge).await?)
    }
}

/// Keep only the given header fields of the header block of the
/// given raw message, the way an IMAP `BODY.PEEK[HEADER.FIELDS (…)]`
/// fetch does.
fn filter_headers(raw: &[u8], names: &[&str]) -> Vec<u8> {
    let mut headers = Vec::new();
    let mut keep = false;

    for line in raw.split_inclusive(|byte| *byte == b'\n') {
        if line == b"\r\n" || line == b"\n" {
            break;
        }

        if line.starts_with(b" ") || line.starts_with(b"\t") {
            if keep {
                headers.extend_from_slice(line);
            }
            continue;
        }

        keep = match line.iter().position(|byte| *byte == b':') {
            Some(pos) => {
                let name = String::from_utf8_lossy(&line[..pos]);
                names.iter().any(|n| n.eq_ignore_ascii_case(name.trim()))
            }
            None => false,
        };

        if keep {
            headers.extend_from_slice(line);
        }
    }

    if !headers.is_empty() && !headers.ends_with(b"\n") {
        headers.extend_from_slice(b"\r\n");
    }
    headers.extend_from_slice(b"\r\n");

    headers
}
