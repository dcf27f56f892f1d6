//! # Mail store
//!
//! Module dedicated to the boundary between the reconciliation engine
//! and the remote mail store. The engine never manages connections
//! itself: it asks a [`MailStore`] to open folders and drives the
//! returned handles.
//!
//! The access mode is captured at open time by the type of the
//! returned handle. Only a [`ReadWriteFolder`] can flag messages for
//! deletion, and only its close can expunge.

pub mod memory;

use std::fmt;

use async_trait::async_trait;

use crate::{reconcile::partition::SeqRange, AnyResult};

/// The folder access mode.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// A message whose headers have been prefetched.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchedMessage {
    /// The 1-based sequence number of the message inside the folder
    /// session it was fetched from.
    pub seq: u32,

    /// The raw header block, restricted to the requested header
    /// fields.
    pub headers: Vec<u8>,
}

impl FetchedMessage {
    pub fn new(seq: u32, headers: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            headers: headers.into(),
        }
    }
}

/// The mail store session provider.
///
/// Every call opens a new, independent session. Sessions are never
/// shared between concurrent callers.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Open the given folder in read-only mode.
    async fn open_read_only(&self, folder: &str) -> AnyResult<Box<dyn ReadOnlyFolder>>;

    /// Open the given folder in read-write mode.
    async fn open_read_write(&self, folder: &str) -> AnyResult<Box<dyn ReadWriteFolder>>;
}

/// Operations shared by every opened folder.
#[async_trait]
pub trait Folder: Send {
    /// Return the number of messages of the folder.
    async fn count(&mut self) -> AnyResult<u32>;

    /// Fetch in one request the given header fields of every message
    /// inside the given range.
    async fn fetch_headers(
        &mut self,
        range: SeqRange,
        headers: &[&str],
    ) -> AnyResult<Vec<FetchedMessage>>;
}

/// A folder opened in read-only mode.
#[async_trait]
pub trait ReadOnlyFolder: Folder {
    /// Close the folder. Nothing is ever expunged.
    async fn close(self: Box<Self>) -> AnyResult<()>;
}

/// A folder opened in read-write mode.
#[async_trait]
pub trait ReadWriteFolder: Folder {
    /// Set the deletion flag of the message matching the given
    /// sequence number. The message stays in the folder until it is
    /// expunged.
    async fn mark_deleted(&mut self, seq: u32) -> AnyResult<()>;

    /// Close the folder, permanently removing messages flagged for
    /// deletion if `expunge` is `true`.
    async fn close(self: Box<Self>, expunge: bool) -> AnyResult<()>;
}

/// An opened folder, whatever its access mode.
pub enum OpenedFolder {
    ReadOnly(Box<dyn ReadOnlyFolder>),
    ReadWrite(Box<dyn ReadWriteFolder>),
}

impl OpenedFolder {
    /// Open the given folder using the given access mode.
    pub async fn open(store: &dyn MailStore, folder: &str, mode: AccessMode) -> AnyResult<Self> {
        match mode {
            AccessMode::ReadOnly => Ok(Self::ReadOnly(store.open_read_only(folder).await?)),
            AccessMode::ReadWrite => Ok(Self::ReadWrite(store.open_read_write(folder).await?)),
        }
    }

    pub fn mode(&self) -> AccessMode {
        match self {
            Self::ReadOnly(_) => AccessMode::ReadOnly,
            Self::ReadWrite(_) => AccessMode::ReadWrite,
        }
    }

    pub async fn count(&mut self) -> AnyResult<u32> {
        match self {
            Self::ReadOnly(folder) => folder.count().await,
            Self::ReadWrite(folder) => folder.count().await,
        }
    }

    pub async fn fetch_headers(
        &mut self,
        range: SeqRange,
        headers: &[&str],
    ) -> AnyResult<Vec<FetchedMessage>> {
        match self {
            Self::ReadOnly(folder) => folder.fetch_headers(range, headers).await,
            Self::ReadWrite(folder) => folder.fetch_headers(range, headers).await,
        }
    }

    /// Close the folder.
    ///
    /// A read-only folder is closed without expunging, whatever the
    /// value of `expunge`.
    pub async fn close(self, expunge: bool) -> AnyResult<()> {
        match self {
            Self::ReadOnly(folder) => folder.close().await,
            Self::ReadWrite(folder) => folder.close(expunge).await,
        }
    }
}
