//! # Range deletion task
//!
//! Module dedicated to the unit of work of the reconciliation: one
//! task opens its own session on the target folder, prefetches the
//! fingerprint headers of its range in one request, flags messages
//! absent from the source index, then closes its session. The
//! session is closed even when a step fails, without expunging.

use std::{any::Any, result};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
    fingerprint::{self, FingerprintIndex, MessageFingerprint, FINGERPRINT_HEADERS},
    store::{AccessMode, FetchedMessage, MailStore, OpenedFolder},
    AnyBoxedError, AnyError,
};

use super::{partition::SeqRange, report::RangeReport};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open folder {1} in {2} mode")]
    OpenFolderError(#[source] AnyBoxedError, String, AccessMode),
    #[error("cannot fetch headers of messages {2} from folder {1}")]
    FetchHeadersError(#[source] AnyBoxedError, String, SeqRange),
    #[error("cannot flag message {2} of folder {1} for deletion")]
    MarkDeletedError(#[source] AnyBoxedError, String, u32),
    #[error("cannot close folder {1}")]
    CloseFolderError(#[source] AnyBoxedError, String),
    #[error("cannot process messages {1} from folder {0}: task did not report")]
    InterruptedError(String, SeqRange),
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

/// What to do with a target message.
#[derive(Debug)]
pub enum Decision {
    /// The message has no counterpart in the source folder.
    Delete,

    /// The message exists in the source folder.
    Keep,

    /// The identity of the message cannot be resolved. Such a message
    /// may be unique, so it is never deleted.
    Undecidable(fingerprint::Error),
}

/// Decide the fate of the given target message.
pub fn decide(index: &FingerprintIndex, msg: &FetchedMessage) -> Decision {
    match MessageFingerprint::compute(msg) {
        Err(err) => Decision::Undecidable(err),
        Ok(fingerprint) if index.contains(&fingerprint) => Decision::Keep,
        Ok(_) => Decision::Delete,
    }
}

/// The range deletion task.
#[derive(Clone, Debug)]
pub struct RangeDeletionTask {
    folder: String,
    range: SeqRange,
    mode: AccessMode,
    expunge: bool,
}

impl RangeDeletionTask {
    /// Create a new task flagging messages of the given range of the
    /// given target folder.
    ///
    /// The folder is opened in read-write mode and closed without
    /// expunging by default.
    pub fn new(folder: impl ToString, range: SeqRange) -> Self {
        Self {
            folder: folder.to_string(),
            range,
            mode: AccessMode::ReadWrite,
            expunge: false,
        }
    }

    /// Change the mode the folder is opened with.
    ///
    /// In read-only mode, messages are counted as deleted but never
    /// flagged.
    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    /// Expunge flagged messages when closing the folder.
    ///
    /// Ignored in read-only mode.
    pub fn with_expunge(mut self, expunge: bool) -> Self {
        self.expunge = expunge;
        self
    }

    pub fn range(&self) -> SeqRange {
        self.range
    }

    /// Run the task.
    ///
    /// Always returns a report. If the task fails midway, the report
    /// holds the counters accumulated so far along with the error.
    pub async fn run(self, store: &dyn MailStore, index: &FingerprintIndex) -> RangeReport {
        let mut report = RangeReport::new(self.range);

        debug!(folder = self.folder.as_str(), range = %self.range, mode = %self.mode, "processing range");

        match self.process(store, index, &mut report).await {
            Ok(()) => {
                debug!(
                    folder = self.folder.as_str(),
                    range = %self.range,
                    deleted = report.deleted,
                    skipped = report.skipped,
                    "processed range"
                );
            }
            Err(err) => {
                warn!(folder = self.folder.as_str(), range = %self.range, "{err}");
                trace!("{err:?}");
                report.error = Some(err);
            }
        }

        report
    }

    async fn process(
        &self,
        store: &dyn MailStore,
        index: &FingerprintIndex,
        report: &mut RangeReport,
    ) -> Result<()> {
        let mut session = OpenedFolder::open(store, &self.folder, self.mode)
            .await
            .map_err(|err| Error::OpenFolderError(err, self.folder.clone(), self.mode))?;

        if let Err(err) = self.flag_messages(&mut session, index, report).await {
            // flags already set stay set, only the expunge is skipped
            if let Err(close_err) = session.close(false).await {
                warn!(
                    folder = self.folder.as_str(),
                    "cannot close folder after failure: {close_err}"
                );
                trace!("{close_err:?}");
            }
            return Err(err);
        }

        session
            .close(self.expunge)
            .await
            .map_err(|err| Error::CloseFolderError(err, self.folder.clone()))?;

        Ok(())
    }

    async fn flag_messages(
        &self,
        session: &mut OpenedFolder,
        index: &FingerprintIndex,
        report: &mut RangeReport,
    ) -> Result<()> {
        let msgs = session
            .fetch_headers(self.range, &FINGERPRINT_HEADERS)
            .await
            .map_err(|err| Error::FetchHeadersError(err, self.folder.clone(), self.range))?;

        for msg in &msgs {
            match decide(index, msg) {
                Decision::Keep => {
                    report.skipped += 1;
                }
                Decision::Undecidable(err) => {
                    debug!(folder = self.folder.as_str(), "keeping message: {err}");
                    report.skipped += 1;
                }
                Decision::Delete => {
                    if let OpenedFolder::ReadWrite(session) = &mut *session {
                        session.mark_deleted(msg.seq).await.map_err(|err| {
                            Error::MarkDeletedError(err, self.folder.clone(), msg.seq)
                        })?;
                    }
                    report.deleted += 1;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        fingerprint::FingerprintIndex,
        reconcile::partition::SeqRange,
        store::{
            memory::{FailurePoint, MemoryStore},
            AccessMode, FetchedMessage,
        },
    };

    use super::{decide, Decision, Error, RangeDeletionTask};

    fn raw(id: &str) -> String {
        format!("Message-ID: <{id}@localhost>\r\nSubject: {id}\r\n\r\n{id}\r\n")
    }

    async fn setup(source: &[&str], target: &[&str]) -> (MemoryStore, FingerprintIndex) {
        let store = MemoryStore::new();
        store.add_folder("INBOX").await;

        for id in target {
            store.add_message("INBOX", raw(id)).await;
        }

        let msgs: Vec<_> = source
            .iter()
            .zip(1..)
            .map(|(id, seq)| FetchedMessage::new(seq, raw(id)))
            .collect();

        (store, FingerprintIndex::build(&msgs))
    }

    #[test]
    fn decisions() {
        let index = FingerprintIndex::build(&[FetchedMessage::new(1, raw("a"))]);

        assert!(matches!(
            decide(&index, &FetchedMessage::new(1, raw("a"))),
            Decision::Keep
        ));
        assert!(matches!(
            decide(&index, &FetchedMessage::new(1, raw("b"))),
            Decision::Delete
        ));
        assert!(matches!(
            decide(&index, &FetchedMessage::new(1, "Subject: a\r\n\r\n")),
            Decision::Undecidable(_)
        ));
    }

    #[tokio::test]
    async fn flags_messages_missing_from_source() {
        let (store, index) = setup(&["a", "b"], &["a", "b", "c"]).await;

        let report = RangeDeletionTask::new("INBOX", SeqRange::new(1, 3))
            .run(&store, &index)
            .await;

        assert!(report.error.is_none());
        assert_eq!(report.deleted, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(store.flagged("INBOX").await.unwrap(), vec![3]);
        assert_eq!(store.messages("INBOX").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn expunges_on_close() {
        let (store, index) = setup(&["b"], &["a", "b", "c"]).await;

        let report = RangeDeletionTask::new("INBOX", SeqRange::new(1, 3))
            .with_expunge(true)
            .run(&store, &index)
            .await;

        assert_eq!(report.deleted, 2);
        assert_eq!(store.messages("INBOX").await.unwrap(), vec![raw("b").into_bytes()]);
        assert_eq!(store.opened_sessions(), 0);
    }

    #[tokio::test]
    async fn read_only_never_flags_nor_expunges() {
        let (store, index) = setup(&["a"], &["a", "b", "c"]).await;
        store.flag("INBOX", 1).await.unwrap();

        let report = RangeDeletionTask::new("INBOX", SeqRange::new(1, 3))
            .with_mode(AccessMode::ReadOnly)
            .with_expunge(true)
            .run(&store, &index)
            .await;

        assert!(report.error.is_none());
        assert_eq!(report.deleted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.flagged("INBOX").await.unwrap(), vec![1]);
        assert_eq!(store.messages("INBOX").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn undecidable_messages_are_kept() {
        let (store, index) = setup(&["a"], &["a"]).await;
        store.add_message("INBOX", "Subject: spam\r\n\r\nspam\r\n").await;

        let report = RangeDeletionTask::new("INBOX", SeqRange::new(1, 2))
            .run(&store, &index)
            .await;

        assert_eq!(report.deleted, 0);
        assert_eq!(report.skipped, 2);
        assert!(store.flagged("INBOX").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_keeps_partial_counters() {
        let (store, index) = setup(&[], &["a", "b", "c"]).await;
        store.fail("INBOX", FailurePoint::MarkDeleted(2)).await;

        let report = RangeDeletionTask::new("INBOX", SeqRange::new(1, 3))
            .run(&store, &index)
            .await;

        assert_eq!(report.deleted, 1);
        assert_eq!(report.skipped, 0);
        assert!(matches!(report.error, Some(Error::MarkDeletedError(_, _, 2))));
        assert_eq!(store.opened_sessions(), 0);
        assert_eq!(store.closed_sessions(), 1);
        assert_eq!(store.flagged("INBOX").await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn fetch_failure_still_closes_session() {
        let (store, index) = setup(&[], &["a", "b", "c"]).await;
        store.fail("INBOX", FailurePoint::Fetch(2)).await;

        let report = RangeDeletionTask::new("INBOX", SeqRange::new(1, 3))
            .with_expunge(true)
            .run(&store, &index)
            .await;

        assert_eq!((report.deleted, report.skipped), (0, 0));
        assert!(matches!(report.error, Some(Error::FetchHeadersError(..))));
        assert_eq!(store.closed_sessions(), 1);
        assert_eq!(store.opened_sessions(), 0);
        assert_eq!(store.messages("INBOX").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_range_is_not_expunged() {
        let (store, index) = setup(&[], &["a", "b", "c"]).await;
        store.fail("INBOX", FailurePoint::MarkDeleted(3)).await;

        let report = RangeDeletionTask::new("INBOX", SeqRange::new(1, 3))
            .with_expunge(true)
            .run(&store, &index)
            .await;

        assert_eq!(report.deleted, 2);
        assert!(matches!(report.error, Some(Error::MarkDeletedError(_, _, 3))));
        assert_eq!(store.closed_sessions(), 1);
        assert_eq!(store.flagged("INBOX").await.unwrap(), vec![1, 2]);
        assert_eq!(store.messages("INBOX").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn open_failure_reports_zero() {
        let (store, index) = setup(&[], &["a"]).await;
        store.fail("INBOX", FailurePoint::OpenReadWrite).await;

        let report = RangeDeletionTask::new("INBOX", SeqRange::new(1, 1))
            .run(&store, &index)
            .await;

        assert_eq!((report.deleted, report.skipped), (0, 0));
        assert!(matches!(report.error, Some(Error::OpenFolderError(..))));
    }

    #[tokio::test]
    async fn close_failure_keeps_counters() {
        let (store, index) = setup(&["a"], &["a", "b"]).await;
        store.fail("INBOX", FailurePoint::Close).await;

        let report = RangeDeletionTask::new("INBOX", SeqRange::new(1, 2))
            .with_expunge(true)
            .run(&store, &index)
            .await;

        assert_eq!((report.deleted, report.skipped), (1, 1));
        assert!(matches!(report.error, Some(Error::CloseFolderError(..))));
        assert_eq!(store.messages("INBOX").await.unwrap().len(), 2);
    }
}
