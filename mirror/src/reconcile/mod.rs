//! # Reconciliation
//!
//! Module dedicated to the reconciliation of a target folder with its
//! source folder: messages of the target folder that have no
//! counterpart in the source folder are flagged for deletion, then
//! optionally expunged. The main structure of this module is
//! [`ReconcileBuilder`].
//!
//! A run goes through the following states:
//!
//! 1. [`ReconcileState::Idle`]: nothing happened yet.
//! 2. [`ReconcileState::IndexBuilt`]: the fingerprint index of the
//!    source folder is built. It is never mutated afterwards.
//! 3. [`ReconcileState::TasksDispatched`]: the target folder is split
//!    into ranges, and one [`RangeDeletionTask`] per range is sent to
//!    the pool.
//! 4. [`ReconcileState::AllTasksJoined`]: every task reported its
//!    counters (or stopped).
//! 5. [`ReconcileState::Completed`]: flagged messages are expunged if
//!    requested, totals are final.
//!
//! Expunging is deferred to the end of the run: range tasks dispatched
//! by the coordinator always close their session without expunging,
//! even when [`ReconcileConfig::expunge`] is set, because an expunge
//! renumbers the folder while other ranges still rely on their
//! sequence numbers. Once every task joined, flagged messages are
//! expunged in one go from a dedicated read-write session. Expunging
//! at range close is only available to standalone tasks, through
//! [`RangeDeletionTask::with_expunge`].

pub mod config;
mod error;
pub mod partition;
pub mod pool;
pub mod report;
pub mod task;

use std::{collections::HashSet, fmt, future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, error, info, trace, warn};

#[doc(inline)]
pub use self::{
    config::ReconcileConfig,
    error::{Error, Result},
    partition::{partition, SeqRange},
    report::{DeletionCounters, RangeReport, ReconcileReport},
    task::RangeDeletionTask,
};
use crate::{
    fingerprint::{FingerprintIndex, FINGERPRINT_HEADERS},
    store::{AccessMode, FetchedMessage, MailStore, ReadOnlyFolder},
    AnyResult,
};

/// The source identity feed.
///
/// Supplies the prefetched headers of every message of the source
/// folder.
#[async_trait]
pub trait SourceFeed: Send + Sync {
    async fn source_messages(&self, folder: &str) -> AnyResult<Vec<FetchedMessage>>;
}

/// Messages already fetched by the caller.
#[async_trait]
impl SourceFeed for Vec<FetchedMessage> {
    async fn source_messages(&self, _folder: &str) -> AnyResult<Vec<FetchedMessage>> {
        Ok(self.clone())
    }
}

/// A source feed reading the source folder from a mail store.
///
/// The folder is opened in read-only mode and its headers are
/// fetched in one request.
#[derive(Clone)]
pub struct FolderFeed(Arc<dyn MailStore>);

impl FolderFeed {
    pub fn new(store: Arc<dyn MailStore>) -> Self {
        Self(store)
    }
}

#[async_trait]
impl SourceFeed for FolderFeed {
    async fn source_messages(&self, folder: &str) -> AnyResult<Vec<FetchedMessage>> {
        let mut session = self.0.open_read_only(folder).await?;
        let msgs = fetch_all_headers(session.as_mut()).await;

        if let Err(err) = session.close().await {
            warn!(folder, "cannot close source folder: {err}");
            trace!("{err:?}");
        }

        msgs
    }
}

async fn fetch_all_headers(
    session: &mut dyn ReadOnlyFolder,
) -> AnyResult<Vec<FetchedMessage>> {
    match session.count().await? {
        0 => Ok(Vec::new()),
        count => {
            session
                .fetch_headers(SeqRange::new(1, count), &FINGERPRINT_HEADERS)
                .await
        }
    }
}

/// The reconciliation state.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ReconcileState {
    Idle,
    IndexBuilt,
    TasksDispatched,
    AllTasksJoined,
    Completed,
}

impl ReconcileState {
    /// Return the state following the current one, or `None` if the
    /// current state is terminal.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::IndexBuilt),
            Self::IndexBuilt => Some(Self::TasksDispatched),
            Self::TasksDispatched => Some(Self::AllTasksJoined),
            Self::AllTasksJoined => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// Move to the next state.
    ///
    /// # Panics
    ///
    /// Panics if the current state is terminal.
    fn advance(&mut self) -> Self {
        match self.next() {
            Some(next) => {
                *self = next;
                next
            }
            None => panic!("cannot advance reconciliation: state {self} is terminal"),
        }
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::IndexBuilt => write!(f, "index built"),
            Self::TasksDispatched => write!(f, "tasks dispatched"),
            Self::AllTasksJoined => write!(f, "all tasks joined"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// The reconciliation async event handler.
pub type ReconcileEventHandler =
    dyn Fn(ReconcileEvent) -> Pin<Box<dyn Future<Output = AnyResult<()>> + Send>> + Send + Sync;

/// The reconciliation event.
///
/// Represents all the events that can be triggered during a
/// reconciliation run.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum ReconcileEvent {
    ChangedState(ReconcileState),
    BuiltIndex(String, usize),
    PartitionedFolder(String, Vec<SeqRange>),
    ProcessedRange(SeqRange, u64, u64),
    FailedRange(SeqRange, String),
    ExpungedFolder(String),
}

impl ReconcileEvent {
    pub async fn emit(&self, handler: &Option<Arc<ReconcileEventHandler>>) {
        if let Some(handler) = handler.as_ref() {
            if let Err(err) = handler(self.clone()).await {
                debug!("error while emitting reconcile event: {err}");
                trace!("{err:?}");
            } else {
                debug!("emitted reconcile event {self:?}");
            }
        }
    }
}

impl fmt::Display for ReconcileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChangedState(state) => {
                write!(f, "Reconciliation {state}")
            }
            Self::BuiltIndex(folder, n) => {
                write!(f, "Indexed {n} messages from {folder}")
            }
            Self::PartitionedFolder(folder, ranges) => {
                write!(f, "Split {folder} into {} ranges", ranges.len())
            }
            Self::ProcessedRange(range, deleted, skipped) => {
                write!(f, "Processed messages {range}: {deleted} deleted, {skipped} skipped")
            }
            Self::FailedRange(range, err) => {
                write!(f, "Failed to process messages {range}: {err}")
            }
            Self::ExpungedFolder(folder) => {
                write!(f, "Expunged {folder}")
            }
        }
    }
}

/// The reconciliation builder.
#[derive(Clone)]
pub struct ReconcileBuilder {
    source: Arc<dyn SourceFeed>,
    target: Arc<dyn MailStore>,
    config: ReconcileConfig,
    handler: Option<Arc<ReconcileEventHandler>>,
}

impl ReconcileBuilder {
    /// Create a new reconciliation builder from a source feed and a
    /// target store.
    pub fn new(
        source: Arc<dyn SourceFeed>,
        target: Arc<dyn MailStore>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            source,
            target,
            config,
            handler: None,
        }
    }

    /// Create a new reconciliation builder reading the source folder
    /// from the given source store.
    pub fn from_stores(
        source: Arc<dyn MailStore>,
        target: Arc<dyn MailStore>,
        config: ReconcileConfig,
    ) -> Self {
        Self::new(Arc::new(FolderFeed::new(source)), target, config)
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn set_some_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        &mut self,
        handler: Option<impl Fn(ReconcileEvent) -> F + Send + Sync + 'static>,
    ) {
        self.handler = match handler {
            Some(handler) => Some(Arc::new(move |evt| Box::pin(handler(evt)))),
            None => None,
        };
    }

    pub fn set_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        &mut self,
        handler: impl Fn(ReconcileEvent) -> F + Send + Sync + 'static,
    ) {
        self.set_some_handler(Some(handler));
    }

    pub fn with_some_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        mut self,
        handler: Option<impl Fn(ReconcileEvent) -> F + Send + Sync + 'static>,
    ) -> Self {
        self.set_some_handler(handler);
        self
    }

    pub fn with_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        mut self,
        handler: impl Fn(ReconcileEvent) -> F + Send + Sync + 'static,
    ) -> Self {
        self.set_handler(handler);
        self
    }

    pub fn set_some_threads(&mut self, threads: Option<usize>) {
        self.config.threads = threads;
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.set_some_threads(Some(threads));
        self
    }

    pub fn set_some_ranges(&mut self, ranges: Option<usize>) {
        self.config.ranges = ranges;
    }

    pub fn with_ranges(mut self, ranges: usize) -> Self {
        self.set_some_ranges(Some(ranges));
        self
    }

    pub fn set_expunge(&mut self, expunge: bool) {
        self.config.expunge = expunge;
    }

    pub fn with_expunge(mut self, expunge: bool) -> Self {
        self.set_expunge(expunge);
        self
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.config.dry_run = dry_run;
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.set_dry_run(dry_run);
        self
    }

    /// Run the reconciliation.
    ///
    /// Only the impossibility to build the source index or to count
    /// the target folder is fatal. Range failures are logged, listed
    /// in the report and never stop other ranges.
    pub async fn reconcile(self) -> Result<ReconcileReport> {
        let threads = self.config.threads()?;
        let parts = self.config.ranges()?;
        let mode = self.config.access_mode();
        let source = self.config.source.as_str();
        let target = self.config.target.as_str();

        info!(source, target, %mode, "reconciling folders");

        let mut state = ReconcileState::Idle;

        let msgs = self
            .source
            .source_messages(source)
            .await
            .map_err(|err| Error::BuildIndexError(err, source.to_owned()))?;
        let index = Arc::new(FingerprintIndex::build(&msgs));
        drop(msgs);

        if index.skipped() > 0 {
            warn!(
                source,
                skipped = index.skipped(),
                "some source messages have no identity"
            );
        }

        self.emit(ReconcileEvent::BuiltIndex(source.to_owned(), index.len()))
            .await;
        self.transition(&mut state).await;

        let count = self.count_target().await?;
        let ranges = partition(count, parts);
        debug!(target, count, ranges = ranges.len(), "partitioned target folder");

        self.emit(ReconcileEvent::PartitionedFolder(
            target.to_owned(),
            ranges.clone(),
        ))
        .await;

        let counters = Arc::new(DeletionCounters::default());
        let mut pool = pool::new(
            self.target.clone(),
            index.clone(),
            counters.clone(),
            threads.get(),
        )
        .await?;

        for range in &ranges {
            let range = *range;
            // never expunges, see expunge_target
            let task = RangeDeletionTask::new(target, range).with_mode(mode);

            let sent = pool.send(move |ctx| async move {
                let report = task.run(ctx.store.as_ref(), &ctx.index).await;
                ctx.counters.add(&report);
                report
            });

            if let Err(err) = sent {
                pool.shutdown();
                return Err(Error::DispatchTaskError(err, range));
            }
        }

        pool.close_queue();
        self.transition(&mut state).await;

        let mut pending: HashSet<SeqRange> = ranges.iter().copied().collect();
        let mut failures = Vec::new();

        while let Some(report) = pool.recv().await {
            pending.remove(&report.range);

            self.emit(ReconcileEvent::ProcessedRange(
                report.range,
                report.deleted,
                report.skipped,
            ))
            .await;

            if let Some(err) = report.error {
                self.emit(ReconcileEvent::FailedRange(report.range, err.to_string()))
                    .await;
                failures.push((report.range, err));
            }
        }

        if let Err(err) = pool.join().await {
            warn!("cannot join reconciliation pool: {err}");
            trace!("{err:?}");
        }

        for range in pending {
            let err = task::Error::InterruptedError(target.to_owned(), range);
            error!(target, range = %range, "{err}");
            self.emit(ReconcileEvent::FailedRange(range, err.to_string()))
                .await;
            failures.push((range, err));
        }

        failures.sort_by_key(|(range, _)| *range);
        self.transition(&mut state).await;

        let expunged =
            self.config.expunge && mode == AccessMode::ReadWrite && self.expunge_target().await;

        let report = ReconcileReport {
            folder: target.to_owned(),
            deleted: counters.deleted(),
            skipped: counters.skipped(),
            ranges: ranges.len(),
            failures,
            expunged,
            dry_run: self.config.dry_run,
        };

        self.transition(&mut state).await;

        info!(
            target,
            deleted = report.deleted,
            skipped = report.skipped,
            failed = report.failures.len(),
            "reconciled folders"
        );

        Ok(report)
    }

    async fn emit(&self, evt: ReconcileEvent) {
        evt.emit(&self.handler).await
    }

    async fn transition(&self, state: &mut ReconcileState) {
        let next = state.advance();
        debug!(state = %next, "reconciliation state changed");
        self.emit(ReconcileEvent::ChangedState(next)).await;
    }

    /// Count the messages of the target folder, using a dedicated
    /// read-only session.
    async fn count_target(&self) -> Result<u32> {
        let target = &self.config.target;

        let mut session = self
            .target
            .open_read_only(target)
            .await
            .map_err(|err| Error::CountTargetError(err, target.clone()))?;

        let count = session.count().await;

        if let Err(err) = session.close().await {
            warn!(target = target.as_str(), "cannot close target folder: {err}");
            trace!("{err:?}");
        }

        count.map_err(|err| Error::CountTargetError(err, target.clone()))
    }

    /// Expunge the target folder using a dedicated read-write
    /// session.
    ///
    /// Returns `true` if the folder has been expunged.
    async fn expunge_target(&self) -> bool {
        let target = &self.config.target;

        let res = async {
            let session = self.target.open_read_write(target).await.map_err(|err| {
                task::Error::OpenFolderError(err, target.clone(), AccessMode::ReadWrite)
            })?;
            session
                .close(true)
                .await
                .map_err(|err| task::Error::CloseFolderError(err, target.clone()))
        };

        match res.await {
            Ok(()) => {
                debug!(target = target.as_str(), "expunged target folder");
                self.emit(ReconcileEvent::ExpungedFolder(target.clone()))
                    .await;
                true
            }
            Err(err) => {
                warn!(target = target.as_str(), "cannot expunge target folder: {err}");
                trace!("{err:?}");
                false
            }
        }
    }
}
