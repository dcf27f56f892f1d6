//! # Reconciliation report
//!
//! Module dedicated to reconciliation counters. Each deletion task
//! produces one [`RangeReport`], the coordinator sums them up into a
//! [`ReconcileReport`].

use std::sync::atomic::{AtomicU64, Ordering};

use super::{partition::SeqRange, task};

/// The report of one deletion task.
#[derive(Debug)]
pub struct RangeReport {
    /// The range processed by the task.
    pub range: SeqRange,

    /// The number of messages flagged for deletion (or that would
    /// have been flagged, during a dry run).
    pub deleted: u64,

    /// The number of messages left untouched.
    pub skipped: u64,

    /// The error that interrupted the task, if any. Counters still
    /// hold what was accumulated before the failure.
    pub error: Option<task::Error>,
}

impl RangeReport {
    pub fn new(range: SeqRange) -> Self {
        Self {
            range,
            deleted: 0,
            skipped: 0,
            error: None,
        }
    }
}

/// Folder-level counters.
///
/// Tasks add their counters as they complete, possibly at the same
/// time. Counters only grow.
#[derive(Debug, Default)]
pub struct DeletionCounters {
    deleted: AtomicU64,
    skipped: AtomicU64,
}

impl DeletionCounters {
    /// Add the counters of the given task report.
    pub fn add(&self, report: &RangeReport) {
        // ordered before the final read by the pool join
        self.deleted.fetch_add(report.deleted, Ordering::Relaxed);
        self.skipped.fetch_add(report.skipped, Ordering::Relaxed);
    }

    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// The reconciliation report of one folder pair.
///
/// Messages skipped because their identity could not be resolved are
/// counted with messages skipped because they exist in the source
/// folder. Failed ranges contribute what they processed before
/// failing.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// The name of the reconciled target folder.
    pub folder: String,

    /// The total number of messages flagged for deletion.
    pub deleted: u64,

    /// The total number of messages left untouched.
    pub skipped: u64,

    /// The number of ranges the target folder was split into.
    pub ranges: usize,

    /// The ranges whose task failed, associated with their error.
    pub failures: Vec<(SeqRange, task::Error)>,

    /// Whether flagged messages have been permanently removed.
    pub expunged: bool,

    /// Whether the reconciliation ran without touching the target.
    pub dry_run: bool,
}

impl ReconcileReport {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use crate::reconcile::partition::SeqRange;

    use super::{DeletionCounters, RangeReport};

    #[test]
    fn concurrent_add() {
        let counters = Arc::new(DeletionCounters::default());

        let threads: Vec<_> = (1..=8)
            .map(|n| {
                let counters = counters.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut report = RangeReport::new(SeqRange::new(n, n));
                        report.deleted = 1;
                        report.skipped = 2;
                        counters.add(&report);
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(counters.deleted(), 8000);
        assert_eq!(counters.skipped(), 16000);
    }
}
