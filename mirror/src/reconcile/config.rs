//! # Reconciliation configuration
//!
//! Module dedicated to the configuration of one reconciliation run.

use std::{num::NonZeroUsize, thread::available_parallelism};

use crate::store::AccessMode;

use super::{Error, Result};

/// The reconciliation configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct ReconcileConfig {
    /// The name of the source folder, the one messages are mirrored
    /// from.
    pub source: String,

    /// The name of the target folder, the one messages absent from
    /// the source folder are removed from.
    pub target: String,

    /// The number of deletion tasks running in parallel, which is
    /// also the maximum number of sessions opened at the same time
    /// against the target store.
    ///
    /// Defaults to the number of available CPUs.
    pub threads: Option<usize>,

    /// The number of ranges the target folder is split into.
    ///
    /// Defaults to the number of threads.
    pub ranges: Option<usize>,

    /// Permanently remove flagged messages at the end of the run.
    ///
    /// When disabled, messages are only flagged for deletion.
    pub expunge: bool,

    /// Open the target folder in read-only mode: messages are counted
    /// but never flagged.
    pub dry_run: bool,
}

impl ReconcileConfig {
    pub fn new(source: impl ToString, target: impl ToString) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            ..Default::default()
        }
    }

    /// Return the number of threads of the deletion pool.
    pub fn threads(&self) -> Result<NonZeroUsize> {
        match self.threads {
            Some(threads) => {
                NonZeroUsize::new(threads).ok_or(Error::InvalidParallelismError("threads"))
            }
            None => Ok(available_parallelism().unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Return the number of ranges the target folder is split into.
    pub fn ranges(&self) -> Result<NonZeroUsize> {
        match self.ranges {
            Some(ranges) => NonZeroUsize::new(ranges).ok_or(Error::InvalidParallelismError("ranges")),
            None => self.threads(),
        }
    }

    /// Return the mode the target folder is opened with.
    pub fn access_mode(&self) -> AccessMode {
        if self.dry_run {
            AccessMode::ReadOnly
        } else {
            AccessMode::ReadWrite
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use crate::{reconcile::Error, store::AccessMode};

    use super::ReconcileConfig;

    #[test]
    fn defaults() {
        let config = ReconcileConfig::new("INBOX", "Mirror");

        assert!(config.threads().unwrap().get() >= 1);
        assert_eq!(config.ranges().unwrap(), config.threads().unwrap());
        assert_eq!(config.access_mode(), AccessMode::ReadWrite);
        assert!(!config.expunge);
    }

    #[test]
    fn ranges_default_to_threads() {
        let config = ReconcileConfig {
            threads: Some(3),
            ..ReconcileConfig::new("INBOX", "Mirror")
        };

        assert_eq!(config.ranges().unwrap(), NonZeroUsize::new(3).unwrap());
    }

    #[test]
    fn zero_is_invalid() {
        let config = ReconcileConfig {
            threads: Some(0),
            ranges: Some(2),
            ..Default::default()
        };
        assert!(matches!(
            config.threads(),
            Err(Error::InvalidParallelismError("threads"))
        ));
        assert!(config.ranges().is_ok());

        let config = ReconcileConfig {
            ranges: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            config.ranges(),
            Err(Error::InvalidParallelismError("ranges"))
        ));
    }

    #[test]
    fn dry_run_is_read_only() {
        let config = ReconcileConfig {
            dry_run: true,
            ..Default::default()
        };

        assert_eq!(config.access_mode(), AccessMode::ReadOnly);
    }
}
