use std::{any::Any, result};

use thiserror::Error;

use crate::{thread_pool, AnyBoxedError, AnyError};

use super::partition::SeqRange;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
///
/// Every variant raised by [`ReconcileBuilder::reconcile`] is fatal
/// to the reconciliation run.
///
/// [`ReconcileBuilder::reconcile`]: super::ReconcileBuilder::reconcile
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot build sequence range {0}:{1}: bounds must be 1 <= start <= end")]
    InvalidSeqRangeError(u32, u32),
    #[error("cannot reconcile folders: {0} must be greater than zero")]
    InvalidParallelismError(&'static str),
    #[error("cannot build fingerprint index of source folder {1}")]
    BuildIndexError(#[source] AnyBoxedError, String),
    #[error("cannot count messages of target folder {1}")]
    CountTargetError(#[source] AnyBoxedError, String),
    #[error("cannot build reconciliation pool")]
    BuildPoolError(#[source] thread_pool::Error),
    #[error("cannot dispatch deletion task for messages {1}")]
    DispatchTaskError(#[source] thread_pool::Error, SeqRange),
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
