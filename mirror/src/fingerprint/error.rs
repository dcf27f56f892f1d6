use std::{any::Any, result};

use thiserror::Error;

use crate::{AnyBoxedError, AnyError};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
///
/// Both variants mean that the message does not carry enough header
/// material to build an identity. They never come from the network.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse headers of message {0}")]
    ParseHeadersError(u32),
    #[error("cannot compute fingerprint of message {0}: Message-ID header is missing")]
    MissingMessageIdError(u32),
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
