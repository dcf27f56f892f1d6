//! # Message fingerprint
//!
//! Module dedicated to message identity. The main structure of this
//! module is [`MessageFingerprint`]: an immutable digest computed
//! from a small set of structural headers, used to decide whether a
//! message of the target folder has a counterpart in the source
//! folder.
//!
//! Headers must be prefetched in bulk (see
//! [`FINGERPRINT_HEADERS`]) before computing fingerprints: the
//! computation itself never touches the network.

mod error;
pub mod index;

use std::fmt;

use mail_parser::{Address, MessageParser};

#[doc(inline)]
pub use self::{
    error::{Error, Result},
    index::FingerprintIndex,
};
use crate::store::FetchedMessage;

/// The headers a mail store needs to prefetch so that fingerprints
/// can be computed.
pub const FINGERPRINT_HEADERS: [&str; 5] = ["Message-ID", "From", "To", "Subject", "Date"];

/// Byte separating normalized fields inside the digest input.
const FIELD_SEPARATOR: &[u8] = &[0x1f];

/// The message fingerprint.
///
/// Two messages that are semantically identical across stores
/// produce equal fingerprints. Only equality and hashing are
/// meaningful, there is no ordering.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct MessageFingerprint([u8; 16]);

impl MessageFingerprint {
    /// Compute the fingerprint of the given prefetched message.
    pub fn compute(msg: &FetchedMessage) -> Result<Self> {
        let headers = NormalizedHeaders::parse(msg)?;
        Ok(Self::from(&headers))
    }
}

impl From<&NormalizedHeaders> for MessageFingerprint {
    fn from(headers: &NormalizedHeaders) -> Self {
        let date = headers.date.map(|date| date.to_string()).unwrap_or_default();

        let mut ctx = md5::Context::new();
        for field in [
            headers.message_id.as_bytes(),
            headers.from.as_bytes(),
            headers.to.as_bytes(),
            headers.subject.as_bytes(),
            date.as_bytes(),
        ] {
            ctx.consume(field);
            ctx.consume(FIELD_SEPARATOR);
        }

        Self(ctx.compute().0)
    }
}

impl fmt::Display for MessageFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The normalized header values a fingerprint is derived from.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NormalizedHeaders {
    /// The message id, without angle brackets.
    pub message_id: String,

    /// The lower-cased sender addresses, comma separated.
    pub from: String,

    /// The lower-cased recipient addresses, comma separated.
    pub to: String,

    /// The subject with whitespace collapsed.
    pub subject: String,

    /// The date as a unix timestamp.
    pub date: Option<i64>,
}

impl NormalizedHeaders {
    /// Parse and normalize the prefetched headers of the given
    /// message.
    ///
    /// Fails when the header block cannot be parsed or when the
    /// `Message-ID` header is missing or empty.
    pub fn parse(msg: &FetchedMessage) -> Result<Self> {
        let parsed = MessageParser::new()
            .parse(msg.headers.as_slice())
            .ok_or(Error::ParseHeadersError(msg.seq))?;

        let message_id = parsed
            .message_id()
            .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').trim())
            .filter(|id| !id.is_empty())
            .ok_or(Error::MissingMessageIdError(msg.seq))?;

        Ok(Self {
            message_id: message_id.to_owned(),
            from: normalize_addresses(parsed.from()),
            to: normalize_addresses(parsed.to()),
            subject: parsed
                .subject()
                .map(|subject| subject.split_whitespace().collect::<Vec<_>>().join(" "))
                .unwrap_or_default(),
            date: parsed.date().map(|date| date.to_timestamp()),
        })
    }
}

fn normalize_addresses(addr: Option<&Address>) -> String {
    let addrs: Vec<String> = match addr {
        Some(Address::List(addrs)) => addrs
            .iter()
            .filter_map(|addr| addr.address.as_ref())
            .map(|addr| addr.trim().to_lowercase())
            .collect(),
        Some(Address::Group(groups)) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .filter_map(|addr| addr.address.as_ref())
            .map(|addr| addr.trim().to_lowercase())
            .collect(),
        None => Vec::new(),
    };

    addrs.join(",")
}
