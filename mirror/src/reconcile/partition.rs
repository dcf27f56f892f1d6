//! # Folder partition
//!
//! Module dedicated to splitting a folder into contiguous ranges of
//! sequence numbers, one range per deletion task.

use std::{fmt, num::NonZeroUsize};

use super::{Error, Result};

/// A range of message sequence numbers.
///
/// Bounds are 1-based and inclusive.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SeqRange {
    start: u32,
    end: u32,
}

impl SeqRange {
    /// Create a new range from bounds already known to be valid.
    ///
    /// # Panics
    ///
    /// Panics if `start` is zero or greater than `end`. Use the
    /// [`TryFrom`] implementation for unchecked bounds.
    pub(crate) fn new(start: u32, end: u32) -> Self {
        assert!(
            start >= 1 && start <= end,
            "invalid sequence range {start}:{end}"
        );
        Self { start, end }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    /// Return the number of messages covered by the range.
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.start <= seq && seq <= self.end
    }
}

impl TryFrom<(u32, u32)> for SeqRange {
    type Error = Error;

    fn try_from((start, end): (u32, u32)) -> Result<Self> {
        if start == 0 || start > end {
            return Err(Error::InvalidSeqRangeError(start, end));
        }

        Ok(Self { start, end })
    }
}

/// Uses the IMAP sequence set notation.
impl fmt::Display for SeqRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Split `1..=count` into at most `parts` contiguous ranges.
///
/// Ranges never overlap and their union is exactly `1..=count`. All
/// ranges have the same length, except the last one which absorbs
/// the remainder. There are never more ranges than messages: an
/// empty folder gives no range at all.
pub fn partition(count: u32, parts: NonZeroUsize) -> Vec<SeqRange> {
    if count == 0 {
        return Vec::new();
    }

    let parts = u32::try_from(parts.get()).unwrap_or(u32::MAX).min(count);
    let size = count / parts;

    (0..parts)
        .map(|n| {
            let start = n * size + 1;
            let end = if n + 1 == parts { count } else { start + size - 1 };
            SeqRange::new(start, end)
        })
        .collect()
}
