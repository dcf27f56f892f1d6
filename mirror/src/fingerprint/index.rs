//! # Fingerprint index
//!
//! Module dedicated to the set of source fingerprints. The index is
//! built once, before any deletion task starts, then shared
//! read-only between tasks.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::store::FetchedMessage;

use super::MessageFingerprint;

/// The fingerprint index.
///
/// Once built, the index is never mutated: it can be shared behind an
/// [`Arc`](std::sync::Arc) and queried concurrently without any lock.
#[derive(Clone, Debug, Default)]
pub struct FingerprintIndex {
    fingerprints: HashSet<MessageFingerprint>,
    skipped: usize,
}

impl FingerprintIndex {
    /// Build the index from the messages of the source folder.
    ///
    /// Messages whose fingerprint cannot be computed are left out of
    /// the index. They never prevent the index from being built.
    pub fn build<'a>(msgs: impl IntoIterator<Item = &'a FetchedMessage>) -> Self {
        let mut index = Self::default();

        for msg in msgs {
            match MessageFingerprint::compute(msg) {
                Ok(fingerprint) => {
                    index.fingerprints.insert(fingerprint);
                }
                Err(err) => {
                    trace!("skipping source message: {err}");
                    index.skipped += 1;
                }
            }
        }

        debug!(
            len = index.len(),
            skipped = index.skipped,
            "built fingerprint index"
        );

        index
    }

    /// Return `true` if the given fingerprint belongs to the source
    /// folder.
    pub fn contains(&self, fingerprint: &MessageFingerprint) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    /// Return the number of distinct fingerprints.
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Return the number of source messages left out of the index
    /// because their fingerprint could not be computed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl FromIterator<MessageFingerprint> for FingerprintIndex {
    fn from_iter<T: IntoIterator<Item = MessageFingerprint>>(iter: T) -> Self {
        Self {
            fingerprints: HashSet::from_iter(iter),
            skipped: 0,
        }
    }
}
