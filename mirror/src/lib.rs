//! Rust library to reconcile a mirrored mail folder with its source.
//!
//! The main purpose of this library is to remove, from a target
//! folder, every message that has no counterpart in a source folder.
//! It is the cleanup phase of a mailbox mirroring tool: connecting to
//! the stores, listing folders and copying messages are left to the
//! caller, which exposes its stores through the
//! [`MailStore`](crate::store::MailStore) trait.
//!
//! Messages are identified by a
//! [`MessageFingerprint`](crate::fingerprint::MessageFingerprint)
//! computed from a few structural headers. The fingerprints of the
//! source folder are gathered once into a
//! [`FingerprintIndex`](crate::fingerprint::FingerprintIndex), then
//! the target folder is split into ranges processed in parallel by a
//! pool of [`RangeDeletionTask`](crate::reconcile::RangeDeletionTask)s,
//! each one using its own session.
//!
//! See [`ReconcileBuilder`](crate::reconcile::ReconcileBuilder) and
//! the integration tests in the /tests folder.

mod error;
pub mod fingerprint;
pub mod reconcile;
pub mod store;
pub mod thread_pool;

#[doc(inline)]
pub use self::{
    error::{AnyBoxedError, AnyError, AnyResult},
    reconcile::{ReconcileBuilder, ReconcileConfig, ReconcileReport},
};
