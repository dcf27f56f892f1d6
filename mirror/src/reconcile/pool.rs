//! # Reconciliation pool
//!
//! Module dedicated to the thread pool running deletion tasks. Every
//! thread shares the same read-only fingerprint index and the same
//! folder-level counters. Sessions are not part of the context: each
//! task opens its own.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    fingerprint::FingerprintIndex,
    store::MailStore,
    thread_pool::{ThreadPool, ThreadPoolBuilder, ThreadPoolContext, ThreadPoolContextBuilder},
    AnyResult,
};

use super::{
    report::{DeletionCounters, RangeReport},
    Error, Result,
};

/// Create a new thread pool dedicated to deletion tasks.
pub async fn new(
    store: Arc<dyn MailStore>,
    index: Arc<FingerprintIndex>,
    counters: Arc<DeletionCounters>,
    size: usize,
) -> Result<ThreadPool<ReconcilePoolContext, RangeReport>> {
    let pool_ctx_builder = ReconcilePoolContextBuilder::new(store, index, counters);

    let pool = ThreadPoolBuilder::new(pool_ctx_builder)
        .with_size(size)
        .build()
        .await
        .map_err(Error::BuildPoolError)?;

    Ok(pool)
}

#[derive(Clone)]
pub struct ReconcilePoolContextBuilder {
    store: Arc<dyn MailStore>,
    index: Arc<FingerprintIndex>,
    counters: Arc<DeletionCounters>,
}

impl ReconcilePoolContextBuilder {
    pub fn new(
        store: Arc<dyn MailStore>,
        index: Arc<FingerprintIndex>,
        counters: Arc<DeletionCounters>,
    ) -> Self {
        Self {
            store,
            index,
            counters,
        }
    }
}

#[async_trait]
impl ThreadPoolContextBuilder for ReconcilePoolContextBuilder {
    type Context = ReconcilePoolContext;

    async fn build(self) -> AnyResult<Self::Context> {
        Ok(Self::Context {
            store: self.store,
            index: self.index,
            counters: self.counters,
        })
    }
}

pub struct ReconcilePoolContext {
    pub store: Arc<dyn MailStore>,
    pub index: Arc<FingerprintIndex>,
    pub counters: Arc<DeletionCounters>,
}

impl ThreadPoolContext for ReconcilePoolContext {
    //
}
