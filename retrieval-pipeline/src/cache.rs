use std::{sync::Arc, time::Duration};

use common::{
    error::AppError,
    storage::{
        store::{CacheStore, CorpusCatalog},
        types::CacheEntry,
    },
    utils::{
        retry::{call_with_retry, RetryPolicy},
        text::{content_hash, normalize_query},
    },
};
use tracing::{debug, instrument, warn};

/// Stable key for a cacheable question. Any change to the normalized query,
/// the retrieval configuration or the corpus yields a different key.
pub fn compute_fingerprint(query: &str, config_version: &str, corpus_version: u64) -> String {
    let normalized = normalize_query(query);
    content_hash(&format!("{normalized}\u{1f}{config_version}\u{1f}{corpus_version}"))
}

/// Tag grouping every answer built against one corpus version.
pub fn corpus_tag(corpus_version: u64) -> String {
    format!("corpus:{corpus_version}")
}

/// Finished answers keyed by fingerprint, backed by a [`CacheStore`].
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    catalog: Arc<dyn CorpusCatalog>,
    ttl: Duration,
    config_version: String,
    retry: RetryPolicy,
}

impl ResponseCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        catalog: Arc<dyn CorpusCatalog>,
        ttl: Duration,
        config_version: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            ttl,
            config_version: config_version.into(),
            retry,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn config_version(&self) -> &str {
        &self.config_version
    }

    /// Reads the corpus version the fingerprint must be built against.
    pub async fn current_corpus_version(&self) -> Result<u64, AppError> {
        call_with_retry(&self.retry, "catalog.corpus_version", || {
            self.catalog.corpus_version()
        })
        .await
        .map_err(|err| AppError::RetrievalUnavailable(err.to_string()))
    }

    pub fn fingerprint(&self, query: &str, corpus_version: u64) -> String {
        compute_fingerprint(query, &self.config_version, corpus_version)
    }

    /// A store failure reads as a miss; the request then regenerates.
    #[instrument(skip_all, fields(fingerprint = %short(fingerprint)))]
    pub async fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        match call_with_retry(&self.retry, "cache.get", || self.store.get(fingerprint)).await {
            Ok(Some(entry)) if entry.is_expired(chrono::Utc::now()) => None,
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "cache read failed; treating as miss");
                None
            }
        }
    }

    #[instrument(skip_all, fields(fingerprint = %short(fingerprint), corpus_version = entry.corpus_version))]
    pub async fn put(&self, fingerprint: &str, entry: CacheEntry) -> Result<(), AppError> {
        let tag = corpus_tag(entry.corpus_version);
        call_with_retry(&self.retry, "cache.set", || {
            self.store.set(fingerprint, entry.clone(), self.ttl, &tag)
        })
        .await?;
        debug!("answer cached");
        Ok(())
    }

    /// Drops every answer built against `corpus_version`.
    #[instrument(skip_all, fields(corpus_version))]
    pub async fn invalidate_all_for_corpus_version(
        &self,
        corpus_version: u64,
    ) -> Result<usize, AppError> {
        let tag = corpus_tag(corpus_version);
        let cleared = call_with_retry(&self.retry, "cache.clear_by_tag", || {
            self.store.clear_by_tag(&tag)
        })
        .await?;
        debug!(cleared, "cached answers invalidated");
        Ok(cleared)
    }
}

/// Fingerprint prefix for log lines.
pub fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
