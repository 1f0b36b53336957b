//! Proxy coordinator tying the store, freshness policy and upstream together
//!
//! One call, `get`, answers every request: serve the cached payload while it
//! is fresh, refresh it from upstream when it is stale or missing, and fall
//! back to the stale payload when the upstream is down. Concurrent requests
//! for the same identifier share a single upstream fetch.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::freshness::{Clock, FreshnessPolicy, SystemClock};
use crate::record::{CacheRecord, Value};
use crate::store::{CacheStore, ScriptId, StoreError};
use crate::upstream::{FetchError, UpstreamFetcher};

/// Errors surfaced to callers of `ProxyCoordinator::get`
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The upstream fetch failed and no cached record exists to fall back on
    #[error("Upstream fetch failed with no cached fallback: {0}")]
    UpstreamUnavailable(#[source] FetchError),

    /// Cache storage failed
    #[error("Cache storage failed: {0}")]
    Store(#[from] StoreError),
}

/// Serves cached market payloads, refreshing them from upstream as needed
///
/// The coordinator is shared behind `Arc` and all operations take `&self`.
/// Per-identifier locks keep concurrent refreshes of the same identifier
/// down to one upstream fetch; different identifiers never contend.
pub struct ProxyCoordinator {
    store: CacheStore,
    policy: FreshnessPolicy,
    fetcher: Arc<dyn UpstreamFetcher>,
    clock: Arc<dyn Clock>,
    inflight: Mutex<HashMap<ScriptId, Arc<Mutex<()>>>>,
}

impl ProxyCoordinator {
    /// Creates a coordinator using the system clock
    pub fn new(
        store: CacheStore,
        policy: FreshnessPolicy,
        fetcher: Arc<dyn UpstreamFetcher>,
    ) -> Self {
        Self::with_clock(store, policy, fetcher, Arc::new(SystemClock))
    }

    /// Creates a coordinator with a custom clock
    pub fn with_clock(
        store: CacheStore,
        policy: FreshnessPolicy,
        fetcher: Arc<dyn UpstreamFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy,
            fetcher,
            clock,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the payload for an identifier
    ///
    /// A fresh cached record is served as-is. Otherwise the record is
    /// refreshed from upstream and persisted; if the fetch fails but a stale
    /// record exists, the stale payload is served instead. Only when there
    /// is nothing to serve does the upstream failure surface.
    pub async fn get(&self, id: &ScriptId) -> Result<Value, ProxyError> {
        let now = self.clock.unix_seconds();
        if let Some(record) = self.read_record(id)? {
            if self.policy.is_fresh(record.cached_at, now) {
                debug!(id = %id, "Serving fresh cached record");
                return Ok(record.payload);
            }
        }

        let lock = {
            let mut map = self.inflight.lock().await;
            Arc::clone(
                map.entry(id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let result = {
            let _guard = lock.lock().await;
            self.refresh(id).await
        };

        drop(lock);
        self.release_inflight(id).await;

        result
    }

    /// Refreshes one identifier; the caller holds its in-flight lock
    async fn refresh(&self, id: &ScriptId) -> Result<Value, ProxyError> {
        // A concurrent caller may have refreshed while we waited on the lock
        let now = self.clock.unix_seconds();
        let stored = self.read_record(id)?;
        if let Some(record) = &stored {
            if self.policy.is_fresh(record.cached_at, now) {
                debug!(id = %id, "Record refreshed by a concurrent request");
                return Ok(record.payload.clone());
            }
        }

        match self.fetcher.fetch(id).await {
            Ok(payload) => {
                let record = CacheRecord::new(self.clock.unix_seconds(), payload);
                if let Err(err) = self.store.write(id, &record) {
                    // Serving the payload beats failing the request; the next
                    // miss will retry the write
                    error!(id = %id, error = %err, "Failed to persist refreshed record");
                }
                debug!(id = %id, "Refreshed record from upstream");
                Ok(record.payload)
            }
            Err(err) => match stored {
                Some(record) => {
                    warn!(id = %id, error = %err, "Upstream fetch failed, serving stale record");
                    Ok(record.payload)
                }
                None => Err(ProxyError::UpstreamUnavailable(err)),
            },
        }
    }

    /// Reads the stored record, treating a corrupt file as a miss
    ///
    /// A corrupt record cannot be served even as a stale fallback, so it is
    /// logged and overwritten by the next successful fetch.
    fn read_record(&self, id: &ScriptId) -> Result<Option<CacheRecord>, ProxyError> {
        match self.store.read(id) {
            Ok(record) => Ok(record),
            Err(err @ StoreError::Corrupt { .. }) => {
                warn!(id = %id, error = %err, "Cache record is corrupt, treating as a miss");
                Ok(None)
            }
            Err(err) => Err(ProxyError::Store(err)),
        }
    }

    /// Drops an identifier's in-flight lock once nobody else holds it
    async fn release_inflight(&self, id: &ScriptId) {
        let mut map = self.inflight.lock().await;
        if let Some(entry) = map.get(id) {
            if Arc::strong_count(entry) == 1 {
                map.remove(id);
            }
        }
    }
}
