//! Listing and dataset cache.
//!
//! The cache is a soft dependency: every store failure is logged and
//! degrades to a miss (reads) or a no-op (writes, invalidations).

mod backend;
mod kv;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use drive_storage_core::path::{ancestors, normalize_path};
use drive_storage_core::ListingResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

pub use backend::CachedBackend;
pub use kv::KvCacheStore;
pub use memory::MemoryCacheStore;

/// Rows of an external tabular dataset, one JSON object per row.
pub type DatasetRows = Vec<serde_json::Map<String, serde_json::Value>>;

/// Errors raised by cache stores. Never surfaced past `ListingCache`.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// Key-value store with per-entry TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Cache of backend listings and of external datasets.
pub struct ListingCache {
    store: Option<Arc<dyn CacheStore>>,
    default_ttl: Duration,
    /// Per-path listing keys written by this process, for `clear_backend`
    path_keys: DashSet<String>,
}

impl ListingCache {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        info!(
            "Listing cache enabled ({} store, TTL {}s)",
            store.name(),
            default_ttl.as_secs()
        );
        Self {
            store: Some(store),
            default_ttl,
            path_keys: DashSet::new(),
        }
    }

    /// A cache that always misses.
    pub fn disabled() -> Self {
        Self {
            store: None,
            default_ttl: Duration::ZERO,
            path_keys: DashSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    fn listing_key(backend_id: &str, path: Option<&str>) -> String {
        match path.map(normalize_path).filter(|p| !p.is_empty()) {
            Some(path) => format!("list:{}:{}", backend_id, path),
            None => format!("list:{}", backend_id),
        }
    }

    fn dataset_key(dataset_id: &str) -> String {
        format!("dataset:{}", dataset_id)
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let store = self.store.as_ref()?;
        let raw = match store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("Cache miss for key: {}", key);
                return None;
            }
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!("Cache hit for key: {}", key);
                Some(value)
            }
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let raw = match serde_json::to_string(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cache write skipped for {}: {}", key, e);
                return;
            }
        };

        let ttl = ttl.unwrap_or(self.default_ttl);
        match store.set(key, raw, ttl).await {
            Ok(()) => debug!("Cached data for key: {} (TTL: {}s)", key, ttl.as_secs()),
            Err(e) => warn!("Cache write failed for {}: {}", key, e),
        }
    }

    async fn delete(&self, key: &str) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if let Err(e) = store.delete(key).await {
            warn!("Cache delete failed for {}: {}", key, e);
        }
    }

    /// Cached listing for a backend (`path = None` is the whole backend).
    pub async fn get_listing(&self, backend_id: &str, path: Option<&str>) -> Option<ListingResult> {
        self.get_json(&Self::listing_key(backend_id, path)).await
    }

    pub async fn set_listing(
        &self,
        backend_id: &str,
        path: Option<&str>,
        listing: &ListingResult,
        ttl: Option<Duration>,
    ) {
        let key = Self::listing_key(backend_id, path);
        if path.is_some() && self.is_enabled() {
            self.path_keys.insert(key.clone());
        }
        self.set_json(&key, listing, ttl).await;
    }

    /// Drop the whole-backend listing, plus the keys for `path` and its ancestors.
    pub async fn invalidate_listing(&self, backend_id: &str, path: Option<&str>) {
        if !self.is_enabled() {
            return;
        }

        let mut keys = vec![Self::listing_key(backend_id, None)];
        if let Some(path) = path {
            keys.extend(
                ancestors(&normalize_path(path))
                    .iter()
                    .map(|p| Self::listing_key(backend_id, Some(p))),
            );
        }

        for key in &keys {
            self.delete(key).await;
            self.path_keys.remove(key);
        }
        debug!(
            "Invalidated cache for backend: {}, path: {}",
            backend_id,
            path.unwrap_or("all")
        );
    }

    /// Drop every listing key for a backend known to this process.
    pub async fn clear_backend(&self, backend_id: &str) {
        if !self.is_enabled() {
            return;
        }

        let prefix = format!("{}:", Self::listing_key(backend_id, None));
        let mut keys: Vec<String> = self
            .path_keys
            .iter()
            .filter(|k| k.starts_with(&prefix))
            .map(|k| k.clone())
            .collect();
        keys.push(Self::listing_key(backend_id, None));

        for key in &keys {
            self.delete(key).await;
            self.path_keys.remove(key);
        }
        info!("Cleared {} cache entries for backend: {}", keys.len(), backend_id);
    }

    pub async fn get_dataset(&self, dataset_id: &str) -> Option<DatasetRows> {
        self.get_json(&Self::dataset_key(dataset_id)).await
    }

    pub async fn set_dataset(&self, dataset_id: &str, rows: &DatasetRows, ttl: Option<Duration>) {
        self.set_json(&Self::dataset_key(dataset_id), rows, ttl).await;
    }

    pub async fn invalidate_dataset(&self, dataset_id: &str) {
        self.delete(&Self::dataset_key(dataset_id)).await;
    }
}
