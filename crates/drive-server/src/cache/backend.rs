use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use drive_storage_core::{ListingResult, StorageBackend, StorageError, StoredFileInfo};

use super::ListingCache;

/// Read-through listing cache in front of a backend.
///
/// Every mutation invalidates the affected listing keys before returning,
/// failed ones included (a folder delete can fail halfway through).
pub struct CachedBackend {
    inner: Arc<dyn StorageBackend>,
    cache: Arc<ListingCache>,
}

impl CachedBackend {
    pub fn new(inner: Arc<dyn StorageBackend>, cache: Arc<ListingCache>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.inner
    }

    async fn invalidate(&self, path: &str) {
        self.cache
            .invalidate_listing(&self.inner.backend_id(), Some(path))
            .await;
    }
}

#[async_trait]
impl StorageBackend for CachedBackend {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    fn backend_id(&self) -> String {
        self.inner.backend_id()
    }

    async fn put(
        &self,
        content: Bytes,
        folder_path: &str,
        filename: &str,
    ) -> Result<StoredFileInfo, StorageError> {
        let result = self.inner.put(content, folder_path, filename).await;
        self.invalidate(folder_path).await;
        result
    }

    async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        let result = self.inner.delete_file(path).await;
        self.invalidate(path).await;
        result
    }

    async fn delete_folder(&self, path: &str) -> Result<(), StorageError> {
        let result = self.inner.delete_folder(path).await;
        self.invalidate(path).await;
        result
    }

    async fn create_folder(&self, path: &str) -> Result<(), StorageError> {
        let result = self.inner.create_folder(path).await;
        self.invalidate(path).await;
        result
    }

    async fn list_all(&self) -> Result<ListingResult, StorageError> {
        let backend_id = self.inner.backend_id();
        if let Some(listing) = self.cache.get_listing(&backend_id, None).await {
            return Ok(listing);
        }

        let listing = self.inner.list_all().await?;
        self.cache.set_listing(&backend_id, None, &listing, None).await;
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use chrono::Utc;
    use drive_storage_core::path::join_path;
    use drive_storage_core::StorageItem;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Backend holding a flat list of file paths and counting listings.
    #[derive(Default)]
    struct CountingBackend {
        files: Mutex<Vec<String>>,
        listings: AtomicUsize,
    }

    #[async_trait]
    impl StorageBackend for CountingBackend {
        fn backend_name(&self) -> &'static str {
            "counting"
        }

        fn backend_id(&self) -> String {
            "counting:test".into()
        }

        async fn put(
            &self,
            content: Bytes,
            folder_path: &str,
            filename: &str,
        ) -> Result<StoredFileInfo, StorageError> {
            let path = join_path(folder_path, filename);
            self.files.lock().unwrap().push(path.clone());
            Ok(StoredFileInfo {
                filename: filename.into(),
                slug: filename.into(),
                folder: folder_path.into(),
                size_bytes: content.len() as u64,
                sha256: String::new(),
                backend: "counting".into(),
                path,
            })
        }

        async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
            let mut files = self.files.lock().unwrap();
            let before = files.len();
            files.retain(|f| f != path);
            if files.len() == before {
                return Err(StorageError::NotFound(path.into()));
            }
            Ok(())
        }

        async fn delete_folder(&self, path: &str) -> Result<(), StorageError> {
            let prefix = format!("{}/", path);
            self.files.lock().unwrap().retain(|f| !f.starts_with(&prefix));
            Ok(())
        }

        async fn create_folder(&self, _path: &str) -> Result<(), StorageError> {
            Ok(())
        }

        async fn list_all(&self) -> Result<ListingResult, StorageError> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            let items = self
                .files
                .lock()
                .unwrap()
                .iter()
                .map(|p| StorageItem::file(p.clone(), 1, Utc::now()))
                .collect();
            Ok(ListingResult {
                items,
                ..Default::default()
            })
        }
    }

    fn setup() -> (Arc<CountingBackend>, CachedBackend) {
        let inner = Arc::new(CountingBackend::default());
        let cache = Arc::new(ListingCache::new(
            Arc::new(MemoryCacheStore::new(100)),
            Duration::from_secs(60),
        ));
        let cached = CachedBackend::new(inner.clone(), cache);
        (inner, cached)
    }

    fn paths(listing: &ListingResult) -> Vec<&str> {
        listing.items.iter().map(|i| i.path.as_str()).collect()
    }

    #[tokio::test]
    async fn test_list_all_reads_through() {
        let (inner, cached) = setup();
        cached.list_all().await.unwrap();
        cached.list_all().await.unwrap();
        assert_eq!(inner.listings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mutations_invalidate() {
        let (inner, cached) = setup();
        assert!(cached.list_all().await.unwrap().items.is_empty());

        cached
            .put(Bytes::from_static(b"x"), "a/b", "file.txt")
            .await
            .unwrap();
        let listing = cached.list_all().await.unwrap();
        assert_eq!(paths(&listing), vec!["a/b/file.txt"]);

        cached.delete_file("a/b/file.txt").await.unwrap();
        assert!(cached.list_all().await.unwrap().items.is_empty());
        assert_eq!(inner.listings.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_mutation_still_invalidates() {
        let (inner, cached) = setup();
        cached.list_all().await.unwrap();

        assert!(cached.delete_file("missing.txt").await.unwrap_err().is_not_found());
        cached.list_all().await.unwrap();
        assert_eq!(inner.listings.load(Ordering::SeqCst), 2);
    }
}
