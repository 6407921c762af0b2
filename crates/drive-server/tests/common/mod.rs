//! Shared fixtures for drive-server integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use drive_server::progress::{ProgressChannel, ProgressEvent};
use drive_storage_core::{ListingResult, StorageBackend, StorageError, StoredFileInfo};
use drive_storage_local::LocalDiskBackend;
use tempfile::TempDir;

/// Local backend that fails selected operations.
pub struct FlakyBackend {
    inner: LocalDiskBackend,
    /// `put` fails for this stored filename
    pub fail_put: Option<String>,
    /// `create_folder` fails for paths containing this fragment
    pub fail_create: Option<String>,
}

impl FlakyBackend {
    pub fn new(dir: &TempDir) -> Self {
        Self {
            inner: LocalDiskBackend::open(dir.path()).unwrap(),
            fail_put: None,
            fail_create: None,
        }
    }

    pub fn failing_put(mut self, filename: &str) -> Self {
        self.fail_put = Some(filename.to_string());
        self
    }

    pub fn failing_create(mut self, fragment: &str) -> Self {
        self.fail_create = Some(fragment.to_string());
        self
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
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
        if self.fail_put.as_deref() == Some(filename) {
            return Err(StorageError::Backend(format!("simulated failure for {}", filename)));
        }
        self.inner.put(content, folder_path, filename).await
    }

    async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        self.inner.delete_file(path).await
    }

    async fn delete_folder(&self, path: &str) -> Result<(), StorageError> {
        self.inner.delete_folder(path).await
    }

    async fn create_folder(&self, path: &str) -> Result<(), StorageError> {
        if let Some(fragment) = self.fail_create.as_deref() {
            if path.contains(fragment) {
                return Err(StorageError::Backend(format!("simulated failure for {}", path)));
            }
        }
        self.inner.create_folder(path).await
    }

    async fn list_all(&self) -> Result<ListingResult, StorageError> {
        self.inner.list_all().await
    }
}

pub fn local_backend(dir: &TempDir) -> Arc<dyn StorageBackend> {
    Arc::new(LocalDiskBackend::open(dir.path()).unwrap())
}

/// Everything currently queued on a progress channel.
pub fn drain(channel: &mut ProgressChannel) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = channel.receiver.try_recv() {
        events.push(event);
    }
    events
}

pub fn percents(events: &[ProgressEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Progress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect()
}

pub fn folder_paths(listing: &ListingResult) -> Vec<String> {
    listing
        .items
        .iter()
        .filter(|item| item.is_folder())
        .map(|item| item.path.clone())
        .chain(listing.implicit_folders.iter().cloned())
        .collect()
}
