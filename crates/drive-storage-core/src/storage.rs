use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::path::{file_slug, generate_slug, last_segment};

/// Kind of a listed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    File,
    Folder,
}

/// A file or folder in a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageItem {
    /// Backend-relative path, slash-separated, no leading/trailing slash
    pub path: String,
    /// Last path segment
    pub name: String,
    /// Display slug derived from `name`; not unique
    pub slug: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Size in bytes (0 for folders)
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "last_modified")]
    pub modified_at: DateTime<Utc>,
    /// Folder inferred from file prefixes rather than materialized
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub implicit: bool,
}

impl StorageItem {
    /// Build a file entry, deriving name and slug from `path`.
    pub fn file(path: impl Into<String>, size_bytes: u64, modified_at: DateTime<Utc>) -> Self {
        let path = path.into();
        let name = last_segment(&path).to_string();
        Self {
            slug: file_slug(&name),
            name,
            path,
            kind: ItemKind::File,
            size_bytes,
            modified_at,
            implicit: false,
        }
    }

    /// Build an explicit folder entry.
    pub fn folder(path: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        let path = path.into();
        let name = last_segment(&path).to_string();
        Self {
            slug: generate_slug(&name),
            name,
            path,
            kind: ItemKind::Folder,
            size_bytes: 0,
            modified_at,
            implicit: false,
        }
    }

    /// Build a folder entry that exists only as a key prefix.
    pub fn implicit_folder(path: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        Self {
            implicit: true,
            ..Self::folder(path, modified_at)
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }
}

/// Result of listing a whole backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingResult {
    pub items: Vec<StorageItem>,
    /// Folder paths implied by file keys (always empty for the local backend)
    #[serde(default)]
    pub implicit_folders: BTreeSet<String>,
}

/// Outcome of a successful `put`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFileInfo {
    pub filename: String,
    /// Canonical stored path
    pub path: String,
    pub slug: String,
    /// Destination folder, `/` for the backend root
    pub folder: String,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the stored content
    pub sha256: String,
    /// Backend tag (`s3`, `local`)
    pub backend: String,
}

/// Hex SHA-256 digest of a payload.
pub fn content_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Uniform file/folder storage over heterogeneous backends.
///
/// All paths are backend-relative and normalized by the implementation, so
/// callers may pass user input directly.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend tag used in responses (`s3`, `local`).
    fn backend_name(&self) -> &'static str;

    /// Stable identifier of this backend instance, used for cache keys.
    fn backend_id(&self) -> String;

    /// Write `content` to `folder_path/filename`, creating missing folders.
    async fn put(
        &self,
        content: Bytes,
        folder_path: &str,
        filename: &str,
    ) -> Result<StoredFileInfo, StorageError>;

    /// Delete a single file. Fails with `NotFound` if it does not exist.
    async fn delete_file(&self, path: &str) -> Result<(), StorageError>;

    /// Recursively delete a folder. Fails with `NotFound` if there is nothing to delete.
    async fn delete_folder(&self, path: &str) -> Result<(), StorageError>;

    /// Create a folder. Creating an existing folder is not an error.
    async fn create_folder(&self, path: &str) -> Result<(), StorageError>;

    /// Enumerate every item in the backend.
    async fn list_all(&self) -> Result<ListingResult, StorageError>;
}
