use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use drive_storage_core::path::{file_slug, join_path, last_segment, normalize_path, validate_relative};
use drive_storage_core::{
    content_digest, ListingResult, StorageBackend, StorageError, StorageItem, StoredFileInfo,
};
use tokio::fs;
use tracing::{debug, info, instrument};

/// Suffix of in-flight upload files; they are hidden from listings.
const TEMP_SUFFIX: &str = ".upload.tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Local filesystem storage backend.
///
/// Storage layout mirrors backend paths one-to-one:
/// ```text
/// {root}/
///   accepted_invites/
///     {project}/...
///   accepted_processed/
///     {project}/...
/// ```
#[derive(Debug, Clone)]
pub struct LocalDiskBackend {
    root: PathBuf,
}

impl LocalDiskBackend {
    /// Open (and create if needed) a backend rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            StorageError::Backend(format!(
                "Failed to create storage root {}: {}",
                root.display(),
                e
            ))
        })?;
        info!("Local storage initialized at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a backend path to an absolute filesystem path.
    fn resolve(&self, path: &str) -> Result<(String, PathBuf), StorageError> {
        let normalized = normalize_path(path);
        validate_relative(&normalized)?;
        let full = if normalized.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&normalized)
        };
        Ok((normalized, full))
    }

    fn temp_path(target: &Path, filename: &str) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        target.with_file_name(format!(".{}.{}{}", filename, n, TEMP_SUFFIX))
    }

    /// Relative, slash-separated path of `full` under the root.
    fn relative(&self, full: &Path) -> Option<String> {
        let rel = full.strip_prefix(&self.root).ok()?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        Some(rel)
    }
}

fn to_utc(time: std::io::Result<SystemTime>) -> DateTime<Utc> {
    time.map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl StorageBackend for LocalDiskBackend {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn backend_id(&self) -> String {
        format!("local:{}", self.root.display())
    }

    #[instrument(skip(self, content), level = "debug", fields(content_len = content.len()))]
    async fn put(
        &self,
        content: Bytes,
        folder_path: &str,
        filename: &str,
    ) -> Result<StoredFileInfo, StorageError> {
        let filename = last_segment(filename).to_string();
        if filename.is_empty() {
            return Err(StorageError::InvalidPath("empty filename".to_string()));
        }

        let (folder, folder_full) = self.resolve(folder_path)?;
        validate_relative(&filename)?;
        let relative_path = join_path(&folder, &filename);

        fs::create_dir_all(&folder_full).await.map_err(|e| {
            StorageError::Backend(format!(
                "Failed to create folder {}: {}",
                folder_full.display(),
                e
            ))
        })?;

        // Write via temp file so a failed upload never leaves a partial file behind
        let target = folder_full.join(&filename);
        let temp = Self::temp_path(&target, &filename);
        if let Err(e) = fs::write(&temp, &content).await {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::Backend(format!(
                "Failed to write {}: {}",
                relative_path, e
            )));
        }
        fs::rename(&temp, &target).await.map_err(|e| {
            StorageError::Backend(format!("Failed to move {} into place: {}", relative_path, e))
        })?;

        info!("Uploaded file locally: {}", relative_path);
        Ok(StoredFileInfo {
            slug: file_slug(&filename),
            filename,
            path: relative_path,
            folder: if folder.is_empty() { "/".to_string() } else { folder },
            size_bytes: content.len() as u64,
            sha256: content_digest(&content),
            backend: self.backend_name().to_string(),
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        let (normalized, full) = self.resolve(path)?;
        let is_file = fs::metadata(&full)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if normalized.is_empty() || !is_file {
            return Err(StorageError::NotFound(format!("File not found: {}", normalized)));
        }

        fs::remove_file(&full).await.map_err(|e| {
            StorageError::Backend(format!("Failed to delete file {}: {}", normalized, e))
        })?;
        info!("Deleted file locally: {}", normalized);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_folder(&self, path: &str) -> Result<(), StorageError> {
        let (normalized, full) = self.resolve(path)?;
        if normalized.is_empty() {
            return Err(StorageError::InvalidPath(
                "refusing to delete the storage root".to_string(),
            ));
        }
        let is_dir = fs::metadata(&full)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(StorageError::NotFound(format!("Folder not found: {}", normalized)));
        }

        fs::remove_dir_all(&full).await.map_err(|e| {
            StorageError::Backend(format!("Failed to delete folder {}: {}", normalized, e))
        })?;
        info!("Deleted folder locally: {}", normalized);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn create_folder(&self, path: &str) -> Result<(), StorageError> {
        let (normalized, full) = self.resolve(path)?;
        fs::create_dir_all(&full).await.map_err(|e| {
            StorageError::Backend(format!("Failed to create folder {}: {}", normalized, e))
        })?;
        debug!("Created folder locally: {}", normalized);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_all(&self) -> Result<ListingResult, StorageError> {
        let mut folders = Vec::new();
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                // The root may have been removed out from under us
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StorageError::Backend(format!(
                        "Failed to read directory {}: {}",
                        dir.display(),
                        e
                    )))
                }
            };

            while let Some(entry) = read_dir.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.ends_with(TEMP_SUFFIX) {
                    continue;
                }
                let metadata = match entry.metadata().await {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                let full = entry.path();
                let Some(relative) = self.relative(&full) else {
                    continue;
                };

                if metadata.is_dir() {
                    folders.push(StorageItem::folder(relative, to_utc(metadata.modified())));
                    pending.push(full);
                } else if metadata.is_file() {
                    files.push(StorageItem::file(
                        relative,
                        metadata.len(),
                        to_utc(metadata.modified()),
                    ));
                }
            }
        }

        folders.sort_by(|a, b| a.path.cmp(&b.path));
        files.sort_by(|a, b| a.path.cmp(&b.path));

        debug!(
            "Listed {} folders and {} files under {}",
            folders.len(),
            files.len(),
            self.root.display()
        );

        folders.extend(files);
        Ok(ListingResult {
            items: folders,
            implicit_folders: Default::default(),
        })
    }
}
