//! Batched multi-file upload with progress reporting and the post-upload
//! provisioning hook.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use drive_storage_core::path::{last_segment, normalize_path};
use drive_storage_core::StorageBackend;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::progress::ProgressBroadcaster;
use crate::provision::FolderProvisioner;

/// Files uploaded concurrently per batch.
pub const UPLOAD_BATCH_SIZE: usize = 5;
/// Upload phase occupies 0..=85 of the progress bar.
pub const UPLOAD_PROGRESS_CEILING: u8 = 85;
pub const PROVISION_PROGRESS_START: u8 = 86;
pub const PROVISION_PROGRESS_END: u8 = 100;

/// One file of a batch.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub content: Bytes,
    /// Destination folder, backend-relative
    pub folder_path: String,
    /// Client-side name, possibly carrying sub-path segments
    pub original_filename: String,
}

impl UploadTask {
    pub fn new(
        content: impl Into<Bytes>,
        folder_path: impl Into<String>,
        original_filename: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            folder_path: folder_path.into(),
            original_filename: original_filename.into(),
        }
    }

    /// Name the file is stored under.
    pub fn stored_filename(&self) -> &str {
        last_segment(&self.original_filename)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSuccess {
    pub filename: String,
    pub path: String,
    pub slug: String,
    /// Destination folder exactly as requested
    pub folder: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadFailure {
    #[serde(rename = "file")]
    pub filename: String,
    pub error: String,
}

/// Per-file outcomes of a batch, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadBatchResult {
    pub successes: Vec<UploadSuccess>,
    pub failures: Vec<UploadFailure>,
}

/// A finished batch plus the handle of the provisioning hook, if one was spawned.
pub struct BatchUpload {
    pub result: UploadBatchResult,
    pub hook: Option<JoinHandle<()>>,
}

/// Percent reported after `done` of `total` uploads have settled.
pub fn upload_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return UPLOAD_PROGRESS_CEILING;
    }
    let scaled = (done as f64 / total as f64 * f64::from(UPLOAD_PROGRESS_CEILING)).round() as u8;
    scaled.clamp(2, UPLOAD_PROGRESS_CEILING)
}

pub struct UploadOrchestrator {
    storage: Arc<dyn StorageBackend>,
    progress: Arc<ProgressBroadcaster>,
    provisioner: Arc<FolderProvisioner>,
    intake_root: String,
    batch_size: usize,
}

impl UploadOrchestrator {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        progress: Arc<ProgressBroadcaster>,
        provisioner: Arc<FolderProvisioner>,
        intake_root: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            progress,
            provisioner,
            intake_root: normalize_path(&intake_root.into()),
            batch_size: UPLOAD_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Project name when `folder_path` lies under `<intake_root>/<project>`.
    pub fn intake_project(&self, folder_path: &str) -> Option<String> {
        let folder = normalize_path(folder_path);
        let mut parts = folder.split('/');
        match (parts.next(), parts.next()) {
            (Some(root), Some(project)) if root == self.intake_root => Some(project.to_string()),
            _ => None,
        }
    }

    /// Upload every task, batch by batch, and return once all have settled.
    ///
    /// Per-file failures are collected, never raised. The provisioning hook
    /// (if any) is spawned before returning and is not awaited.
    #[instrument(skip(self, tasks), fields(files = tasks.len()))]
    pub async fn upload_batch(
        &self,
        tasks: Vec<UploadTask>,
        channel_id: Option<String>,
    ) -> BatchUpload {
        let total = tasks.len();
        let channel = channel_id.as_deref().filter(|id| !id.is_empty());
        info!("Starting upload of {} files", total);

        if total == 0 {
            return BatchUpload {
                result: UploadBatchResult::default(),
                hook: None,
            };
        }

        self.progress
            .send_progress(channel, format!("Starting upload of {} files", total), 1);

        let completed = AtomicUsize::new(0);
        let mut result = UploadBatchResult::default();

        for batch in tasks.chunks(self.batch_size) {
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|task| self.upload_one(task, &completed, total, channel)),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    Ok(success) => result.successes.push(success),
                    Err(failure) => result.failures.push(failure),
                }
            }
        }

        let succeeded = result.successes.len();
        let failed = result.failures.len();
        info!("Upload complete: {} success, {} errors", succeeded, failed);
        self.progress.send_progress(
            channel,
            format!("Uploaded {} files ({} failed)", succeeded, failed),
            UPLOAD_PROGRESS_CEILING,
        );

        if succeeded == 0 {
            self.progress.send_error(
                channel,
                "Upload failed",
                Some(format!("All {} files failed to upload", total)),
            );
            return BatchUpload { result, hook: None };
        }

        let hook = match self.intake_project(&tasks[0].folder_path) {
            Some(project) => Some(self.spawn_provisioning(
                project,
                succeeded,
                channel.map(str::to_string),
            )),
            None => {
                self.progress.send_progress(channel, "Upload complete", PROVISION_PROGRESS_END);
                self.progress.send_complete(
                    channel,
                    "Upload complete",
                    Some(json!({ "total_files": succeeded, "failed": failed })),
                );
                None
            }
        };

        BatchUpload { result, hook }
    }

    async fn upload_one(
        &self,
        task: &UploadTask,
        completed: &AtomicUsize,
        total: usize,
        channel: Option<&str>,
    ) -> Result<UploadSuccess, UploadFailure> {
        let filename = task.stored_filename();
        debug!(
            "Uploading: {} -> {} to {}",
            task.original_filename, filename, task.folder_path
        );

        let outcome = self
            .storage
            .put(task.content.clone(), &task.folder_path, filename)
            .await;

        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;

        match outcome {
            Ok(info) => {
                self.progress.send_progress(
                    channel,
                    format!("Uploaded {} ({}/{})", filename, done, total),
                    upload_percent(done, total),
                );
                Ok(UploadSuccess {
                    filename: info.filename,
                    path: info.path,
                    slug: info.slug,
                    folder: task.folder_path.clone(),
                    size: info.size_bytes,
                })
            }
            Err(e) => {
                warn!("Failed to upload {}: {}", filename, e);
                self.progress.send_progress(
                    channel,
                    format!("Failed {} ({}/{})", filename, done, total),
                    upload_percent(done, total),
                );
                Err(UploadFailure {
                    filename: filename.to_string(),
                    error: e.to_string(),
                })
            }
        }
    }

    fn spawn_provisioning(
        &self,
        project: String,
        total_files: usize,
        channel: Option<String>,
    ) -> JoinHandle<()> {
        let provisioner = self.provisioner.clone();
        let progress = self.progress.clone();
        info!("Scheduling folder provisioning for project: {}", project);

        tokio::spawn(async move {
            let channel = channel.as_deref();
            match provisioner
                .provision(&project, channel, PROVISION_PROGRESS_START, PROVISION_PROGRESS_END)
                .await
            {
                Ok(folders_created) => {
                    info!("Provisioned {} folders for project: {}", folders_created, project);
                    progress.send_complete(
                        channel,
                        format!("Upload complete, folders ready for {}", project),
                        Some(json!({
                            "project_name": project,
                            "total_files": total_files,
                            "folders_created": folders_created,
                        })),
                    );
                }
                Err(e) => {
                    error!("Failed to create processed folder structure for {}: {}", project, e);
                    progress.send_error(
                        channel,
                        format!("Failed to create folder structure for {}", project),
                        Some(e.to_string()),
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::FolderTemplate;
    use drive_storage_local::LocalDiskBackend;
    use tempfile::TempDir;

    #[test]
    fn test_upload_percent() {
        assert_eq!(upload_percent(0, 10), 2);
        assert_eq!(upload_percent(1, 100), 2);
        assert_eq!(upload_percent(1, 2), 43);
        assert_eq!(upload_percent(3, 7), 36);
        assert_eq!(upload_percent(7, 7), 85);
    }

    #[test]
    fn test_stored_filename_drops_subpath() {
        let task = UploadTask::new(Bytes::new(), "a", "sub/dir/report.pdf");
        assert_eq!(task.stored_filename(), "report.pdf");
    }

    #[test]
    fn test_intake_project() {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn StorageBackend> =
            Arc::new(LocalDiskBackend::open(dir.path()).unwrap());
        let progress = Arc::new(ProgressBroadcaster::new());
        let provisioner = Arc::new(FolderProvisioner::new(
            storage.clone(),
            progress.clone(),
            "accepted_processed",
            FolderTemplate::default(),
        ));
        let orchestrator =
            UploadOrchestrator::new(storage, progress, provisioner, "accepted_invites");

        assert_eq!(
            orchestrator.intake_project("/accepted_invites/ProjectX/drawings"),
            Some("ProjectX".to_string())
        );
        assert_eq!(
            orchestrator.intake_project("accepted_invites/ProjectX"),
            Some("ProjectX".to_string())
        );
        assert_eq!(orchestrator.intake_project("accepted_invites"), None);
        assert_eq!(orchestrator.intake_project("other/ProjectX"), None);
        assert_eq!(orchestrator.intake_project(""), None);
    }
}
