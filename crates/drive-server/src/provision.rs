//! Processed-folder provisioning for intake projects.

use std::sync::Arc;

use drive_storage_core::path::{join_path, normalize_path};
use drive_storage_core::{StorageBackend, StorageError};
use tracing::{debug, error, info, instrument};

use crate::progress::ProgressBroadcaster;

const DEFAULT_TEMPLATE: &[&str] = &[
    "",
    "0 ITB's & Plan Link",
    "1 Bid Docs",
    "1 Bid Docs/01 - Bid",
    "1 Bid Docs/01 - Bid/00-TE Extracted Drawings",
    "1 Bid Docs/01 - Bid/00-TE Extracted Drawings/00 LC Drawings",
    "1 Bid Docs/01 - Bid/01-TE Extracted Specifications",
    "2 Electrical",
    "3 Telecomm",
    "4 NDA",
];

/// Ordered folder suffixes created under each project. `""` is the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderTemplate {
    suffixes: Vec<String>,
}

impl Default for FolderTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE.iter().copied())
    }
}

impl FolderTemplate {
    /// Build a template, normalizing each suffix and dropping repeats.
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for suffix in suffixes {
            let suffix = normalize_path(suffix.as_ref().trim());
            if !normalized.contains(&suffix) {
                normalized.push(suffix);
            }
        }
        Self {
            suffixes: normalized,
        }
    }

    /// Parse a `;`-separated suffix list.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(';'))
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    /// Full folder paths for `project` under `root`, in template order.
    pub fn folders_for(&self, root: &str, project: &str) -> Vec<String> {
        let project_root = join_path(root, project);
        self.suffixes
            .iter()
            .map(|suffix| join_path(&project_root, suffix))
            .collect()
    }
}

/// Creates the processed-folder tree for a project.
pub struct FolderProvisioner {
    storage: Arc<dyn StorageBackend>,
    progress: Arc<ProgressBroadcaster>,
    processed_root: String,
    template: FolderTemplate,
}

impl FolderProvisioner {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        progress: Arc<ProgressBroadcaster>,
        processed_root: impl Into<String>,
        template: FolderTemplate,
    ) -> Self {
        Self {
            storage,
            progress,
            processed_root: processed_root.into(),
            template,
        }
    }

    pub fn processed_root(&self) -> &str {
        &self.processed_root
    }

    pub fn template(&self) -> &FolderTemplate {
        &self.template
    }

    /// Create every template folder for `project`, one at a time.
    ///
    /// Progress moves from `start` to `end` and reaches `end` exactly once all
    /// folders exist. The first failing folder aborts the run. Returns the
    /// number of folders created.
    #[instrument(skip(self), level = "debug")]
    pub async fn provision(
        &self,
        project: &str,
        channel_id: Option<&str>,
        start: u8,
        end: u8,
    ) -> Result<usize, StorageError> {
        let folders = self.template.folders_for(&self.processed_root, project);
        let total = folders.len();
        let span = u32::from(end.saturating_sub(start));

        info!("Creating folder structure for project: {}", project);

        for (i, folder) in folders.iter().enumerate() {
            let percent = start + (i as u32 * span / total as u32) as u8;
            self.progress.send_progress(
                channel_id,
                format!("Creating folder {}/{}: {}", i + 1, total, folder),
                percent,
            );

            if let Err(e) = self.storage.create_folder(folder).await {
                error!("Failed to create folder {} for {}: {}", folder, project, e);
                return Err(e);
            }
            debug!("Created folder: {}", folder);
        }

        self.progress.send_progress(
            channel_id,
            format!("Folder structure ready for {}", project),
            end,
        );
        info!("Created {} folders for project: {}", total, project);
        Ok(total)
    }
}

/// Make sure the intake and processed roots exist.
pub async fn ensure_root_folders(
    storage: &dyn StorageBackend,
    roots: &[&str],
) -> Result<(), StorageError> {
    for root in roots {
        storage.create_folder(root).await?;
    }
    info!("Root folders ensured: {}", roots.join(", "));
    Ok(())
}
