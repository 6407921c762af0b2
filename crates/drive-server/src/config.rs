use std::time::Duration;

use clap::{Parser, ValueEnum};
use drive_storage_s3::S3ClientOptions;

use crate::provision::FolderTemplate;

/// Which store backs the listing cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackendKind {
    /// Shared Cloudflare KV namespace
    Kv,
    /// In-process cache
    Memory,
    /// No caching
    None,
}

/// Configuration for the drive-server.
#[derive(Parser, Debug, Clone)]
#[command(name = "drive-server")]
#[command(about = "Folder upload service with progress tracking and processed-folder provisioning")]
pub struct Config {
    /// TCP host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// TCP port to bind to
    #[arg(long, default_value = "8000", env = "PORT")]
    pub port: u16,

    /// S3 access key ID (object store mode needs key, secret and bucket)
    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    pub aws_access_key_id: Option<String>,

    /// S3 secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY")]
    pub aws_secret_access_key: Option<String>,

    /// S3 bucket name
    #[arg(long, env = "AWS_S3_BUCKET_NAME")]
    pub aws_s3_bucket: Option<String>,

    /// S3 region
    #[arg(long, default_value = "us-east-1", env = "AWS_REGION")]
    pub aws_region: String,

    /// Custom S3-compatible endpoint (R2, MinIO)
    #[arg(long, env = "S3_ENDPOINT_URL")]
    pub s3_endpoint_url: Option<String>,

    /// Root directory for the local backend
    #[arg(long, default_value = "uploads", env = "UPLOAD_FOLDER")]
    pub upload_folder: String,

    /// Top-level folder whose uploads trigger provisioning
    #[arg(long, default_value = "accepted_invites", env = "ROOT_INVITES")]
    pub root_invites: String,

    /// Top-level folder receiving provisioned project trees
    #[arg(long, default_value = "accepted_processed", env = "ROOT_PROCESSED")]
    pub root_processed: String,

    /// Provisioned folder suffixes, `;`-separated (empty entry = project root)
    #[arg(long, env = "FOLDER_TEMPLATE")]
    pub folder_template: Option<String>,

    /// Listing cache TTL (seconds)
    #[arg(long, default_value = "600", env = "CACHE_TTL_SECS")]
    pub cache_ttl_secs: u64,

    /// Listing cache store
    #[arg(long, value_enum, default_value = "memory", env = "CACHE_BACKEND")]
    pub cache_backend: CacheBackendKind,

    /// Cloudflare account ID (KV cache store)
    #[arg(long, env = "CLOUDFLARE_ACCOUNT_ID")]
    pub cloudflare_account_id: Option<String>,

    /// Cloudflare API token (KV cache store)
    #[arg(long, env = "CLOUDFLARE_API_TOKEN")]
    pub cloudflare_api_token: Option<String>,

    /// KV namespace ID (KV cache store)
    #[arg(long, env = "KV_NAMESPACE_ID")]
    pub kv_namespace_id: Option<String>,

    /// Bearer token required on /api routes (gate disabled when unset)
    #[arg(long, env = "API_TOKEN")]
    pub api_token: Option<String>,

    /// Maximum request body size for uploads (MiB)
    #[arg(long, default_value = "512", env = "MAX_UPLOAD_MB")]
    pub max_upload_mb: usize,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Config {
    /// Object store settings, present only when key, secret and bucket are all non-empty.
    pub fn s3_options(&self) -> Option<(S3ClientOptions, String)> {
        let access_key_id = non_empty(&self.aws_access_key_id)?;
        let secret_access_key = non_empty(&self.aws_secret_access_key)?;
        let bucket = non_empty(&self.aws_s3_bucket)?;

        Some((
            S3ClientOptions {
                access_key_id: access_key_id.to_string(),
                secret_access_key: secret_access_key.to_string(),
                region: self.aws_region.clone(),
                endpoint_url: non_empty(&self.s3_endpoint_url).map(str::to_string),
            },
            bucket.to_string(),
        ))
    }

    /// KV credentials as (account_id, namespace_id, api_token).
    pub fn kv_credentials(&self) -> Option<(String, String, String)> {
        Some((
            non_empty(&self.cloudflare_account_id)?.to_string(),
            non_empty(&self.kv_namespace_id)?.to_string(),
            non_empty(&self.cloudflare_api_token)?.to_string(),
        ))
    }

    pub fn folder_template(&self) -> FolderTemplate {
        match self.folder_template.as_deref() {
            Some(list) if !list.trim().is_empty() => FolderTemplate::parse(list),
            _ => FolderTemplate::default(),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn api_token(&self) -> Option<String> {
        non_empty(&self.api_token).map(str::to_string)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}
