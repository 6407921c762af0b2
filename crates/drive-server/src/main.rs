//! HTTP/WebSocket server for intake-drive.
//!
//! This server:
//! - Stores uploaded folder trees in an S3-compatible bucket or on local disk
//! - Streams per-file progress to WebSocket clients
//! - Provisions the processed-folder tree for intake projects
//! - Caches backend listings (Cloudflare KV or in-process)

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use drive_server::cache::{CacheStore, KvCacheStore, ListingCache, MemoryCacheStore};
use drive_server::config::{CacheBackendKind, Config};
use drive_server::handlers::{router, AppSettings, AppState, StorageInfo};
use drive_server::progress::ProgressBroadcaster;
use drive_server::provision::ensure_root_folders;
use drive_storage_core::StorageBackend;
use drive_storage_local::LocalDiskBackend;
use drive_storage_s3::ObjectStoreBackend;

const MEMORY_CACHE_CAPACITY: u64 = 10_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    info!("Starting drive-server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Host: {}", config.host);
    info!("  Port: {}", config.port);

    // Storage backend: S3 only when key, secret and bucket are all set
    let (backend, storage_info): (Arc<dyn StorageBackend>, StorageInfo) =
        match config.s3_options() {
            Some((options, bucket)) => {
                info!("  Storage: s3 (bucket {}, region {})", bucket, options.region);
                let client = options.build_client();
                let info = StorageInfo {
                    storage_type: "s3".into(),
                    bucket: Some(bucket.clone()),
                    region: Some(options.region.clone()),
                };
                let backend: Arc<dyn StorageBackend> =
                    Arc::new(ObjectStoreBackend::new(client, bucket));
                (backend, info)
            }
            None => {
                info!("  Storage: local ({})", config.upload_folder);
                let info = StorageInfo {
                    storage_type: "local".into(),
                    bucket: None,
                    region: None,
                };
                let backend: Arc<dyn StorageBackend> =
                    Arc::new(LocalDiskBackend::open(&config.upload_folder)?);
                (backend, info)
            }
        };

    // Listing cache
    let store: Option<Arc<dyn CacheStore>> = match config.cache_backend {
        CacheBackendKind::Kv => match config.kv_credentials() {
            Some((account_id, namespace_id, api_token)) => {
                info!("  Cache: kv (namespace {})", namespace_id);
                Some(Arc::new(KvCacheStore::new(&account_id, &namespace_id, api_token)?) as _)
            }
            None => {
                warn!("  Cache: DISABLED (kv selected but no KV credentials configured)");
                warn!(
                    "  Set CLOUDFLARE_ACCOUNT_ID, CLOUDFLARE_API_TOKEN, and KV_NAMESPACE_ID to enable it"
                );
                None
            }
        },
        CacheBackendKind::Memory => {
            info!("  Cache: memory");
            Some(Arc::new(MemoryCacheStore::new(MEMORY_CACHE_CAPACITY)) as _)
        }
        CacheBackendKind::None => {
            info!("  Cache: disabled");
            None
        }
    };
    let cache = Arc::new(match store {
        Some(store) => ListingCache::new(store, config.cache_ttl()),
        None => ListingCache::disabled(),
    });

    let api_token = config.api_token();
    if api_token.is_none() {
        warn!("  Auth: DISABLED (API_TOKEN not set)");
    }

    let template = config.folder_template();
    info!("  Intake root: {}", config.root_invites);
    info!(
        "  Processed root: {} ({} template folders)",
        config.root_processed,
        template.len()
    );

    let state = AppState::new(
        backend,
        cache,
        Arc::new(ProgressBroadcaster::new()),
        AppSettings {
            intake_root: config.root_invites.clone(),
            processed_root: config.root_processed.clone(),
            template,
            storage_info,
            api_token,
        },
    );

    if let Err(e) = ensure_root_folders(
        state.storage.as_ref(),
        &[config.root_invites.as_str(), config.root_processed.as_str()],
    )
    .await
    {
        error!("Failed to ensure root folders: {}", e);
    }

    let app = router(state, config.max_upload_bytes());

    // Bind and serve
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, initiating shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
        info!("Received SIGTERM, initiating shutdown");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
