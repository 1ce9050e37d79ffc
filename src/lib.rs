//! blob-depot - token-addressed blob storage over HTTP
//!
//! This crate ingests binary objects over multipart HTTP, stores them behind
//! short public tokens, and serves them back with byte-range support:
//! - An ordered pool of embedded-database backends with health-driven
//!   fallback and in-place connection recovery
//! - Chunked ingestion with mid-stream failover
//! - Local-disk staging when every backend is down, reconciled back into a
//!   backend by a background loop
//! - Three-tier range-aware retrieval (blob column, chunk sequence, staging)

pub mod api;
pub mod config;
pub mod storage;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use config::Config;
use storage::{
    BackendPool, BlobReader, BlobWriter, MetaRepository, PendingQueue, Reconciler, RedbBackend,
    StorageBackend, WriterConfig,
};

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub pool: Arc<BackendPool>,
    pub repo: Arc<MetaRepository>,
    pub pending: Arc<PendingQueue>,
    pub writer: Arc<BlobWriter>,
    pub reader: BlobReader,
}

impl AppState {
    /// Wire the storage stack from configuration: open backends (an
    /// unreachable backend is logged, not fatal), bootstrap schemas, warm the
    /// metadata cache, and prepare the pending tier.
    pub async fn initialize(config: Config) -> anyhow::Result<Arc<AppState>> {
        let mut handles: Vec<Arc<dyn StorageBackend>> = Vec::new();
        for (idx, path) in config.backend_paths.iter().enumerate() {
            let name = format!("backend-{idx}");
            let backend = Arc::new(RedbBackend::new(
                name.clone(),
                path,
                config.backend_value_cap,
            ));
            match backend.ensure_schema().await {
                Ok(()) => tracing::info!(backend = %name, path = %path, "backend ready"),
                Err(e) => {
                    // Keep the handle: the pool recreates connections on
                    // demand, so the backend can come back later.
                    tracing::warn!(backend = %name, path = %path, error = %e, "backend unreachable at startup");
                }
            }
            handles.push(backend);
        }

        let pool = Arc::new(BackendPool::new(handles));
        let repo = Arc::new(MetaRepository::new(Arc::clone(&pool)));
        let cached = repo.load_all().await;
        tracing::info!(records = cached, "metadata cache loaded");

        let pending = Arc::new(PendingQueue::new(&config.pending_dir)?);

        let writer = Arc::new(BlobWriter::new(
            Arc::clone(&pool),
            Arc::clone(&repo),
            Arc::clone(&pending),
            WriterConfig {
                chunk_size: config.chunk_size,
                max_upload_size: config.max_upload_size,
                blocked_mime_types: config.blocked_mime_types.clone(),
            },
        ));

        let reader = BlobReader::new(
            Arc::clone(&pool),
            Arc::clone(&repo),
            Arc::clone(&pending),
        );

        Ok(Arc::new(AppState {
            config,
            pool,
            repo,
            pending,
            writer,
            reader,
        }))
    }

    /// Reconciliation loop over this state's pending tier.
    pub fn reconciler(&self) -> Arc<Reconciler> {
        Arc::new(Reconciler::new(
            Arc::clone(&self.pending),
            Arc::clone(&self.writer),
            Arc::clone(&self.repo),
            Duration::from_secs(self.config.reconcile_interval_secs),
        ))
    }
}
