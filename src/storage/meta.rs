use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::backend::BackendError;
use super::models::{ObjectRecord, StorageLocation};
use super::pool::{BackendPool, PoolError};

/// Owner of per-token metadata.
///
/// Backends are the source of truth; the in-memory cache is a read-through
/// copy built once at startup by [`MetaRepository::load_all`] and updated
/// only through [`MetaRepository::upsert`]. The cache lives behind an
/// explicit lock rather than any process-global.
pub struct MetaRepository {
    pool: Arc<BackendPool>,
    cache: RwLock<HashMap<String, ObjectRecord>>,
}

impl MetaRepository {
    pub fn new(pool: Arc<BackendPool>) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Read every record from every backend and merge them into the cache.
    /// On a token collision across backends the record with the newest
    /// `created_at` wins. Unreachable backends are logged and skipped.
    /// Returns the number of cached records.
    pub async fn load_all(&self) -> usize {
        let mut merged: HashMap<String, ObjectRecord> = HashMap::new();

        for backend in self.pool.handles() {
            let records = match backend.load_records().await {
                Ok(records) => records,
                Err(BackendError::SchemaMissing(_)) => {
                    // Startup runs before or alongside schema bootstrap.
                    match backend.ensure_schema().await {
                        Ok(()) => backend.load_records().await.unwrap_or_default(),
                        Err(e) => {
                            tracing::warn!(backend = backend.name(), error = %e, "schema bootstrap failed during cache load");
                            continue;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "skipping backend during cache load");
                    continue;
                }
            };

            for record in records {
                match merged.get(&record.token) {
                    Some(existing) if existing.created_at >= record.created_at => {}
                    _ => {
                        merged.insert(record.token.clone(), record);
                    }
                }
            }
        }

        let count = merged.len();
        *self.cache.write().await = merged;
        count
    }

    /// Write `record` to the first backend that accepts it, then update the
    /// cache. Idempotent: re-upserting the same token overwrites in place.
    ///
    /// When the record's bytes live in the pending tier, total backend
    /// failure is tolerated: the sidecar file is the durable copy until the
    /// reconciliation loop lands the object in a backend.
    pub async fn upsert(&self, record: ObjectRecord) -> Result<(), PoolError> {
        let result = self
            .pool
            .for_each_in_order(|backend| {
                let record = record.clone();
                async move { backend.put_record(&record).await }
            })
            .await;

        match result {
            Ok(_) => {}
            Err(e) if record.location == StorageLocation::Pending => {
                tracing::warn!(
                    token = %record.token,
                    error = %e,
                    "metadata write deferred; pending sidecar is authoritative until reconciliation"
                );
            }
            Err(e) => return Err(e),
        }

        self.cache
            .write()
            .await
            .insert(record.token.clone(), record);
        Ok(())
    }

    /// Cache-only lookup. A miss is not re-queried against backends; the
    /// read path goes to backends only when bytes are needed.
    pub async fn get(&self, token: &str) -> Option<ObjectRecord> {
        self.cache.read().await.get(token).cloned()
    }

    pub async fn contains(&self, token: &str) -> bool {
        self.cache.read().await.contains_key(token)
    }

    /// Newest-first page of records plus the total count.
    pub async fn list(&self, limit: usize, offset: usize) -> (Vec<ObjectRecord>, usize) {
        let cache = self.cache.read().await;
        let total = cache.len();
        let mut records: Vec<ObjectRecord> = cache.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.token.cmp(&b.token)));
        (
            records.into_iter().skip(offset).take(limit).collect(),
            total,
        )
    }
}
