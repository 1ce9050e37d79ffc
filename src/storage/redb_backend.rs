use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use redb::{Database, ReadableTable};
use tokio::sync::RwLock;

use super::backend::{BackendError, StorageBackend};
use super::models::ObjectRecord;
use super::tables::*;

/// A storage backend persisted as one redb database file.
///
/// The file may be missing, locked, or schema-stale; every failure is
/// classified into a [`BackendError`] here so that nothing upstream ever
/// inspects error text. The connection is opened lazily and can be rebuilt
/// in place via [`StorageBackend::recreate`].
pub struct RedbBackend {
    name: String,
    path: PathBuf,
    /// Largest single value (record, blob, or chunk payload) accepted.
    value_cap: u64,
    db: RwLock<Option<Arc<Database>>>,
}

impl RedbBackend {
    pub fn new<P: AsRef<Path>>(name: impl Into<String>, path: P, value_cap: u64) -> Self {
        Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
            value_cap,
            db: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_db(path: &Path) -> Result<Database, BackendError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        }
        Database::create(path).map_err(|e| BackendError::Unavailable(e.to_string()))
    }

    /// Current connection, opening it on first use.
    async fn handle(&self) -> Result<Arc<Database>, BackendError> {
        if let Some(db) = self.db.read().await.as_ref() {
            return Ok(Arc::clone(db));
        }
        let mut guard = self.db.write().await;
        if let Some(db) = guard.as_ref() {
            return Ok(Arc::clone(db));
        }
        let db = Arc::new(Self::open_db(&self.path)?);
        *guard = Some(Arc::clone(&db));
        Ok(db)
    }

    fn check_size(&self, len: usize) -> Result<(), BackendError> {
        if len as u64 > self.value_cap {
            return Err(BackendError::TooLarge(format!(
                "{len} bytes exceeds the {}-byte value cap of backend {}",
                self.value_cap, self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for RedbBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_schema(&self) -> Result<(), BackendError> {
        let db = self.handle().await?;
        let write_txn = db.begin_write().map_err(txn_err)?;
        {
            // Opening a table in a write transaction creates it if absent,
            // so repeated calls and later schema revisions are no-ops.
            let _ = write_txn.open_table(OBJECTS).map_err(schema_table_err)?;
            let _ = write_txn.open_table(BLOBS).map_err(schema_table_err)?;
            let _ = write_txn.open_table(CHUNKS).map_err(schema_table_err)?;
        }
        write_txn.commit().map_err(commit_err)
    }

    async fn recreate(&self) -> Result<(), BackendError> {
        let mut guard = self.db.write().await;
        // Drop the old handle before reopening so redb's file lock is freed.
        *guard = None;
        let db = Arc::new(Self::open_db(&self.path)?);
        *guard = Some(db);
        Ok(())
    }

    async fn put_record(&self, record: &ObjectRecord) -> Result<(), BackendError> {
        let data = rmp_serde::to_vec_named(record)
            .map_err(|e| BackendError::Corrupt(e.to_string()))?;
        self.check_size(data.len())?;

        let db = self.handle().await?;
        let write_txn = db.begin_write().map_err(txn_err)?;
        {
            let mut table = write_txn.open_table(OBJECTS).map_err(schema_table_err)?;
            table
                .insert(record.token.as_str(), data.as_slice())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(commit_err)
    }

    async fn get_record(&self, token: &str) -> Result<Option<ObjectRecord>, BackendError> {
        let db = self.handle().await?;
        let read_txn = db.begin_read().map_err(txn_err)?;
        let table = read_txn.open_table(OBJECTS).map_err(table_err)?;
        match table.get(token).map_err(storage_err)? {
            Some(data) => {
                let record = rmp_serde::from_slice(data.value())
                    .map_err(|e| BackendError::Corrupt(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn load_records(&self) -> Result<Vec<ObjectRecord>, BackendError> {
        let db = self.handle().await?;
        let read_txn = db.begin_read().map_err(txn_err)?;
        let table = read_txn.open_table(OBJECTS).map_err(table_err)?;

        let mut records = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (key, value) = entry.map_err(storage_err)?;
            match rmp_serde::from_slice::<ObjectRecord>(value.value()) {
                Ok(record) => records.push(record),
                Err(e) => {
                    // One undecodable row must not block startup.
                    tracing::warn!(
                        backend = %self.name,
                        token = key.value(),
                        error = %e,
                        "skipping undecodable object record"
                    );
                }
            }
        }
        Ok(records)
    }

    async fn put_blob(&self, token: &str, data: Bytes) -> Result<(), BackendError> {
        self.check_size(data.len())?;
        let db = self.handle().await?;
        let write_txn = db.begin_write().map_err(txn_err)?;
        {
            let mut table = write_txn.open_table(BLOBS).map_err(schema_table_err)?;
            table.insert(token, data.as_ref()).map_err(storage_err)?;
        }
        write_txn.commit().map_err(commit_err)
    }

    async fn get_blob(&self, token: &str) -> Result<Option<Bytes>, BackendError> {
        let db = self.handle().await?;
        let read_txn = db.begin_read().map_err(txn_err)?;
        let table = read_txn.open_table(BLOBS).map_err(table_err)?;
        Ok(table
            .get(token)
            .map_err(storage_err)?
            .map(|v| Bytes::copy_from_slice(v.value())))
    }

    async fn put_chunk(&self, token: &str, seq: u32, data: Bytes) -> Result<(), BackendError> {
        self.check_size(data.len())?;
        let db = self.handle().await?;
        let write_txn = db.begin_write().map_err(txn_err)?;
        {
            let mut table = write_txn.open_table(CHUNKS).map_err(schema_table_err)?;
            table.insert((token, seq), data.as_ref()).map_err(storage_err)?;
        }
        write_txn.commit().map_err(commit_err)
    }

    async fn chunk_sizes(&self, token: &str) -> Result<Vec<u64>, BackendError> {
        let db = self.handle().await?;
        let read_txn = db.begin_read().map_err(txn_err)?;
        let table = read_txn.open_table(CHUNKS).map_err(table_err)?;

        let mut sizes = Vec::new();
        let range = table
            .range((token, 0u32)..=(token, u32::MAX))
            .map_err(storage_err)?;
        for entry in range {
            let (key, value) = entry.map_err(storage_err)?;
            let (_, seq) = key.value();
            if seq as usize != sizes.len() {
                return Err(BackendError::Corrupt(format!(
                    "non-contiguous chunk sequence for {token}: expected {}, found {seq}",
                    sizes.len()
                )));
            }
            sizes.push(value.value().len() as u64);
        }
        Ok(sizes)
    }

    async fn get_chunk(&self, token: &str, seq: u32) -> Result<Bytes, BackendError> {
        let db = self.handle().await?;
        let read_txn = db.begin_read().map_err(txn_err)?;
        let table = read_txn.open_table(CHUNKS).map_err(table_err)?;
        match table.get((token, seq)).map_err(storage_err)? {
            Some(v) => Ok(Bytes::copy_from_slice(v.value())),
            None => Err(BackendError::NotFound(format!("{token} chunk {seq}"))),
        }
    }

    async fn delete_object(&self, token: &str) -> Result<(), BackendError> {
        let db = self.handle().await?;
        let write_txn = db.begin_write().map_err(txn_err)?;
        {
            let mut objects = write_txn.open_table(OBJECTS).map_err(schema_table_err)?;
            objects.remove(token).map_err(storage_err)?;

            let mut blobs = write_txn.open_table(BLOBS).map_err(schema_table_err)?;
            blobs.remove(token).map_err(storage_err)?;

            let mut chunks = write_txn.open_table(CHUNKS).map_err(schema_table_err)?;
            let seqs: Vec<u32> = {
                let range = chunks
                    .range((token, 0u32)..=(token, u32::MAX))
                    .map_err(storage_err)?;
                let mut seqs = Vec::new();
                for entry in range {
                    let (key, _) = entry.map_err(storage_err)?;
                    seqs.push(key.value().1);
                }
                seqs
            };
            for seq in seqs {
                chunks.remove((token, seq)).map_err(storage_err)?;
            }
        }
        write_txn.commit().map_err(commit_err)
    }
}

// ============================================================================
// Error classification (once, at the adapter boundary)
// ============================================================================

fn txn_err(e: redb::TransactionError) -> BackendError {
    BackendError::Unavailable(e.to_string())
}

fn commit_err(e: redb::CommitError) -> BackendError {
    BackendError::Unavailable(e.to_string())
}

fn storage_err(e: redb::StorageError) -> BackendError {
    BackendError::Unavailable(e.to_string())
}

/// Table errors on the read path: a missing table means the schema has not
/// been bootstrapped on this backend yet.
fn table_err(e: redb::TableError) -> BackendError {
    match e {
        redb::TableError::TableDoesNotExist(name) => BackendError::SchemaMissing(name),
        other => BackendError::Unavailable(other.to_string()),
    }
}

/// Table errors inside a write transaction, where open_table creates missing
/// tables: anything left is a real failure.
fn schema_table_err(e: redb::TableError) -> BackendError {
    BackendError::Unavailable(e.to_string())
}
