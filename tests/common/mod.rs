#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use blob_depot::storage::{
    BackendError, BackendPool, BlobReader, BlobWriter, MetaRepository, ObjectRecord, PendingQueue,
    StorageBackend, StorageLocation, WriterConfig,
};

pub fn sample_record(token: &str) -> ObjectRecord {
    ObjectRecord {
        token: token.to_string(),
        original_name: "report.pdf".to_string(),
        safe_name: "report.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        byte_size: 1024,
        created_at: Utc::now(),
        location: StorageLocation::Backend("backend-0".to_string()),
    }
}

/// Deterministic payload that makes chunk-boundary mistakes visible: every
/// byte is a function of its offset.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// In-memory backend double whose health the test scripts directly.
///
/// While unhealthy every operation fails with `Unavailable`; `recreate`
/// heals it only when built with `recovers_on_recreate`, which is how tests
/// exercise the pool's recreate-and-retry path.
pub struct FlakyBackend {
    name: String,
    healthy: AtomicBool,
    recovers_on_recreate: bool,
    schema_ready: AtomicBool,
    ensure_schema_calls: AtomicUsize,
    records: Mutex<HashMap<String, ObjectRecord>>,
    blobs: Mutex<HashMap<String, Bytes>>,
    chunks: Mutex<BTreeMap<(String, u32), Bytes>>,
}

impl FlakyBackend {
    pub fn new(name: &str) -> Arc<Self> {
        Self::build(name, false)
    }

    /// A backend whose `recreate` brings it back to health, for exercising
    /// the pool's recreate-and-retry path.
    pub fn recoverable(name: &str) -> Arc<Self> {
        Self::build(name, true)
    }

    fn build(name: &str, recovers_on_recreate: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            healthy: AtomicBool::new(true),
            recovers_on_recreate,
            schema_ready: AtomicBool::new(true),
            ensure_schema_calls: AtomicUsize::new(0),
            records: Mutex::new(HashMap::new()),
            blobs: Mutex::new(HashMap::new()),
            chunks: Mutex::new(BTreeMap::new()),
        })
    }

    /// Fresh backend whose schema has not been bootstrapped: reads and
    /// writes fail with `SchemaMissing` until `ensure_schema` runs.
    pub fn without_schema(name: &str) -> Arc<Self> {
        let backend = Self::new(name);
        backend.schema_ready.store(false, Ordering::SeqCst);
        backend
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn ensure_schema_calls(&self) -> usize {
        self.ensure_schema_calls.load(Ordering::SeqCst)
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn chunk_count(&self, token: &str) -> usize {
        self.chunks
            .lock()
            .unwrap()
            .keys()
            .filter(|(t, _)| t == token)
            .count()
    }

    pub fn has_blob(&self, token: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(token)
    }

    pub fn seed_record(&self, record: ObjectRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.token.clone(), record);
    }

    fn check(&self) -> Result<(), BackendError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(format!("{} is down", self.name)));
        }
        Ok(())
    }

    /// Data operations need both health and a bootstrapped schema.
    fn check_ready(&self) -> Result<(), BackendError> {
        self.check()?;
        if !self.schema_ready.load(Ordering::SeqCst) {
            return Err(BackendError::SchemaMissing("objects".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_schema(&self) -> Result<(), BackendError> {
        self.check()?;
        self.ensure_schema_calls.fetch_add(1, Ordering::SeqCst);
        self.schema_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn recreate(&self) -> Result<(), BackendError> {
        if self.recovers_on_recreate {
            self.healthy.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn put_record(&self, record: &ObjectRecord) -> Result<(), BackendError> {
        self.check_ready()?;
        self.records
            .lock()
            .unwrap()
            .insert(record.token.clone(), record.clone());
        Ok(())
    }

    async fn get_record(&self, token: &str) -> Result<Option<ObjectRecord>, BackendError> {
        self.check_ready()?;
        Ok(self.records.lock().unwrap().get(token).cloned())
    }

    async fn load_records(&self) -> Result<Vec<ObjectRecord>, BackendError> {
        self.check_ready()?;
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn put_blob(&self, token: &str, data: Bytes) -> Result<(), BackendError> {
        self.check_ready()?;
        self.blobs.lock().unwrap().insert(token.to_string(), data);
        Ok(())
    }

    async fn get_blob(&self, token: &str) -> Result<Option<Bytes>, BackendError> {
        self.check_ready()?;
        Ok(self.blobs.lock().unwrap().get(token).cloned())
    }

    async fn put_chunk(&self, token: &str, seq: u32, data: Bytes) -> Result<(), BackendError> {
        self.check_ready()?;
        self.chunks
            .lock()
            .unwrap()
            .insert((token.to_string(), seq), data);
        Ok(())
    }

    async fn chunk_sizes(&self, token: &str) -> Result<Vec<u64>, BackendError> {
        self.check_ready()?;
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, _), _)| t == token)
            .map(|(_, data)| data.len() as u64)
            .collect())
    }

    async fn get_chunk(&self, token: &str, seq: u32) -> Result<Bytes, BackendError> {
        self.check_ready()?;
        self.chunks
            .lock()
            .unwrap()
            .get(&(token.to_string(), seq))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("{token} chunk {seq}")))
    }

    async fn delete_object(&self, token: &str) -> Result<(), BackendError> {
        self.check_ready()?;
        self.records.lock().unwrap().remove(token);
        self.blobs.lock().unwrap().remove(token);
        self.chunks
            .lock()
            .unwrap()
            .retain(|(t, _), _| t != token);
        Ok(())
    }
}

/// The full write/read stack over a caller-supplied set of backends, with a
/// temp-dir pending tier and a small chunk size so tests stay fast.
pub struct TestStack {
    pub pool: Arc<BackendPool>,
    pub repo: Arc<MetaRepository>,
    pub pending: Arc<PendingQueue>,
    pub writer: Arc<BlobWriter>,
    pub reader: BlobReader,
    pub _dir: tempfile::TempDir,
}

pub const TEST_CHUNK_SIZE: usize = 1024;
pub const TEST_MAX_UPLOAD: u64 = 1024 * 1024;

pub fn test_stack(backends: Vec<Arc<dyn StorageBackend>>) -> TestStack {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(BackendPool::new(backends));
    let repo = Arc::new(MetaRepository::new(Arc::clone(&pool)));
    let pending = Arc::new(PendingQueue::new(dir.path().join("pending")).unwrap());
    let writer = Arc::new(BlobWriter::new(
        Arc::clone(&pool),
        Arc::clone(&repo),
        Arc::clone(&pending),
        WriterConfig {
            chunk_size: TEST_CHUNK_SIZE,
            max_upload_size: TEST_MAX_UPLOAD,
            blocked_mime_types: vec!["application/x-msdownload".to_string()],
        },
    ));
    let reader = BlobReader::new(Arc::clone(&pool), Arc::clone(&repo), Arc::clone(&pending));

    TestStack {
        pool,
        repo,
        pending,
        writer,
        reader,
        _dir: dir,
    }
}

/// Push a payload through a fresh upload session and return its record.
pub async fn upload_bytes(
    stack: &TestStack,
    name: &str,
    data: &[u8],
) -> Result<ObjectRecord, blob_depot::storage::WriteError> {
    let mut session = stack
        .writer
        .begin(Some(name.to_string()), None, Some(data.len() as u64))
        .await?;
    // Feed in uneven slices so chunk boundaries never line up with pushes.
    for piece in data.chunks(700) {
        session.push(piece).await?;
    }
    session.finish().await
}
