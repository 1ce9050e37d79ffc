use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use super::models::ObjectRecord;

/// Structured failure classes, assigned once at the backend adapter boundary.
/// Callers branch on the variant, never on error text.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Connection-class failure: the backend is unreachable or its handle is
    /// broken. Worth one recreate-and-retry before giving up on the backend.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The storage schema is missing a table this operation needs. Worth one
    /// ensure-schema-and-retry before giving up on the backend.
    #[error("schema out of date: {0}")]
    SchemaMissing(String),
    /// The backend refuses the payload outright. Never retried and never
    /// redirected to the pending tier.
    #[error("payload too large: {0}")]
    TooLarge(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// A stored value failed to decode.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// One configured storage sink. Every concrete backend (and every test
/// double) speaks this contract; the pool and everything above it never
/// touch a backend through anything else.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stable identity within the ordered pool.
    fn name(&self) -> &str;

    /// Idempotently create any missing tables. Safe to call repeatedly and
    /// after partial failures.
    async fn ensure_schema(&self) -> Result<(), BackendError>;

    /// Tear down and rebuild the underlying connection in place.
    async fn recreate(&self) -> Result<(), BackendError>;

    async fn put_record(&self, record: &ObjectRecord) -> Result<(), BackendError>;
    async fn get_record(&self, token: &str) -> Result<Option<ObjectRecord>, BackendError>;
    /// Every record this backend holds, for the startup cache merge.
    async fn load_records(&self) -> Result<Vec<ObjectRecord>, BackendError>;

    /// Store a whole payload in the consolidated blob column.
    async fn put_blob(&self, token: &str, data: Bytes) -> Result<(), BackendError>;
    async fn get_blob(&self, token: &str) -> Result<Option<Bytes>, BackendError>;

    async fn put_chunk(&self, token: &str, seq: u32, data: Bytes) -> Result<(), BackendError>;
    /// Payload sizes of the token's chunks in sequence order. Empty when the
    /// token has no chunks here.
    async fn chunk_sizes(&self, token: &str) -> Result<Vec<u64>, BackendError>;
    async fn get_chunk(&self, token: &str, seq: u32) -> Result<Bytes, BackendError>;

    /// Remove every row for a token. Used to clean up a partial chunk
    /// sequence abandoned by a mid-stream failover.
    async fn delete_object(&self, token: &str) -> Result<(), BackendError>;
}
