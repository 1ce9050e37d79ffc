use std::future::Future;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::backend::{BackendError, StorageBackend};
use super::meta::MetaRepository;
use super::models::ObjectRecord;
use super::pending::PendingQueue;
use super::pool::BackendPool;

#[derive(Debug, Error)]
pub enum ReadError {
    /// The token is unknown in every tier.
    #[error("object not found")]
    NotFound,
    /// Metadata exists, every backend answered, and none holds the bytes.
    /// An unreachable backend never produces this; see [`ReadError::Storage`].
    #[error("object bytes are gone")]
    Gone,
    /// The requested range does not fit the object. Carries the true size so
    /// the caller can report it.
    #[error("range not satisfiable for {total}-byte object")]
    Unsatisfiable { total: u64 },
    #[error("storage error: {0}")]
    Storage(String),
}

/// A byte-range request: `bytes=start-end`, `bytes=start-`, or `bytes=-n`
/// (suffix of n bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl RangeSpec {
    /// Parse a `Range` header value. Returns None for anything that is not a
    /// single well-formed byte range; callers treat that as a full-object
    /// request, per the usual ignore-invalid-Range convention.
    pub fn parse(header: &str) -> Option<RangeSpec> {
        let spec = header.strip_prefix("bytes=")?.trim();
        if spec.contains(',') {
            return None;
        }
        let (start, end) = spec.split_once('-')?;
        let start = if start.is_empty() {
            None
        } else {
            Some(start.parse().ok()?)
        };
        let end = if end.is_empty() {
            None
        } else {
            Some(end.parse().ok()?)
        };
        if start.is_none() && end.is_none() {
            return None;
        }
        Some(RangeSpec { start, end })
    }

    /// Validate against the actual object size, yielding inclusive bounds.
    /// Out-of-bounds ranges are rejected, never clamped.
    pub fn resolve(&self, total: u64) -> Result<(u64, u64), ReadError> {
        let unsat = ReadError::Unsatisfiable { total };
        match (self.start, self.end) {
            (Some(start), Some(end)) => {
                if start > end || end >= total {
                    return Err(unsat);
                }
                Ok((start, end))
            }
            (Some(start), None) => {
                if start >= total {
                    return Err(unsat);
                }
                Ok((start, total - 1))
            }
            (None, Some(suffix)) => {
                if suffix == 0 || suffix > total {
                    return Err(unsat);
                }
                Ok((total - suffix, total - 1))
            }
            (None, None) => Err(unsat),
        }
    }
}

/// A resolved read: the bytes (full or sliced), the object's full size, and
/// the served window when the request was partial.
#[derive(Debug)]
pub struct ReadResult {
    pub record: ObjectRecord,
    pub body: Bytes,
    pub total_size: u64,
    pub range: Option<(u64, u64)>,
}

/// Read-only multi-tier resolution of a token to bytes.
///
/// Tiers, in order: consolidated blob column, then chunk sequence, probing
/// backends in pool priority order for each, then the pending-disk pair.
/// A transient-connection failure gets the same one-shot recreate-and-retry
/// the write path applies. The reader never writes and never repairs
/// schemas; a schema-stale backend simply cannot have the bytes and is
/// skipped. When any probe fails inconclusively and no tier produced the
/// bytes, the read is a hard failure rather than a verdict on the object.
pub struct BlobReader {
    pool: Arc<BackendPool>,
    repo: Arc<MetaRepository>,
    pending: Arc<PendingQueue>,
}

impl BlobReader {
    pub fn new(
        pool: Arc<BackendPool>,
        repo: Arc<MetaRepository>,
        pending: Arc<PendingQueue>,
    ) -> Self {
        Self {
            pool,
            repo,
            pending,
        }
    }

    pub async fn read(
        &self,
        token: &str,
        range: Option<RangeSpec>,
    ) -> Result<ReadResult, ReadError> {
        let cached = self.repo.get(token).await;
        let mut degraded = false;

        // Tier (a): consolidated blob column.
        for backend in self.pool.handles() {
            let probed = with_recreate(backend, |b| {
                let token = token.to_string();
                async move { b.get_blob(&token).await }
            })
            .await;
            match probed {
                Ok(Some(body)) => {
                    let record = cached.clone().ok_or(ReadError::NotFound)?;
                    return finish_read(record, body, range);
                }
                Ok(None) => {}
                Err(e) => degraded |= skip_backend(backend, token, "blob probe", &e),
            }
        }

        // Tier (b): ordered chunk sequence.
        for backend in self.pool.handles() {
            let probed = with_recreate(backend, |b| {
                let token = token.to_string();
                async move { b.chunk_sizes(&token).await }
            })
            .await;
            let sizes = match probed {
                Ok(sizes) => sizes,
                Err(e) => {
                    degraded |= skip_backend(backend, token, "chunk probe", &e);
                    continue;
                }
            };
            if sizes.is_empty() {
                continue;
            }

            let total: u64 = sizes.iter().sum();
            if let Some(record) = &cached {
                if record.byte_size != total {
                    // Partial sequence abandoned by a failover; another
                    // backend holds the complete one.
                    tracing::warn!(
                        backend = backend.name(),
                        token,
                        expected = record.byte_size,
                        found = total,
                        "ignoring incomplete chunk sequence"
                    );
                    continue;
                }
            }

            let record = cached.clone().ok_or(ReadError::NotFound)?;
            return self
                .read_chunked(backend, record, &sizes, total, range)
                .await;
        }

        // Tier (c): pending-disk staging. The sidecar carries the record, so
        // a staged object survives even a cold cache.
        match self.pending.load(token).await {
            Ok(Some(body)) => {
                let record = match cached {
                    Some(record) => record,
                    None => self
                        .pending_record(token)
                        .await
                        .ok_or(ReadError::NotFound)?,
                };
                return finish_read(record, body, range);
            }
            Ok(None) => {}
            Err(e) => return Err(ReadError::Storage(e.to_string())),
        }

        if cached.is_some() {
            if degraded {
                // The bytes may still sit on an unreachable backend, so this
                // is a failed read, not a verdict that the object is lost.
                Err(ReadError::Storage(
                    "a backend that may hold this object is unreachable".to_string(),
                ))
            } else {
                Err(ReadError::Gone)
            }
        } else {
            Err(ReadError::NotFound)
        }
    }

    /// Slice the requested window out of a chunk sequence, fetching only the
    /// chunks that overlap it.
    async fn read_chunked(
        &self,
        backend: &Arc<dyn StorageBackend>,
        record: ObjectRecord,
        sizes: &[u64],
        total: u64,
        range: Option<RangeSpec>,
    ) -> Result<ReadResult, ReadError> {
        let window = match range {
            Some(spec) => Some(spec.resolve(total)?),
            None => None,
        };
        let (start, end) = window.unwrap_or((0, total.saturating_sub(1)));

        let mut body = BytesMut::with_capacity((end.saturating_sub(start) + 1) as usize);
        if total > 0 {
            let mut offset = 0u64;
            for (seq, &size) in sizes.iter().enumerate() {
                let chunk_start = offset;
                let chunk_end = offset + size; // exclusive
                offset = chunk_end;

                if chunk_end <= start {
                    continue;
                }
                if chunk_start > end {
                    break;
                }

                let chunk = backend
                    .get_chunk(&record.token, seq as u32)
                    .await
                    .map_err(|e| ReadError::Storage(e.to_string()))?;

                let from = start.saturating_sub(chunk_start) as usize;
                let to = ((end + 1).min(chunk_end) - chunk_start) as usize;
                body.extend_from_slice(&chunk[from..to]);
            }
        }

        Ok(ReadResult {
            record,
            body: body.freeze(),
            total_size: total,
            range: window,
        })
    }

    async fn pending_record(&self, token: &str) -> Option<ObjectRecord> {
        let staged = self.pending.list_staged().await.ok()?;
        staged
            .into_iter()
            .find(|s| s.record.token == token)
            .map(|s| s.record)
    }
}

fn finish_read(
    record: ObjectRecord,
    body: Bytes,
    range: Option<RangeSpec>,
) -> Result<ReadResult, ReadError> {
    let total = body.len() as u64;
    match range {
        Some(spec) => {
            let (start, end) = spec.resolve(total)?;
            Ok(ReadResult {
                record,
                body: body.slice(start as usize..=end as usize),
                total_size: total,
                range: Some((start, end)),
            })
        }
        None => Ok(ReadResult {
            record,
            body,
            total_size: total,
            range: None,
        }),
    }
}

/// One read probe, with the write path's one-shot recreate retry on a
/// transient-connection failure.
async fn with_recreate<T, F, Fut>(
    backend: &Arc<dyn StorageBackend>,
    f: F,
) -> Result<T, BackendError>
where
    F: Fn(Arc<dyn StorageBackend>) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    match f(Arc::clone(backend)).await {
        Err(BackendError::Unavailable(msg)) => {
            tracing::info!(
                backend = backend.name(),
                error = %msg,
                "recreating backend connection before read retry"
            );
            backend.recreate().await?;
            f(Arc::clone(backend)).await
        }
        other => other,
    }
}

/// Log a failed read probe. Returns whether the failure is inconclusive,
/// meaning the backend could still hold the bytes.
fn skip_backend(
    backend: &Arc<dyn StorageBackend>,
    token: &str,
    stage: &str,
    e: &BackendError,
) -> bool {
    match e {
        BackendError::SchemaMissing(_) | BackendError::NotFound(_) => false,
        other => {
            tracing::warn!(backend = backend.name(), token, stage, error = %other, "skipping backend on read");
            true
        }
    }
}
