use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use thiserror::Error;

use crate::token::TokenAllocator;

use super::meta::MetaRepository;
use super::models::{sanitize_name, ObjectRecord, StorageLocation};
use super::pending::{PendingError, PendingQueue};
use super::pool::{BackendPool, PoolError};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("declared size {declared} exceeds the {limit}-byte upload limit")]
    DeclaredTooLarge { declared: u64, limit: u64 },
    #[error("upload exceeds the {0}-byte limit")]
    StreamTooLarge(u64),
    #[error("mime type {0} is not allowed")]
    BlockedType(String),
    /// A backend refused the payload as oversized. Fails the upload outright.
    #[error("storage rejected payload: {0}")]
    BackendCapacity(String),
    #[error("no storage available: {0}")]
    NoStorage(String),
    #[error("staging failed: {0}")]
    Staging(#[from] PendingError),
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub chunk_size: usize,
    pub max_upload_size: u64,
    /// Lowercase deny list; entries are either a full `type/subtype` or a
    /// bare primary type.
    pub blocked_mime_types: Vec<String>,
}

/// Streams inbound objects into bounded-size chunks against the first
/// healthy backend, with mid-stream failover and a pending-disk spill when
/// every backend is down.
pub struct BlobWriter {
    pool: Arc<BackendPool>,
    repo: Arc<MetaRepository>,
    pending: Arc<PendingQueue>,
    allocator: TokenAllocator,
    config: WriterConfig,
}

impl BlobWriter {
    pub fn new(
        pool: Arc<BackendPool>,
        repo: Arc<MetaRepository>,
        pending: Arc<PendingQueue>,
        config: WriterConfig,
    ) -> Self {
        let allocator = TokenAllocator::new(Arc::clone(&repo));
        Self {
            pool,
            repo,
            pending,
            allocator,
            config,
        }
    }

    /// Validate the declared size and MIME type, allocate a token, and open
    /// an upload session. Nothing is persisted until bytes are pushed.
    pub async fn begin(
        &self,
        file_name: Option<String>,
        content_type: Option<String>,
        declared_size: Option<u64>,
    ) -> Result<UploadSession, WriteError> {
        let original_name = file_name.unwrap_or_else(|| "file".to_string());
        let mime_type = resolve_mime(content_type.as_deref(), &original_name);

        if self.is_blocked(&mime_type) {
            return Err(WriteError::BlockedType(mime_type));
        }
        if let Some(declared) = declared_size {
            if declared > self.config.max_upload_size {
                return Err(WriteError::DeclaredTooLarge {
                    declared,
                    limit: self.config.max_upload_size,
                });
            }
        }

        let token = self.allocator.allocate().await;
        Ok(UploadSession {
            pool: Arc::clone(&self.pool),
            repo: Arc::clone(&self.repo),
            pending: Arc::clone(&self.pending),
            chunk_size: self.config.chunk_size,
            max_upload_size: self.config.max_upload_size,
            token,
            original_name,
            mime_type,
            chunks: Vec::new(),
            tail: BytesMut::new(),
            persisted: 0,
            backend: None,
            spilled: false,
            total: 0,
        })
    }

    /// Write a complete in-memory payload, chunk-sliced the same way an
    /// upload is. Used by the reconciliation loop to replay staged objects.
    pub async fn store_bytes(
        &self,
        token: &str,
        data: Bytes,
    ) -> Result<StorageLocation, PoolError> {
        if data.len() < self.config.chunk_size {
            let (winner, ()) = self
                .pool
                .for_each_in_order(|backend| {
                    let token = token.to_string();
                    let data = data.clone();
                    async move { backend.put_blob(&token, data).await }
                })
                .await?;
            return Ok(StorageLocation::Backend(winner.name().to_string()));
        }

        let chunks: Vec<Bytes> = (0..data.len())
            .step_by(self.config.chunk_size)
            .map(|start| data.slice(start..(start + self.config.chunk_size).min(data.len())))
            .collect();

        let (winner, ()) = self
            .pool
            .for_each_in_order(|backend| {
                let token = token.to_string();
                let chunks = chunks.clone();
                async move {
                    for (seq, chunk) in chunks.iter().enumerate() {
                        backend.put_chunk(&token, seq as u32, chunk.clone()).await?;
                    }
                    Ok(())
                }
            })
            .await?;
        Ok(StorageLocation::Backend(winner.name().to_string()))
    }

    fn is_blocked(&self, mime_type: &str) -> bool {
        let lowered = mime_type.to_ascii_lowercase();
        let primary = lowered.split('/').next().unwrap_or("");
        self.config
            .blocked_mime_types
            .iter()
            .any(|blocked| blocked == &lowered || blocked == primary)
    }
}

/// MIME resolution: trust the declared content type unless it is the generic
/// octet-stream, then guess from the filename, then fall back.
fn resolve_mime(content_type: Option<&str>, file_name: &str) -> String {
    content_type
        .filter(|ct| *ct != "application/octet-stream")
        .map(|ct| ct.to_string())
        .or_else(|| {
            mime_guess::from_path(file_name)
                .first()
                .map(|m| m.to_string())
        })
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// One in-flight upload. Bytes are pushed as they arrive; complete chunks
/// are persisted immediately with strictly increasing sequence numbers, and
/// the metadata record is written only by [`UploadSession::finish`] so a
/// dropped connection never leaves a partial object looking complete.
///
/// All received payload is retained until finish so that a mid-stream
/// failover can replay earlier chunks to the new backend, and a total
/// failure can divert the whole object to the pending tier. The retained
/// buffer is bounded by the configured upload limit.
pub struct UploadSession {
    pool: Arc<BackendPool>,
    repo: Arc<MetaRepository>,
    pending: Arc<PendingQueue>,
    chunk_size: usize,
    max_upload_size: u64,
    token: String,
    original_name: String,
    mime_type: String,
    /// Complete chunk payloads in sequence order, persisted or not.
    chunks: Vec<Bytes>,
    /// Sub-chunk remainder awaiting more bytes.
    tail: BytesMut,
    /// Number of chunks already persisted to `backend`.
    persisted: usize,
    /// Backend currently holding this token's chunks.
    backend: Option<String>,
    /// All backends failed; the rest of the object goes to the pending tier.
    spilled: bool,
    total: u64,
}

impl UploadSession {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub async fn push(&mut self, data: &[u8]) -> Result<(), WriteError> {
        self.total += data.len() as u64;
        if self.total > self.max_upload_size {
            return Err(WriteError::StreamTooLarge(self.max_upload_size));
        }

        self.tail.extend_from_slice(data);
        while self.tail.len() >= self.chunk_size {
            let chunk = self.tail.split_to(self.chunk_size).freeze();
            self.chunks.push(chunk);
        }

        self.flush_ready().await
    }

    /// Flush the remainder, write the metadata record, and return it. The
    /// object is durable on success: either in a backend or in the pending
    /// tier (which still counts as success for the uploader).
    pub async fn finish(mut self) -> Result<ObjectRecord, WriteError> {
        if !self.spilled {
            if self.persisted == 0 && self.chunks.is_empty() {
                // Whole object fits below one chunk: consolidated blob column.
                self.store_inline().await?;
            } else if !self.tail.is_empty() {
                let chunk = self.tail.split().freeze();
                self.chunks.push(chunk);
                self.flush_ready().await?;
            }
        }

        let location = match (self.spilled, self.backend.clone()) {
            (false, Some(name)) => StorageLocation::Backend(name),
            _ => StorageLocation::Pending,
        };

        let record = ObjectRecord {
            token: self.token.clone(),
            original_name: self.original_name.clone(),
            safe_name: sanitize_name(&self.original_name),
            mime_type: self.mime_type.clone(),
            byte_size: self.total,
            created_at: Utc::now(),
            location,
        };

        if record.location == StorageLocation::Pending {
            let payload = self.assemble();
            self.pending.stage(&record, &payload).await?;
        }

        self.repo.upsert(record.clone()).await.map_err(|e| match e {
            PoolError::TooLarge(msg) => WriteError::BackendCapacity(msg),
            other => WriteError::NoStorage(other.to_string()),
        })?;

        Ok(record)
    }

    async fn store_inline(&mut self) -> Result<(), WriteError> {
        let token = self.token.clone();
        let data = Bytes::copy_from_slice(&self.tail);
        let result = self
            .pool
            .for_each_in_order(|backend| {
                let token = token.clone();
                let data = data.clone();
                async move { backend.put_blob(&token, data).await }
            })
            .await;

        match result {
            Ok((winner, ())) => {
                self.backend = Some(winner.name().to_string());
                Ok(())
            }
            Err(PoolError::TooLarge(msg)) => Err(WriteError::BackendCapacity(msg)),
            Err(e) => {
                tracing::warn!(token = %self.token, error = %e, "no backend accepted object; spilling to pending tier");
                self.spilled = true;
                Ok(())
            }
        }
    }

    async fn flush_ready(&mut self) -> Result<(), WriteError> {
        while !self.spilled && self.persisted < self.chunks.len() {
            let seq = self.persisted;
            let data = self.chunks[seq].clone();
            let prior: Vec<Bytes> = self.chunks[..seq].to_vec();
            let token = self.token.clone();
            let pinned = self.backend.clone();

            let result = self
                .pool
                .for_each_in_order(|backend| {
                    let token = token.clone();
                    let data = data.clone();
                    let prior = prior.clone();
                    let pinned = pinned.clone();
                    async move {
                        // A backend that doesn't hold this token's earlier
                        // chunks gets them replayed first, so the complete
                        // sequence always lives in a single backend.
                        if pinned.as_deref() != Some(backend.name()) {
                            for (i, chunk) in prior.iter().enumerate() {
                                backend.put_chunk(&token, i as u32, chunk.clone()).await?;
                            }
                        }
                        backend.put_chunk(&token, seq as u32, data).await
                    }
                })
                .await;

            match result {
                Ok((winner, ())) => {
                    let winner = winner.name().to_string();
                    if let Some(old) = self.backend.clone() {
                        if old != winner {
                            tracing::warn!(
                                token = %self.token,
                                from = %old,
                                to = %winner,
                                "mid-stream failover; replayed earlier chunks"
                            );
                            self.abandon(&old).await;
                        }
                    }
                    self.backend = Some(winner);
                    self.persisted += 1;
                }
                Err(PoolError::TooLarge(msg)) => {
                    return Err(WriteError::BackendCapacity(msg));
                }
                Err(e) => {
                    tracing::warn!(
                        token = %self.token,
                        error = %e,
                        "all backends failed mid-stream; switching to pending tier"
                    );
                    if let Some(old) = self.backend.take() {
                        self.abandon(&old).await;
                    }
                    self.spilled = true;
                }
            }
        }
        Ok(())
    }

    /// Drop whatever this session already persisted. Called when an upload
    /// fails after bytes were written, so a dead token leaves no rows behind.
    pub async fn abort(self) {
        if let Some(backend) = self.backend.clone() {
            self.abandon(&backend).await;
        }
    }

    /// Best-effort cleanup of a partial sequence left on a backend the
    /// session moved away from. The reader also rejects sequences whose
    /// summed size disagrees with the metadata, so a failed cleanup cannot
    /// serve truncated bytes.
    async fn abandon(&self, backend_name: &str) {
        if let Some(backend) = self.pool.get(backend_name) {
            if let Err(e) = backend.delete_object(&self.token).await {
                tracing::warn!(
                    backend = backend_name,
                    token = %self.token,
                    error = %e,
                    "failed to clean up abandoned partial sequence"
                );
            }
        }
    }

    fn assemble(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.total as usize);
        for chunk in &self.chunks {
            payload.extend_from_slice(chunk);
        }
        payload.extend_from_slice(&self.tail);
        payload
    }
}
