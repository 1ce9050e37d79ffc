use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;

use super::models::ObjectRecord;

#[derive(Debug, Error)]
pub enum PendingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sidecar error: {0}")]
    Sidecar(#[from] serde_json::Error),
}

/// A fully staged (data, sidecar) pair on disk.
#[derive(Debug, Clone)]
pub struct StagedObject {
    pub record: ObjectRecord,
    pub data_path: PathBuf,
    pub sidecar_path: PathBuf,
}

/// Last-resort local staging for objects no backend accepted.
///
/// Each staged object is two sibling files named from the token and a
/// timestamp: `<token>-<ts>.bin` (payload) and `<token>-<ts>.json` (record
/// sidecar). The sidecar is written last and is the commit point: a pair
/// missing either file is treated as not staged and skipped, never an error.
pub struct PendingQueue {
    dir: PathBuf,
}

impl PendingQueue {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, PendingError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Durably stage a payload and its record.
    pub async fn stage(&self, record: &ObjectRecord, data: &[u8]) -> Result<(), PendingError> {
        let stamp = record.created_at.timestamp_millis();
        let base = format!("{}-{stamp}", record.token);
        let data_path = self.dir.join(format!("{base}.bin"));
        let sidecar_path = self.dir.join(format!("{base}.json"));

        tokio::fs::write(&data_path, data).await?;
        let sidecar = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&sidecar_path, sidecar).await?;

        tracing::info!(
            token = %record.token,
            bytes = data.len(),
            "staged object in pending tier"
        );
        Ok(())
    }

    /// Enumerate complete staged pairs, oldest first. Incomplete pairs and
    /// undecodable sidecars are skipped.
    pub async fn list_staged(&self) -> Result<Vec<StagedObject>, PendingError> {
        let mut staged = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let sidecar_path = entry.path();
            if sidecar_path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data_path = sidecar_path.with_extension("bin");
            if !data_path.exists() {
                // Crash between the two writes; not yet stageable.
                continue;
            }

            let raw = tokio::fs::read(&sidecar_path).await?;
            let record: ObjectRecord = match serde_json::from_slice(&raw) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(path = %sidecar_path.display(), error = %e, "skipping undecodable sidecar");
                    continue;
                }
            };

            staged.push(StagedObject {
                record,
                data_path,
                sidecar_path,
            });
        }

        staged.sort_by(|a, b| a.sidecar_path.cmp(&b.sidecar_path));
        Ok(staged)
    }

    /// Payload bytes for a staged token, if present.
    pub async fn load(&self, token: &str) -> Result<Option<Bytes>, PendingError> {
        for staged in self.list_staged().await? {
            if staged.record.token == token {
                let data = tokio::fs::read(&staged.data_path).await?;
                return Ok(Some(Bytes::from(data)));
            }
        }
        Ok(None)
    }

    pub async fn exists(&self, token: &str) -> Result<bool, PendingError> {
        Ok(self
            .list_staged()
            .await?
            .iter()
            .any(|s| s.record.token == token))
    }

    /// Move a pair out of the queue without deleting it, for payloads no
    /// backend will ever accept. The renamed files are invisible to
    /// [`PendingQueue::list_staged`] but stay on disk for an operator. The
    /// sidecar moves first, so an interruption leaves an incomplete
    /// (skipped) pair rather than a half-quarantined one.
    pub async fn quarantine(&self, token: &str) -> Result<(), PendingError> {
        for staged in self.list_staged().await? {
            if staged.record.token != token {
                continue;
            }
            let sidecar_to = staged.sidecar_path.with_extension("json.rejected");
            let data_to = staged.data_path.with_extension("bin.rejected");
            tokio::fs::rename(&staged.sidecar_path, &sidecar_to).await?;
            tokio::fs::rename(&staged.data_path, &data_to).await?;
            tracing::warn!(
                token = %token,
                path = %data_to.display(),
                "quarantined staged object"
            );
        }
        Ok(())
    }

    /// Remove both files for a token, called only after a confirmed backend
    /// replay. The sidecar goes first so an interrupted discard leaves an
    /// incomplete (skipped) pair rather than a resurrected one.
    pub async fn discard(&self, token: &str) -> Result<(), PendingError> {
        for staged in self.list_staged().await? {
            if staged.record.token != token {
                continue;
            }
            tokio::fs::remove_file(&staged.sidecar_path).await?;
            tokio::fs::remove_file(&staged.data_path).await?;
        }
        Ok(())
    }
}
