use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use super::meta::MetaRepository;
use super::pending::{PendingError, PendingQueue, StagedObject};
use super::pool::PoolError;
use super::writer::BlobWriter;

#[derive(Debug, Error)]
enum ReconcileError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Pending(#[from] PendingError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct ReconcileStats {
    pub attempted: usize,
    pub replayed: usize,
    /// Pairs moved aside because every backend rejected them as oversized;
    /// retrying those can never succeed.
    pub quarantined: usize,
}

enum Replay {
    Stored,
    Quarantined,
}

/// Background task that drains the pending tier back into backends.
///
/// Passes never overlap: the spawned loop awaits each pass to completion
/// before sleeping again. Failures leave the pair staged for the next tick
/// and are never surfaced to request traffic. Tests call
/// [`Reconciler::run_once`] directly instead of waiting on the clock.
pub struct Reconciler {
    pending: Arc<PendingQueue>,
    writer: Arc<BlobWriter>,
    repo: Arc<MetaRepository>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        pending: Arc<PendingQueue>,
        writer: Arc<BlobWriter>,
        repo: Arc<MetaRepository>,
        interval: Duration,
    ) -> Self {
        Self {
            pending,
            writer,
            repo,
            interval,
        }
    }

    /// Spawn the periodic loop. The handle is aborted at shutdown.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let stats = self.run_once().await;
                if stats.replayed > 0 {
                    tracing::info!(
                        replayed = stats.replayed,
                        attempted = stats.attempted,
                        "reconciled pending objects into backends"
                    );
                }
            }
        })
    }

    /// One full pass over the staged pairs.
    pub async fn run_once(&self) -> ReconcileStats {
        let staged = match self.pending.list_staged().await {
            Ok(staged) => staged,
            Err(e) => {
                tracing::warn!(error = %e, "could not enumerate pending tier");
                return ReconcileStats::default();
            }
        };

        let mut stats = ReconcileStats {
            attempted: staged.len(),
            ..ReconcileStats::default()
        };

        for item in staged {
            match self.replay(&item).await {
                Ok(Replay::Stored) => stats.replayed += 1,
                Ok(Replay::Quarantined) => stats.quarantined += 1,
                Err(e) => {
                    tracing::debug!(
                        token = %item.record.token,
                        error = %e,
                        "replay failed, leaving object staged"
                    );
                }
            }
        }
        stats
    }

    async fn replay(&self, staged: &StagedObject) -> Result<Replay, ReconcileError> {
        let data = Bytes::from(tokio::fs::read(&staged.data_path).await?);
        let location = match self.writer.store_bytes(&staged.record.token, data).await {
            Ok(location) => location,
            Err(PoolError::TooLarge(msg)) => {
                // Not transient: no tick will ever land this payload.
                tracing::warn!(
                    token = %staged.record.token,
                    error = %msg,
                    "every backend rejects this staged payload as oversized"
                );
                self.pending.quarantine(&staged.record.token).await?;
                return Ok(Replay::Quarantined);
            }
            Err(e) => return Err(e.into()),
        };

        let mut record = staged.record.clone();
        record.location = location;
        self.repo.upsert(record).await?;

        self.pending.discard(&staged.record.token).await?;
        Ok(Replay::Stored)
    }
}
