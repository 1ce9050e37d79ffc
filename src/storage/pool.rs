use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use super::backend::{BackendError, StorageBackend};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no storage backend configured")]
    Empty,
    /// Fails fast: oversized payloads are never retried against other
    /// backends and never redirected to the pending tier.
    #[error("payload too large: {0}")]
    TooLarge(String),
    #[error("all {attempted} backends failed, last error: {last}")]
    Exhausted { attempted: usize, last: BackendError },
}

/// Ordered set of storage backends.
///
/// Reads and writes probe backends in the same configured priority order, so
/// the earliest healthy backend always wins. A single backend's failure is
/// converted into try-the-next-one control flow; only exhaustion of the whole
/// list surfaces to the caller, as one aggregate error.
pub struct BackendPool {
    handles: Vec<Arc<dyn StorageBackend>>,
}

impl BackendPool {
    pub fn new(handles: Vec<Arc<dyn StorageBackend>>) -> Self {
        Self { handles }
    }

    pub fn handles(&self) -> &[Arc<dyn StorageBackend>] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageBackend>> {
        self.handles
            .iter()
            .find(|b| b.name() == name)
            .map(Arc::clone)
    }

    /// Run `f` against each backend in priority order until one succeeds.
    /// Returns the winning backend alongside the operation's result.
    ///
    /// Per backend, a transient-connection failure triggers one
    /// recreate-and-retry and a schema-mismatch failure triggers one
    /// ensure-schema-and-retry before the pool moves on.
    pub async fn for_each_in_order<T, F, Fut>(
        &self,
        f: F,
    ) -> Result<(Arc<dyn StorageBackend>, T), PoolError>
    where
        F: Fn(Arc<dyn StorageBackend>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        if self.handles.is_empty() {
            return Err(PoolError::Empty);
        }

        let mut last = BackendError::Unavailable("no backend attempted".to_string());
        for backend in &self.handles {
            match try_backend(backend, &f).await {
                Ok(value) => return Ok((Arc::clone(backend), value)),
                Err(BackendError::TooLarge(msg)) => return Err(PoolError::TooLarge(msg)),
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "backend failed, advancing");
                    last = e;
                }
            }
        }

        Err(PoolError::Exhausted {
            attempted: self.handles.len(),
            last,
        })
    }
}

async fn try_backend<T, F, Fut>(
    backend: &Arc<dyn StorageBackend>,
    f: &F,
) -> Result<T, BackendError>
where
    F: Fn(Arc<dyn StorageBackend>) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    match f(Arc::clone(backend)).await {
        Ok(value) => Ok(value),
        Err(BackendError::Unavailable(msg)) => {
            tracing::info!(
                backend = backend.name(),
                error = %msg,
                "recreating backend connection after transient failure"
            );
            backend.recreate().await?;
            f(Arc::clone(backend)).await
        }
        Err(BackendError::SchemaMissing(msg)) => {
            tracing::info!(
                backend = backend.name(),
                missing = %msg,
                "repairing backend schema before retry"
            );
            backend.ensure_schema().await?;
            f(Arc::clone(backend)).await
        }
        Err(e) => Err(e),
    }
}
