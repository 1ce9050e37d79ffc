use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::api::response::{ApiError, JSend};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct MigrateResponse {
    pub backends: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct InspectResponse {
    pub token: String,
    pub cached: Option<serde_json::Value>,
    pub backends: Vec<serde_json::Value>,
    pub pending: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Liveness only; does not depend on backend health.
pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /admin/migrate: force schema bootstrap on every backend.
pub async fn admin_migrate(
    State(state): State<Arc<AppState>>,
) -> Json<JSend<MigrateResponse>> {
    let mut backends = Vec::new();
    for backend in state.pool.handles() {
        let result = match backend.ensure_schema().await {
            Ok(()) => serde_json::json!({ "backend": backend.name(), "status": "ok" }),
            Err(e) => {
                serde_json::json!({ "backend": backend.name(), "status": "error", "error": e.to_string() })
            }
        };
        backends.push(result);
    }

    tracing::info!("forced schema migration across {} backends", backends.len());
    JSend::success(MigrateResponse { backends })
}

/// GET /admin/objects/{token}: where does this token live, across every
/// backend and the pending tier? Operational debugging only.
pub async fn admin_inspect(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<JSend<InspectResponse>>, ApiError> {
    let cached = state
        .repo
        .get(&token)
        .await
        .and_then(|record| serde_json::to_value(record).ok());

    let mut backends = Vec::new();
    for backend in state.pool.handles() {
        let record = backend.get_record(&token).await;
        let blob = backend.get_blob(&token).await;
        let chunks = backend.chunk_sizes(&token).await;

        backends.push(serde_json::json!({
            "backend": backend.name(),
            "record": match &record {
                Ok(r) => serde_json::json!(r.is_some()),
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            },
            "blob_bytes": match &blob {
                Ok(Some(b)) => serde_json::json!(b.len()),
                Ok(None) => serde_json::json!(null),
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            },
            "chunks": match &chunks {
                Ok(sizes) => serde_json::json!(sizes),
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            },
        }));
    }

    let pending = state
        .pending
        .exists(&token)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(JSend::success(InspectResponse {
        token,
        cached,
        backends,
        pending,
    }))
}
