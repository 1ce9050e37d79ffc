use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Body limit sits above the upload limit so multipart framing overhead
    // never rejects a payload the writer would accept.
    let upload_limit = state.config.max_upload_size as usize + 1024 * 1024;

    Router::new()
        // Uploads
        .route(
            "/upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/uploads", get(handlers::list_uploads))
        // Downloads: the share path is /TF-{token}[/{suggestedName}]. Path
        // params must span whole segments, so the TF- prefix is checked in
        // the handler.
        .route("/:slug", get(handlers::serve_blob))
        .route("/:slug/:name", get(handlers::serve_blob_named))
        // Operational
        .route("/health", get(handlers::health))
        .route("/admin/migrate", post(handlers::admin_migrate))
        .route("/admin/objects/:token", get(handlers::admin_inspect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
