use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::response::ApiError;
use crate::storage::models::sanitize_name;
use crate::storage::{RangeSpec, ReadError};
use crate::AppState;

/// GET /TF-{token}
pub async fn serve_blob(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    serve(state, &slug, None, &headers).await
}

/// GET /TF-{token}/{suggestedName}
pub async fn serve_blob_named(
    State(state): State<Arc<AppState>>,
    Path((slug, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    serve(state, &slug, Some(name), &headers).await
}

async fn serve(
    state: Arc<AppState>,
    slug: &str,
    suggested_name: Option<String>,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let token = slug
        .strip_prefix("TF-")
        .ok_or_else(|| ApiError::not_found("Object not found"))?;

    // An unparseable Range header is ignored and the full object served,
    // per the usual lenient convention. A parseable but unsatisfiable one
    // is rejected with the true size below.
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(RangeSpec::parse);

    let result = match state.reader.read(token, range).await {
        Ok(result) => result,
        Err(ReadError::NotFound) => return Err(ApiError::not_found("Object not found")),
        Err(ReadError::Gone) => return Err(ApiError::gone("Object bytes are no longer available")),
        Err(ReadError::Unsatisfiable { total }) => {
            let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            if let Ok(value) = format!("bytes */{total}").parse() {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            return Ok(response);
        }
        Err(ReadError::Storage(e)) => {
            return Err(ApiError::internal(format!("Failed to retrieve object: {e}")))
        }
    };

    let status = if result.range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let body_len = result.body.len();
    let mut response = (status, result.body).into_response();
    let response_headers = response.headers_mut();

    response_headers.insert(
        header::CONTENT_TYPE,
        result
            .record
            .mime_type
            .parse()
            .unwrap_or(header::HeaderValue::from_static("application/octet-stream")),
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        header::HeaderValue::from(body_len as u64),
    );
    response_headers.insert(
        header::ACCEPT_RANGES,
        header::HeaderValue::from_static("bytes"),
    );

    if let Some((start, end)) = result.range {
        if let Ok(value) = format!("bytes {start}-{end}/{}", result.total_size).parse() {
            response_headers.insert(header::CONTENT_RANGE, value);
        }
    }

    let filename = suggested_name
        .map(|n| sanitize_name(&n))
        .unwrap_or_else(|| result.record.safe_name.clone());
    if let Ok(value) = format!("inline; filename=\"{filename}\"").parse() {
        response_headers.insert(header::CONTENT_DISPOSITION, value);
    }

    // Objects are immutable once uploaded.
    response_headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("public, max-age=3600"),
    );

    Ok(response)
}
