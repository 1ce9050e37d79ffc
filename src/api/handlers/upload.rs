use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::write_error;
use crate::api::response::{ApiError, AppQuery, JSendPaginated, Pagination};
use crate::storage::ObjectRecord;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub token: String,
    pub url: String,
    #[serde(rename = "sharePath")]
    pub share_path: String,
    pub info: ObjectInfo,
}

#[derive(Debug, Serialize)]
pub struct ObjectInfo {
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: u64,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    pub location: String,
}

impl ObjectInfo {
    fn from_record(record: &ObjectRecord) -> Self {
        ObjectInfo {
            name: record.safe_name.clone(),
            mime_type: record.mime_type.clone(),
            size: record.byte_size,
            created_at: record.created_at.to_rfc3339(),
            location: record.location.as_label(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadListItem {
    pub token: String,
    #[serde(rename = "sharePath")]
    pub share_path: String,
    pub info: ObjectInfo,
}

#[derive(Debug, Deserialize)]
pub struct ListUploadsParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    20
}

/// Multipart boundaries and part headers inflate `Content-Length` past the
/// object itself, so the up-front size check discounts that much framing; an
/// upload sitting exactly at the limit must not be rejected for its
/// envelope. The streamed per-session limit enforces the real cap.
const MULTIPART_FRAMING_ALLOWANCE: u64 = 64 * 1024;

fn declared_object_size(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|body_len| body_len.saturating_sub(MULTIPART_FRAMING_ALLOWANCE))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /upload: stream the multipart `file` field into chunked storage.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let declared_size = declared_object_size(&headers);

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().map(|s| s.to_string());
        let content_type = field.content_type().map(|s| s.to_string());

        let mut session = state
            .writer
            .begin(file_name, content_type, declared_size)
            .await
            .map_err(write_error)?;

        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    session.abort().await;
                    return Err(ApiError::bad_request(format!("Failed to read file: {e}")));
                }
            };
            if let Err(e) = session.push(&chunk).await {
                session.abort().await;
                return Err(write_error(e));
            }
        }

        let record = session.finish().await.map_err(write_error)?;
        let share_path = format!("/TF-{}", record.token);

        tracing::debug!(
            token = %record.token,
            size = record.byte_size,
            location = %record.location.as_label(),
            "upload stored"
        );

        return Ok(Json(UploadResponse {
            token: record.token.clone(),
            url: format!("{}{share_path}", state.config.public_base_url),
            share_path,
            info: ObjectInfo::from_record(&record),
        }));
    }

    Err(ApiError::bad_request("file field is required"))
}

/// GET /uploads: newest-first metadata listing, deduplicated by token.
pub async fn list_uploads(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<ListUploadsParams>,
) -> Result<Json<JSendPaginated<UploadListItem>>, ApiError> {
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }

    let (records, total) = state
        .repo
        .list(params.limit as usize, params.offset as usize)
        .await;

    let items = records
        .iter()
        .map(|record| UploadListItem {
            token: record.token.clone(),
            share_path: format!("/TF-{}", record.token),
            info: ObjectInfo::from_record(record),
        })
        .collect();

    Ok(JSendPaginated::success(
        items,
        Pagination {
            limit: params.limit,
            offset: params.offset,
            total: total as u64,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn declared_size_discounts_multipart_framing() {
        let limit: u64 = 50 * 1024 * 1024;
        let framed = limit + 512; // boundary plus part headers

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&framed.to_string()).unwrap(),
        );

        // An object exactly at the limit must survive the up-front check.
        assert!(declared_object_size(&headers).unwrap() <= limit);
    }

    #[test]
    fn declared_size_absent_or_garbled_is_none() {
        assert_eq!(declared_object_size(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("a lot"));
        assert_eq!(declared_object_size(&headers), None);
    }

    #[test]
    fn tiny_bodies_do_not_underflow() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("100"));
        assert_eq!(declared_object_size(&headers), Some(0));
    }
}
