use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of a sanitized filename, in characters.
const MAX_SAFE_NAME_LEN: usize = 120;

/// Which tier currently holds an object's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageLocation {
    /// A configured backend, identified by its stable name in the pool.
    Backend(String),
    /// The local-disk staging area; the object has not reached a backend yet.
    Pending,
}

impl StorageLocation {
    pub fn as_label(&self) -> String {
        match self {
            StorageLocation::Backend(name) => name.clone(),
            StorageLocation::Pending => "pending".to_string(),
        }
    }
}

/// One metadata record per token, stored in every backend that accepts it
/// and mirrored in the in-memory cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub token: String,
    pub original_name: String,
    pub safe_name: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub created_at: DateTime<Utc>,
    pub location: StorageLocation,
}

/// Make a filename path-safe: non `[A-Za-z0-9._-]` characters become `_`,
/// length is capped, empty input falls back to "file".
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_SAFE_NAME_LEN)
        .collect();

    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}
