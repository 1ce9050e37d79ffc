mod admin;
mod download;
mod upload;

use crate::api::response::ApiError;
use crate::storage::WriteError;

pub use admin::{admin_inspect, admin_migrate, health};
pub use download::{serve_blob, serve_blob_named};
pub use upload::{list_uploads, upload};

/// Map a WriteError to the specific status the uploader can act on.
fn write_error(e: WriteError) -> ApiError {
    match e {
        WriteError::DeclaredTooLarge { .. }
        | WriteError::StreamTooLarge(_)
        | WriteError::BackendCapacity(_) => ApiError::payload_too_large(e.to_string()),
        WriteError::BlockedType(_) => ApiError::bad_request(e.to_string()),
        WriteError::NoStorage(_) => ApiError::unavailable(e.to_string()),
        WriteError::Staging(_) => ApiError::internal(e.to_string()),
    }
}
