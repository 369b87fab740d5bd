//! Defines routes for the upload gateway.
//!
//! ## Structure
//! - **Upload endpoints** (`/uploads`)
//!   - `POST   /uploads/file`              upload one multipart `file`
//!   - `POST   /uploads/files`             upload many multipart `files` (`?isolate=`)
//!   - `GET    /uploads/files`             list objects under `?prefix=` with read URLs
//!   - `GET    /uploads/download`          stream `?path=` as an attachment
//!   - `GET    /uploads/view`              stream `?path=` inline
//!   - `GET    /uploads/file/info`         metadata and read URL for `?path=`
//!   - `DELETE /uploads/delete`            delete `?path=`
//!   - `GET    /uploads/presigned-url`     read URL for an existing `?path=`
//!   - `POST   /uploads/presigned-upload`  write URL for `?fileName=&dir=`
//!   - `GET    /uploads/health`            service status
//!
//! - **Signed access** (local backend)
//!   - `GET|PUT /signed/{*key}`
//!
//! The wildcard `*key` allows nested keys like `invoices/202404/scan.pdf`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{
            delete_file, download_file, file_info, health, list_files, presigned_upload,
            presigned_url, upload_file, upload_files, view_file,
        },
        signed_handlers::{signed_get, signed_put},
    },
    services::Gateway,
};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Build and return the router for every gateway route.
///
/// The router carries shared state (`Gateway`) to all handlers.
pub fn routes() -> Router<Gateway> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload surface
        .route("/uploads/file", post(upload_file))
        .route("/uploads/files", post(upload_files).get(list_files))
        .route("/uploads/download", get(download_file))
        .route("/uploads/view", get(view_file))
        .route("/uploads/file/info", get(file_info))
        .route("/uploads/delete", delete(delete_file))
        .route("/uploads/presigned-url", get(presigned_url))
        .route("/uploads/presigned-upload", post(presigned_upload))
        .route("/uploads/health", get(health))
        // URLs minted by the local signer
        .route("/signed/{*key}", get(signed_get).put(signed_put))
}
