//! HTTP handlers for the `/uploads` surface.
//! Object bodies are streamed back to the client; every decision about keys,
//! existence and signing is delegated to the gateway services.

use crate::{
    errors::{AppError, GatewayError},
    models::{
        object::{ListedObject, StoredObject},
        signed_url::{SignedUrl, UrlMethod},
        upload::UploadResult,
    },
    services::{
        Gateway,
        upload_service::{BatchMode, FileUpload},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

const SERVICE_NAME: &str = "upload-gateway";

/// `?path=` selecting one stored object.
#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

/// Query params accepted by the upload endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub dir: Option<String>,
    /// Per-request override of the configured batch mode.
    pub isolate: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUploadQuery {
    pub file_name: String,
    pub dir: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    message: &'static str,
    #[serde(flatten)]
    result: UploadResult,
}

impl From<UploadResult> for UploadResponse {
    fn from(result: UploadResult) -> Self {
        Self {
            message: result.outcome.message(),
            result,
        }
    }
}

#[derive(Serialize)]
struct BatchResponse {
    message: &'static str,
    count: usize,
    files: Vec<UploadResponse>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum BatchEntry {
    Stored(UploadResponse),
    #[serde(rename_all = "camelCase")]
    Failed {
        original_file_name: Option<String>,
        error: &'static str,
        message: String,
    },
}

#[derive(Serialize)]
struct IsolatedBatchResponse {
    uploaded: usize,
    failed: usize,
    files: Vec<BatchEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileInfoResponse {
    #[serde(flatten)]
    object: StoredObject,
    #[serde(flatten)]
    url: SignedUrl,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresignedUrlResponse {
    file_name: String,
    #[serde(flatten)]
    url: SignedUrl,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresignedUploadResponse {
    upload_url: String,
    file_name: String,
    method: UrlMethod,
    expires_at: DateTime<Utc>,
    message: &'static str,
}

/// Files and the optional `dir` form field pulled out of a multipart body.
struct MultipartUpload {
    files: Vec<FileUpload>,
    dir: Option<String>,
}

/// Read every field named `file_field` as a file; a text field named `dir`
/// supplies the directory hint. Other fields are ignored.
async fn read_multipart(
    mut multipart: Multipart,
    file_field: &str,
) -> Result<MultipartUpload, AppError> {
    let mut files = Vec::new();
    let mut dir = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == file_field {
            let original_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(multipart_error)?;
            // Browsers send an unnamed, empty part when no file was picked.
            if original_name.as_deref().unwrap_or_default().is_empty() && bytes.is_empty() {
                continue;
            }
            files.push(FileUpload::from_bytes(original_name, content_type, bytes));
        } else if name == "dir" {
            dir = Some(field.text().await.map_err(multipart_error)?);
        }
    }

    Ok(MultipartUpload { files, dir })
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::new(err.status(), "INVALID_MULTIPART", err.body_text())
}

/// The query string wins over the form field.
fn dir_hint<'a>(query: &'a UploadQuery, form: &'a Option<String>) -> Option<&'a str> {
    query
        .dir
        .as_deref()
        .or(form.as_deref())
        .filter(|d| !d.trim().is_empty())
}

/// `POST /uploads/file`: store a single multipart `file`. More than one
/// `file` part is rejected before anything is stored.
pub async fn upload_file(
    State(gateway): State<Gateway>,
    Query(q): Query<UploadQuery>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let MultipartUpload { mut files, dir } = read_multipart(multipart, "file").await?;
    let file = match files.len() {
        0 => return Err(AppError::bad_request("Please select a file to upload")),
        1 => files.swap_remove(0),
        n => {
            return Err(AppError::bad_request(format!(
                "Expected one file but got {}; use /uploads/files for several",
                n
            )));
        }
    };

    let result = gateway.uploads.upload_one(file, dir_hint(&q, &dir)).await?;
    Ok(Json(UploadResponse::from(result)))
}

/// `POST /uploads/files`: store every multipart `files` part.
///
/// Fail-fast by default: the first failure aborts the request and files
/// already stored stay stored. `?isolate=true` reports each file instead.
pub async fn upload_files(
    State(gateway): State<Gateway>,
    Query(q): Query<UploadQuery>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let MultipartUpload { files, dir } = read_multipart(multipart, "files").await?;
    if files.is_empty() {
        return Err(AppError::bad_request("Please select files to upload"));
    }
    let dir = dir_hint(&q, &dir);
    let isolate = q
        .isolate
        .unwrap_or(gateway.batch_mode == BatchMode::Isolated);

    if !isolate {
        let results = gateway.uploads.upload_many(files, dir).await?;
        let body = BatchResponse {
            message: "Files uploaded successfully",
            count: results.len(),
            files: results.into_iter().map(UploadResponse::from).collect(),
        };
        return Ok(Json(body).into_response());
    }

    let items = gateway.uploads.upload_each(files, dir).await;
    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        entries.push(match item.result {
            Ok(result) => BatchEntry::Stored(result.into()),
            Err(err) => {
                let app = AppError::from(err);
                BatchEntry::Failed {
                    original_file_name: item.original_name,
                    error: app.code,
                    message: app.message,
                }
            }
        });
    }
    let failed = entries
        .iter()
        .filter(|e| matches!(e, BatchEntry::Failed { .. }))
        .count();
    let body = IsolatedBatchResponse {
        uploaded: entries.len() - failed,
        failed,
        files: entries,
    };
    let status = if failed == 0 {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(body)).into_response())
}

/// `GET /uploads/download?path=`: stream the object as an attachment.
pub async fn download_file(
    State(gateway): State<Gateway>,
    Query(q): Query<PathQuery>,
) -> Result<Response, AppError> {
    stream_object(&gateway, &q.path, "attachment").await
}

/// `GET /uploads/view?path=`: stream the object for inline display.
pub async fn view_file(
    State(gateway): State<Gateway>,
    Query(q): Query<PathQuery>,
) -> Result<Response, AppError> {
    stream_object(&gateway, &q.path, "inline").await
}

async fn stream_object(
    gateway: &Gateway,
    key: &str,
    disposition: &str,
) -> Result<Response, AppError> {
    let (meta, stream) = gateway.catalog.get(key).await?;

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    set_object_headers(headers, &meta);
    let file_name = key.rsplit('/').next().unwrap_or(key);
    let value = format!(
        "{}; filename=\"{}\"",
        disposition,
        urlencoding::encode(file_name)
    );
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// `DELETE /uploads/delete?path=`
pub async fn delete_file(
    State(gateway): State<Gateway>,
    Query(q): Query<PathQuery>,
) -> Result<impl IntoResponse, AppError> {
    gateway.catalog.delete(&q.path).await?;
    Ok(Json(json!({
        "message": "File deleted successfully",
        "fileName": q.path,
    })))
}

/// `GET /uploads/files?prefix=`: every object under the prefix, each with a
/// fresh read URL.
pub async fn list_files(
    State(gateway): State<Gateway>,
    Query(q): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let listed: Vec<ListedObject> = gateway
        .catalog
        .list(q.prefix.as_deref())
        .await?
        .try_collect()
        .await?;
    Ok(Json(listed))
}

/// `GET /uploads/file/info?path=`
pub async fn file_info(
    State(gateway): State<Gateway>,
    Query(q): Query<PathQuery>,
) -> Result<impl IntoResponse, AppError> {
    let object = gateway.catalog.stat(&q.path).await?;
    let url = gateway.urls.issue(&object.key, UrlMethod::Read).await?;
    Ok(Json(FileInfoResponse { object, url }))
}

/// `GET /uploads/presigned-url?path=`: read URL for an existing object.
pub async fn presigned_url(
    State(gateway): State<Gateway>,
    Query(q): Query<PathQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !gateway.catalog.exists(&q.path).await? {
        return Err(GatewayError::NotFound { key: q.path }.into());
    }
    let url = gateway.urls.issue(&q.path, UrlMethod::Read).await?;
    Ok(Json(PresignedUrlResponse {
        file_name: q.path,
        url,
    }))
}

/// `POST /uploads/presigned-upload?fileName=&dir=`: write URL the client
/// can `PUT` the file body to.
pub async fn presigned_upload(
    State(gateway): State<Gateway>,
    Query(q): Query<PresignedUploadQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (key, url) = gateway
        .uploads
        .presign_upload(&q.file_name, q.dir.as_deref())
        .await?;
    Ok(Json(PresignedUploadResponse {
        upload_url: url.url,
        file_name: key,
        method: url.method,
        expires_at: url.expires_at,
        message: "Use PUT request to upload file to this URL",
    }))
}

/// `GET /uploads/health`
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "UP", "service": SERVICE_NAME }))
}

pub(crate) fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size.max(0)));

    if let Some(etag) = meta.etag.as_ref() {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
