//! Serves URLs minted by [`UrlSigner`](crate::store::signing::UrlSigner).
//!
//! With the S3 backend the store presigns its own URLs and these routes
//! answer 404.

use crate::{
    errors::{AppError, GatewayError},
    handlers::object_handlers::set_object_headers,
    models::{object::StoredObject, signed_url::UrlMethod},
    services::{Gateway, upload_service::limit_stream},
    store::{StoreError, signing::UrlSigner},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub method: String,
    pub expires: i64,
    pub signature: String,
}

fn authorize(
    gateway: &Gateway,
    key: &str,
    expected: UrlMethod,
    q: &SignedQuery,
) -> Result<(), AppError> {
    let signer: &UrlSigner = gateway.local_signer.as_ref().ok_or_else(|| {
        AppError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "signed URLs are not served here")
    })?;
    if UrlMethod::from_http_verb(&q.method) != Some(expected) {
        return Err(AppError::forbidden("URL was not signed for this method"));
    }
    if !signer.verify(key, expected, q.expires, &q.signature, Utc::now()) {
        return Err(AppError::forbidden("invalid or expired signature"));
    }
    Ok(())
}

/// `GET /signed/{*key}`: download through a read URL.
pub async fn signed_get(
    State(gateway): State<Gateway>,
    Path(key): Path<String>,
    Query(q): Query<SignedQuery>,
) -> Result<Response, AppError> {
    authorize(&gateway, &key, UrlMethod::Read, &q)?;

    let meta = gateway
        .store
        .stat(&key)
        .await
        .map_err(|err| GatewayError::from_store("stat", &key, err))?;
    let stream = gateway
        .store
        .get(&key)
        .await
        .map_err(|err| GatewayError::from_store("get", &key, err))?;

    let mut response = Response::new(Body::from_stream(stream));
    set_object_headers(response.headers_mut(), &StoredObject::from(meta));
    Ok(response)
}

/// `PUT /signed/{*key}`: upload through a write URL. The body is streamed
/// straight to the store under the signed key.
pub async fn signed_put(
    State(gateway): State<Gateway>,
    Path(key): Path<String>,
    Query(q): Query<SignedQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    authorize(&gateway, &key, UrlMethod::Write, &q)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| mime_guess::from_path(&key).first_raw().map(str::to_string))
        .unwrap_or_else(|| "application/octet-stream".into());
    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let limit = gateway.uploads.max_upload_bytes();
    if let Some(size) = size.filter(|size| *size > limit) {
        return Err(GatewayError::SizeLimitExceeded { size, limit }.into());
    }

    let overflow = Arc::new(AtomicBool::new(false));
    let stream = limit_stream(
        body.into_data_stream().map_err(io::Error::other).boxed(),
        limit,
        overflow.clone(),
    );

    let meta = gateway
        .store
        .put(&key, stream, size, &content_type)
        .await
        .map_err(|source| match source {
            _ if overflow.load(Ordering::SeqCst) => GatewayError::SizeLimitExceeded {
                size: limit + 1,
                limit,
            },
            StoreError::InvalidKey(key) => {
                GatewayError::InvalidInput(format!("invalid object key `{}`", key))
            }
            source => GatewayError::UploadFailed {
                key: key.clone(),
                source,
            },
        })?;
    tracing::info!("file uploaded through signed url: {}", key);

    Ok((StatusCode::OK, Json(StoredObject::from(meta))))
}
