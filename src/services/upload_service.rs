//! Upload orchestration: name → key → probe → put → signed read URL.

use bytes::Bytes;
use chrono::Utc;
use clap::ValueEnum;
use futures::{StreamExt, TryStreamExt, stream};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::info;

use crate::{
    errors::{GatewayError, GatewayResult},
    models::{
        signed_url::{SignedUrl, UrlMethod},
        upload::{UploadOutcome, UploadResult},
    },
    services::{
        existence_probe::ExistenceProbe,
        key_policy::{self, KeyPolicy},
        url_issuer::UrlIssuer,
    },
    store::{BlobStore, ByteStream, StoreError},
};

/// Default per-file ceiling: 100 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// How a batch reacts to a failing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BatchMode {
    /// Stop at the first failure; earlier items stay stored.
    #[default]
    FailFast,
    /// Attempt every item and report each outcome.
    Isolated,
}

/// One file handed to the orchestrator.
pub struct FileUpload {
    pub original_name: Option<String>,
    pub content_type: Option<String>,
    /// Declared length, `None` when unknown.
    pub size: Option<u64>,
    pub body: ByteStream,
}

impl FileUpload {
    /// A fully buffered file, e.g. a decoded multipart field.
    pub fn from_bytes(
        original_name: Option<String>,
        content_type: Option<String>,
        bytes: Bytes,
    ) -> Self {
        Self {
            original_name,
            content_type,
            size: Some(bytes.len() as u64),
            body: stream::once(async move { Ok(bytes) }).boxed(),
        }
    }
}

/// Per-item outcome of an isolated batch.
pub struct BatchItem {
    pub original_name: Option<String>,
    pub result: GatewayResult<UploadResult>,
}

#[derive(Clone)]
pub struct UploadService {
    store: Arc<dyn BlobStore>,
    key_policy: KeyPolicy,
    probe: ExistenceProbe,
    urls: UrlIssuer,
    max_upload_bytes: u64,
}

impl UploadService {
    pub fn new(
        store: Arc<dyn BlobStore>,
        key_policy: KeyPolicy,
        probe: ExistenceProbe,
        urls: UrlIssuer,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            store,
            key_policy,
            probe,
            urls,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Store one file. Rejects empty or oversized input before touching the
    /// store; the put is a full overwrite and is never retried here.
    pub async fn upload_one(
        &self,
        file: FileUpload,
        dir_hint: Option<&str>,
    ) -> GatewayResult<UploadResult> {
        let FileUpload {
            original_name,
            content_type,
            size,
            body,
        } = file;

        match size {
            Some(0) => return Err(empty_upload()),
            Some(size) if size > self.max_upload_bytes => {
                return Err(GatewayError::SizeLimitExceeded {
                    size,
                    limit: self.max_upload_bytes,
                });
            }
            _ => {}
        }
        let body = match size {
            Some(_) => body,
            None => ensure_not_empty(body).await?,
        };

        let key = self
            .key_policy
            .derive_key(original_name.as_deref(), dir_hint, Utc::now());
        let content_type = content_type
            .filter(|ct| !ct.trim().is_empty())
            .or_else(|| {
                original_name
                    .as_deref()
                    .and_then(|name| mime_guess::from_path(name).first_raw())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());

        let replacing = self.probe.exists(&key).await?;
        if replacing {
            info!("file exists, will be replaced: {}", key);
        }

        let overflow = Arc::new(AtomicBool::new(false));
        let body = match size {
            Some(_) => body,
            None => limit_stream(body, self.max_upload_bytes, overflow.clone()),
        };

        let stored = self
            .store
            .put(&key, body, size, &content_type)
            .await
            .map_err(|source| match source {
                _ if overflow.load(Ordering::SeqCst) => GatewayError::SizeLimitExceeded {
                    size: self.max_upload_bytes + 1,
                    limit: self.max_upload_bytes,
                },
                StoreError::InvalidKey(key) => {
                    GatewayError::InvalidInput(format!("invalid object key `{}`", key))
                }
                source => GatewayError::UploadFailed {
                    key: key.clone(),
                    source,
                },
            })?;

        let outcome = if replacing {
            UploadOutcome::Replaced
        } else {
            UploadOutcome::Created
        };
        info!(
            "file {} successfully: {}",
            match outcome {
                UploadOutcome::Created => "uploaded",
                UploadOutcome::Replaced => "replaced",
            },
            key
        );

        let signed_read_url = self.urls.issue(&key, UrlMethod::Read).await?;

        Ok(UploadResult {
            key,
            original_name,
            content_type,
            size: stored.size,
            signed_read_url,
            outcome,
        })
    }

    /// Store files one after another, stopping at the first failure.
    ///
    /// There is no rollback: files stored before the failing one stay in the
    /// store and files after it are never attempted.
    pub async fn upload_many(
        &self,
        files: Vec<FileUpload>,
        dir_hint: Option<&str>,
    ) -> GatewayResult<Vec<UploadResult>> {
        let mut results = Vec::with_capacity(files.len());
        for file in files {
            results.push(self.upload_one(file, dir_hint).await?);
        }
        Ok(results)
    }

    /// Store files one after another, recording each outcome and carrying on
    /// past failures.
    pub async fn upload_each(
        &self,
        files: Vec<FileUpload>,
        dir_hint: Option<&str>,
    ) -> Vec<BatchItem> {
        let mut items = Vec::with_capacity(files.len());
        for file in files {
            let original_name = file.original_name.clone();
            let result = self.upload_one(file, dir_hint).await;
            items.push(BatchItem {
                original_name,
                result,
            });
        }
        items
    }

    /// Sign a write URL for a client-side upload of `file_name` under
    /// `dir_hint`. The client's name is kept as-is, so the joined key must
    /// pass key validation.
    pub async fn presign_upload(
        &self,
        file_name: &str,
        dir_hint: Option<&str>,
    ) -> GatewayResult<(String, SignedUrl)> {
        let key = key_policy::join_dir(dir_hint, file_name.trim());
        key_policy::validate_key(&key)
            .map_err(|reason| GatewayError::InvalidInput(format!("{}: `{}`", reason, key)))?;
        let url = self.urls.issue(&key, UrlMethod::Write).await?;
        info!("issued upload url for {}", key);
        Ok((key, url))
    }
}

fn empty_upload() -> GatewayError {
    GatewayError::InvalidInput("Please select a file to upload".into())
}

/// Pull chunks until one carries data. An exhausted stream means the upload
/// was empty; otherwise the chunk is put back in front of the rest.
async fn ensure_not_empty(mut body: ByteStream) -> GatewayResult<ByteStream> {
    loop {
        match body.next().await {
            None => return Err(empty_upload()),
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(chunk)) => {
                return Ok(stream::once(async move { Ok(chunk) }).chain(body).boxed());
            }
            Some(Err(err)) => {
                return Err(GatewayError::InvalidInput(format!(
                    "could not read upload body: {}",
                    err
                )));
            }
        }
    }
}

/// Fail the stream once more than `limit` bytes have passed through,
/// flagging `overflow` so the caller can tell a size breach from a store
/// failure.
pub(crate) fn limit_stream(body: ByteStream, limit: u64, overflow: Arc<AtomicBool>) -> ByteStream {
    let mut seen: u64 = 0;
    body.and_then(move |chunk| {
        seen += chunk.len() as u64;
        let result = if seen > limit {
            overflow.store(true, Ordering::SeqCst);
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("upload exceeds {} bytes", limit),
            ))
        } else {
            Ok(chunk)
        };
        async move { result }
    })
    .boxed()
}
