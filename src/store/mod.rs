//! Blob store collaborator.
//!
//! The gateway never talks to a storage system directly; it goes through the
//! [`BlobStore`] capability trait. Two backends implement it:
//! - [`s3::S3Store`]: any S3-compatible endpoint (MinIO, AWS) via `rust-s3`.
//! - [`local::LocalStore`]: SQLite metadata plus sharded payload files on
//!   disk, with HMAC-signed URLs served by the gateway itself.

pub mod local;
pub mod s3;
pub mod signing;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;

use crate::models::signed_url::UrlMethod;

/// Owned, sendable stream of object bytes.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Metadata reported by `stat` (and by `put` for the object just written).
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub key: String,
    pub size: i64,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
}

/// One row of a prefix listing.
///
/// `is_dir` marks a synthetic common-prefix entry with no object behind it.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub key: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub is_dir: bool,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{key}` not found")]
    NotFound { key: String },
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("cannot sign `{key}`: {reason}")]
    Signing { key: String, reason: String },
    #[error("store request `{op}` failed with status {status}")]
    Status { op: &'static str, status: u16 },
    #[error("invalid store credentials: {0}")]
    Credentials(String),
    #[error("s3: {0}")]
    S3(#[from] ::s3::error::S3Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Capability interface over a single bucket of a blob store.
///
/// Implementations must be safe to share between concurrent requests; the
/// gateway holds one `Arc<dyn BlobStore>` for its whole lifetime.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Name of the bucket this handle is bound to.
    fn bucket(&self) -> &str;

    async fn bucket_exists(&self) -> StoreResult<bool>;

    async fn make_bucket(&self) -> StoreResult<()>;

    /// Write the whole object, replacing any previous one under `key`.
    /// `size` is `None` when the length is not known up front.
    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        size: Option<u64>,
        content_type: &str,
    ) -> StoreResult<ObjectMeta>;

    async fn get(&self, key: &str) -> StoreResult<ByteStream>;

    /// Returns [`StoreError::NotFound`] when no object lives under `key`.
    async fn stat(&self, key: &str) -> StoreResult<ObjectMeta>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn list(&self, prefix: Option<&str>, recursive: bool) -> StoreResult<Vec<ListEntry>>;

    /// URL granting `method` on `key` until `expires_at`.
    async fn sign_url(
        &self,
        key: &str,
        method: UrlMethod,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<String>;
}
