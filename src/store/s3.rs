//! S3-compatible blob store (MinIO, AWS) via `rust-s3`.
//!
//! Built without `fail-on-err`, so non-2xx responses come back as `Ok` with a
//! status code and are classified here.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use s3::{Bucket, Region, bucket_ops::BucketConfiguration, creds::Credentials, error::S3Error};
use tokio_util::io::StreamReader;
use tracing::debug;

use super::{BlobStore, ByteStream, ListEntry, ObjectMeta, StoreError, StoreResult};
use crate::models::signed_url::UrlMethod;

/// Longest presign lifetime SigV4 accepts (7 days).
pub const MAX_PRESIGN_SECS: u64 = 7 * 24 * 60 * 60;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

pub struct S3Store {
    settings: S3Settings,
    bucket: Box<Bucket>,
}

impl S3Store {
    pub fn new(settings: S3Settings) -> StoreResult<Self> {
        let bucket = Bucket::new(
            &settings.bucket,
            Self::region(&settings),
            Self::credentials(&settings)?,
        )?;
        let bucket = if settings.path_style {
            bucket.with_path_style()
        } else {
            bucket
        };
        Ok(Self { settings, bucket })
    }

    fn region(settings: &S3Settings) -> Region {
        Region::Custom {
            region: settings.region.clone(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn credentials(settings: &S3Settings) -> StoreResult<Credentials> {
        Credentials::new(
            Some(&settings.access_key),
            Some(&settings.secret_key),
            None,
            None,
            None,
        )
        .map_err(|err| StoreError::Credentials(err.to_string()))
    }

    fn check_status(op: &'static str, key: &str, status: u16) -> StoreResult<()> {
        match status {
            200..=299 => Ok(()),
            404 => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            status => Err(StoreError::Status { op, status }),
        }
    }
}

fn classify(key: &str, err: S3Error) -> StoreError {
    match err {
        S3Error::HttpFailWithBody(404, _) => StoreError::NotFound {
            key: key.to_string(),
        },
        other => StoreError::S3(other),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn trim_etag(raw: String) -> String {
    raw.trim_matches('"').to_string()
}

#[async_trait]
impl BlobStore for S3Store {
    fn bucket(&self) -> &str {
        &self.settings.bucket
    }

    async fn bucket_exists(&self) -> StoreResult<bool> {
        Ok(self.bucket.exists().await?)
    }

    async fn make_bucket(&self) -> StoreResult<()> {
        let region = Self::region(&self.settings);
        let credentials = Self::credentials(&self.settings)?;
        let config = BucketConfiguration::default();
        let response = if self.settings.path_style {
            Bucket::create_with_path_style(&self.settings.bucket, region, credentials, config)
                .await?
        } else {
            Bucket::create(&self.settings.bucket, region, credentials, config).await?
        };
        if !response.success() {
            return Err(StoreError::Status {
                op: "make_bucket",
                status: response.response_code,
            });
        }
        Ok(())
    }

    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        size: Option<u64>,
        content_type: &str,
    ) -> StoreResult<ObjectMeta> {
        debug!("PUT {} ({:?} bytes, {})", key, size, content_type);
        let mut reader = StreamReader::new(body);
        let response = self
            .bucket
            .put_object_stream_with_content_type(&mut reader, key, content_type)
            .await
            .map_err(|err| classify(key, err))?;
        Self::check_status("put", key, response.status_code())?;

        // The multipart response carries no object metadata; read it back.
        self.stat(key).await
    }

    async fn get(&self, key: &str) -> StoreResult<ByteStream> {
        debug!("GET {}", key);
        let response = self
            .bucket
            .get_object(key)
            .await
            .map_err(|err| classify(key, err))?;
        Self::check_status("get", key, response.status_code())?;
        let bytes: Bytes = response.bytes().clone();
        Ok(stream::once(async move { Ok(bytes) }).boxed())
    }

    async fn stat(&self, key: &str) -> StoreResult<ObjectMeta> {
        let (head, status) = self
            .bucket
            .head_object(key)
            .await
            .map_err(|err| classify(key, err))?;
        Self::check_status("stat", key, status)?;

        Ok(ObjectMeta {
            key: key.to_string(),
            size: head.content_length.unwrap_or_default(),
            content_type: head
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            last_modified: head
                .last_modified
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
            etag: head.e_tag.map(trim_etag),
        })
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        debug!("DELETE {}", key);
        let response = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|err| classify(key, err))?;
        Self::check_status("delete", key, response.status_code())
    }

    async fn list(&self, prefix: Option<&str>, recursive: bool) -> StoreResult<Vec<ListEntry>> {
        let delimiter = if recursive { None } else { Some("/".to_string()) };
        let pages = self
            .bucket
            .list(prefix.unwrap_or_default().to_string(), delimiter)
            .await?;

        let mut entries = Vec::new();
        for page in pages {
            entries.extend(page.contents.into_iter().map(|object| ListEntry {
                // Zero-byte keys ending in `/` are folder markers made by consoles.
                is_dir: object.key.ends_with('/'),
                size: object.size as i64,
                content_type: None,
                last_modified: parse_timestamp(&object.last_modified),
                etag: object.e_tag.map(trim_etag),
                key: object.key,
            }));
            entries.extend(
                page.common_prefixes
                    .unwrap_or_default()
                    .into_iter()
                    .map(|common| ListEntry {
                        key: common.prefix,
                        size: 0,
                        content_type: None,
                        last_modified: None,
                        etag: None,
                        is_dir: true,
                    }),
            );
        }
        Ok(entries)
    }

    async fn sign_url(
        &self,
        key: &str,
        method: UrlMethod,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<String> {
        // SigV4 takes a relative lifetime; round up so the URL never lapses
        // before `expires_at`.
        let millis = (expires_at - Utc::now()).num_milliseconds();
        let secs = (millis + 999).div_euclid(1000);
        if secs <= 0 || secs as u64 > MAX_PRESIGN_SECS {
            return Err(StoreError::Signing {
                key: key.to_string(),
                reason: format!("lifetime of {}s outside 1..={}s", secs, MAX_PRESIGN_SECS),
            });
        }
        let signed = match method {
            UrlMethod::Read => self.bucket.presign_get(key, secs as u32, None).await,
            UrlMethod::Write => self.bucket.presign_put(key, secs as u32, None, None).await,
        };
        signed.map_err(|err| StoreError::Signing {
            key: key.to_string(),
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> S3Settings {
        S3Settings {
            endpoint: "http://127.0.0.1:9000/".into(),
            region: "us-east-1".into(),
            bucket: "uploads".into(),
            access_key: "minioadmin".into(),
            secret_key: "minioadmin".into(),
            path_style: true,
        }
    }

    #[test]
    fn status_codes_are_classified() {
        assert!(S3Store::check_status("stat", "k", 200).is_ok());
        assert!(S3Store::check_status("stat", "k", 404).unwrap_err().is_not_found());
        assert!(matches!(
            S3Store::check_status("put", "k", 503),
            Err(StoreError::Status { op: "put", status: 503 })
        ));
    }

    #[test]
    fn timestamps_in_either_s3_format_parse() {
        assert!(parse_timestamp("2024-04-01T10:00:00.000Z").is_some());
        assert!(parse_timestamp("Mon, 01 Apr 2024 10:00:00 GMT").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[tokio::test]
    async fn presign_distinguishes_read_and_write() {
        let store = S3Store::new(settings()).unwrap();
        let in_one_hour = Utc::now() + chrono::Duration::seconds(3600);
        let read = store
            .sign_url("202404/report.pdf", UrlMethod::Read, in_one_hour)
            .await
            .unwrap();
        let write = store
            .sign_url("202404/report.pdf", UrlMethod::Write, in_one_hour)
            .await
            .unwrap();

        assert!(read.starts_with("http://127.0.0.1:9000/uploads/202404/report.pdf?"));
        assert!(read.contains("X-Amz-Expires=3600"));
        assert_ne!(read, write);
    }

    #[tokio::test]
    async fn presign_rejects_lifetime_beyond_sigv4_limit() {
        let store = S3Store::new(settings()).unwrap();
        let too_far = Utc::now() + chrono::Duration::seconds(MAX_PRESIGN_SECS as i64 + 1);
        let err = store
            .sign_url("k", UrlMethod::Read, too_far)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Signing { .. }));

        let past = Utc::now() - chrono::Duration::seconds(1);
        let err = store.sign_url("k", UrlMethod::Read, past).await.unwrap_err();
        assert!(matches!(err, StoreError::Signing { .. }));
    }
}
