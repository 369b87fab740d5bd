//! src/store/local.rs
//!
//! LocalStore: a single-bucket blob store backed by SQLite for metadata and
//! local disk for payloads sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{blob_id}`. Signed URLs are HMAC tokens
//! the gateway verifies itself on `/signed/{*key}`.
//!
//! Every put writes a fresh blob and then swaps the row's `blob_id` in one
//! statement, so the row always names a complete payload. The blob it
//! displaced is removed only after the swap commits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use md5::Context;
use sqlx::{
    FromRow, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    BlobStore, ByteStream, ListEntry, ObjectMeta, StoreError, StoreResult, signing::UrlSigner,
};
use crate::{models::signed_url::UrlMethod, services::key_policy};

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(FromRow)]
struct ObjectRow {
    key: String,
    content_type: String,
    size_bytes: i64,
    etag: Option<String>,
    last_modified: DateTime<Utc>,
}

/// Row returned by the upsert: the new metadata plus the blob it displaced.
#[derive(FromRow)]
struct WrittenRow {
    #[sqlx(flatten)]
    object: ObjectRow,
    previous_blob_id: Option<String>,
}

impl From<ObjectRow> for ObjectMeta {
    fn from(row: ObjectRow) -> Self {
        Self {
            key: row.key,
            size: row.size_bytes,
            content_type: row.content_type,
            last_modified: row.last_modified,
            etag: row.etag,
        }
    }
}

#[derive(Clone)]
pub struct LocalStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    bucket: String,
    signer: UrlSigner,
}

impl LocalStore {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        bucket: impl Into<String>,
        signer: UrlSigner,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            bucket: bucket.into(),
            signer,
        }
    }

    /// Open (creating if needed) the SQLite database at `database_url`,
    /// apply the schema and return a store rooted at `base_path`.
    pub async fn connect(
        database_url: &str,
        base_path: impl Into<PathBuf>,
        bucket: impl Into<String>,
        signer: UrlSigner,
    ) -> StoreResult<Self> {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .trim_start_matches("file:");
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                debug!("created database directory {}", parent.display());
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        run_migrations(&pool).await?;

        Ok(Self::new(Arc::new(pool), base_path, bucket, signer))
    }

    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        key_policy::validate_key(key).map_err(|_| StoreError::InvalidKey(key.to_string()))
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket)
    }

    /// Two-level shard directories from MD5(bucket/blob_id), 00-ff each.
    fn blob_shards(bucket_name: &str, blob_id: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, blob_id));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn blob_path(&self, blob_id: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::blob_shards(&self.bucket, blob_id);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(blob_id);
        path
    }

    async fn fetch_blob_id(&self, bucket_id: &str, key: &str) -> StoreResult<String> {
        sqlx::query_scalar::<_, String>(
            "SELECT blob_id FROM objects WHERE bucket_id = ? AND key = ?",
        )
        .bind(bucket_id)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })
    }

    /// Remove a blob that no row points at any more, then its empty shard
    /// directories.
    async fn discard_blob(&self, blob_id: &str) -> io::Result<()> {
        let path = self.blob_path(blob_id);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed blob {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", path.display());
            }
            Err(err) => return Err(err),
        }
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn bucket_id(&self) -> StoreResult<String> {
        sqlx::query_scalar::<_, String>("SELECT id FROM buckets WHERE name = ?")
            .bind(&self.bucket)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| StoreError::BucketNotFound(self.bucket.clone()))
    }

    async fn fetch_object(&self, bucket_id: &str, key: &str) -> StoreResult<ObjectRow> {
        sqlx::query_as::<_, ObjectRow>(
            "SELECT key, content_type, size_bytes, etag, last_modified
             FROM objects WHERE bucket_id = ? AND key = ?",
        )
        .bind(bucket_id)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })
    }

    /// Stream the payload into a new blob file, returning `(size, md5 hex)`.
    /// The file is removed on any error.
    async fn write_payload(
        &self,
        blob_path: &Path,
        mut body: ByteStream,
    ) -> StoreResult<(i64, String)> {
        let mut file = File::create(blob_path).await?;
        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();

        let result: io::Result<()> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                size_bytes += chunk.len() as i64;
                digest.consume(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(blob_path).await;
            return Err(StoreError::Io(err));
        }
        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    /// Remove empty shard directories up to (not including) the bucket root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let stop = self.bucket_root();
        let mut current = start.to_path_buf();
        while current.starts_with(&stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> StoreResult<bool> {
        match self.bucket_id().await {
            Ok(_) => Ok(fs::try_exists(self.bucket_root()).await?),
            Err(StoreError::BucketNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn make_bucket(&self) -> StoreResult<()> {
        fs::create_dir_all(self.bucket_root()).await?;
        sqlx::query("INSERT OR IGNORE INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(&self.bucket)
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        size: Option<u64>,
        content_type: &str,
    ) -> StoreResult<ObjectMeta> {
        self.ensure_key_safe(key)?;
        let bucket_id = self.bucket_id().await?;

        let blob_id = Uuid::new_v4().to_string();
        let blob_path = self.blob_path(&blob_id);
        let parent = blob_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let (size_bytes, etag) = self.write_payload(&blob_path, body).await?;
        if let Some(declared) = size {
            if declared as i64 != size_bytes {
                debug!(
                    "declared size {} for {} differs from streamed {}",
                    declared, key, size_bytes
                );
            }
        }

        let written = sqlx::query_as::<_, WrittenRow>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, blob_id, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                previous_blob_id = objects.blob_id,
                blob_id = excluded.blob_id,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING key, content_type, size_bytes, etag, last_modified, previous_blob_id
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&bucket_id)
        .bind(key)
        .bind(&blob_id)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        let written = match written {
            Ok(written) => written,
            Err(err) => {
                // The row still names the previous blob; only ours goes.
                let _ = fs::remove_file(&blob_path).await;
                self.prune_empty_dirs(&parent).await;
                return Err(StoreError::Sqlx(err));
            }
        };

        if let Some(previous) = written.previous_blob_id.as_deref() {
            if let Err(err) = self.discard_blob(previous).await {
                warn!("failed to remove replaced blob {} of {}: {}", previous, key, err);
            }
        }
        Ok(written.object.into())
    }

    async fn get(&self, key: &str) -> StoreResult<ByteStream> {
        self.ensure_key_safe(key)?;
        let bucket_id = self.bucket_id().await?;

        // A concurrent put may discard the blob between the lookup and the
        // open; the row then names its successor.
        let mut blob_id = self.fetch_blob_id(&bucket_id, key).await?;
        let mut retried = false;
        loop {
            match File::open(self.blob_path(&blob_id)).await {
                Ok(file) => return Ok(ReaderStream::new(file).boxed()),
                Err(err) if err.kind() == ErrorKind::NotFound && !retried => {
                    retried = true;
                    let current = self.fetch_blob_id(&bucket_id, key).await?;
                    if current == blob_id {
                        return Err(StoreError::NotFound {
                            key: key.to_string(),
                        });
                    }
                    blob_id = current;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    return Err(StoreError::NotFound {
                        key: key.to_string(),
                    });
                }
                Err(err) => return Err(StoreError::Io(err)),
            }
        }
    }

    async fn stat(&self, key: &str) -> StoreResult<ObjectMeta> {
        self.ensure_key_safe(key)?;
        let bucket_id = self.bucket_id().await?;
        Ok(self.fetch_object(&bucket_id, key).await?.into())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let bucket_id = self.bucket_id().await?;

        let blob_id = sqlx::query_scalar::<_, String>(
            "DELETE FROM objects WHERE bucket_id = ? AND key = ? RETURNING blob_id",
        )
        .bind(&bucket_id)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;

        self.discard_blob(&blob_id).await?;
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>, recursive: bool) -> StoreResult<Vec<ListEntry>> {
        let bucket_id = self.bucket_id().await?;
        let prefix = prefix.unwrap_or("");

        let rows = sqlx::query_as::<_, ObjectRow>(
            "SELECT key, content_type, size_bytes, etag, last_modified
             FROM objects
             WHERE bucket_id = ? AND substr(key, 1, length(?)) = ?
             ORDER BY key ASC",
        )
        .bind(&bucket_id)
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&*self.db)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        let mut common_prefixes = BTreeSet::new();
        for row in rows {
            if !recursive {
                if let Some(dir) = compute_common_prefix(&row.key, prefix, "/") {
                    common_prefixes.insert(dir);
                    continue;
                }
            }
            entries.push(ListEntry {
                key: row.key,
                size: row.size_bytes,
                content_type: Some(row.content_type),
                last_modified: Some(row.last_modified),
                etag: row.etag,
                is_dir: false,
            });
        }
        entries.extend(common_prefixes.into_iter().map(|dir| ListEntry {
            key: dir,
            size: 0,
            content_type: None,
            last_modified: None,
            etag: None,
            is_dir: true,
        }));
        Ok(entries)
    }

    async fn sign_url(
        &self,
        key: &str,
        method: UrlMethod,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<String> {
        self.ensure_key_safe(key)?;
        Ok(self.signer.sign(key, method, expires_at))
    }
}

/// Apply the embedded schema. Every statement is idempotent.
pub async fn run_migrations(db: &SqlitePool) -> StoreResult<()> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    debug!("running {} migration statements", statements.len());
    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

/// Synthetic "directory" for a key: the prefix up to and including the first
/// delimiter after `requested_prefix`, or `None` for a leaf at this level.
fn compute_common_prefix(key: &str, requested_prefix: &str, delimiter: &str) -> Option<String> {
    let after_prefix = key.strip_prefix(requested_prefix)?;
    let pos = after_prefix.find(delimiter)?;
    Some(format!(
        "{}{}",
        requested_prefix,
        &after_prefix[..pos + delimiter.len()]
    ))
}
