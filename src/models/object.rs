//! Represents an object (file) stored in the bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{models::signed_url::SignedUrl, store::ObjectMeta};

/// A single object (blob) addressed by its key.
///
/// Keys are flat strings; `/` is only a separator convention and the
/// "directories" it implies are inferred from common prefixes.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    /// Object key (path-like identifier within the bucket).
    #[serde(rename = "fileName")]
    pub key: String,

    /// Size in bytes.
    pub size: i64,

    /// Content type (MIME type).
    pub content_type: String,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,

    /// Store-assigned entity tag, if the store reports one.
    pub etag: Option<String>,
}

impl From<ObjectMeta> for StoredObject {
    fn from(meta: ObjectMeta) -> Self {
        Self {
            key: meta.key,
            size: meta.size,
            content_type: meta.content_type,
            last_modified: meta.last_modified,
            etag: meta.etag,
        }
    }
}

/// One entry of a prefix listing with a read URL attached.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ListedObject {
    #[serde(rename = "fileName")]
    pub key: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    #[serde(flatten)]
    pub url: SignedUrl,
}
