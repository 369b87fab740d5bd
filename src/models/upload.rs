//! Per-file upload outcome records.

use serde::Serialize;

use crate::models::signed_url::SignedUrl;

/// Whether the key was free or an earlier object got overwritten.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum UploadOutcome {
    Created,
    Replaced,
}

impl UploadOutcome {
    pub fn message(self) -> &'static str {
        match self {
            UploadOutcome::Created => "File uploaded successfully",
            UploadOutcome::Replaced => "File replaced successfully",
        }
    }
}

/// Result of storing one uploaded file. Derived, never persisted.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    #[serde(rename = "fileName")]
    pub key: String,
    #[serde(rename = "originalFileName")]
    pub original_name: Option<String>,
    pub content_type: String,
    pub size: i64,
    pub signed_read_url: SignedUrl,
    pub outcome: UploadOutcome,
}
