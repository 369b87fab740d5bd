//! Time-bounded, credential-free access URLs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a signed URL lets its holder do.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum UrlMethod {
    /// Download the object (`GET`).
    Read,
    /// Upload the object (`PUT`).
    Write,
}

impl UrlMethod {
    pub fn http_verb(self) -> &'static str {
        match self {
            UrlMethod::Read => "GET",
            UrlMethod::Write => "PUT",
        }
    }

    pub fn from_http_verb(verb: &str) -> Option<Self> {
        match verb {
            "GET" => Some(UrlMethod::Read),
            "PUT" => Some(UrlMethod::Write),
            _ => None,
        }
    }
}

/// A freshly minted URL. Never cached; every issue starts a new lifetime.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub method: UrlMethod,
    pub expires_at: DateTime<Utc>,
}
