//! Mints signed URLs with a lifetime chosen by intent.
//!
//! Read and write intents are signed with their own HTTP method (`GET` vs
//! `PUT`) and their own lifetime. The service this gateway replaces signed
//! its "upload" URLs as `GET`, which only granted read access; here the
//! method always follows the intent.

use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::error;

use crate::{
    errors::{GatewayError, GatewayResult},
    models::signed_url::{SignedUrl, UrlMethod},
    store::{BlobStore, StoreError},
};

/// Default lifetime of read URLs: 7 days.
pub const DEFAULT_READ_URL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default lifetime of upload URLs: 1 day.
pub const DEFAULT_WRITE_URL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
pub struct UrlLifetimes {
    pub read: Duration,
    pub write: Duration,
}

impl Default for UrlLifetimes {
    fn default() -> Self {
        Self {
            read: DEFAULT_READ_URL_TTL,
            write: DEFAULT_WRITE_URL_TTL,
        }
    }
}

impl UrlLifetimes {
    pub fn for_method(&self, method: UrlMethod) -> Duration {
        match method {
            UrlMethod::Read => self.read,
            UrlMethod::Write => self.write,
        }
    }
}

#[derive(Clone)]
pub struct UrlIssuer {
    store: Arc<dyn BlobStore>,
    lifetimes: UrlLifetimes,
}

impl UrlIssuer {
    pub fn new(store: Arc<dyn BlobStore>, lifetimes: UrlLifetimes) -> Self {
        Self { store, lifetimes }
    }

    /// Sign `key` for `method`. Each call starts a fresh lifetime; the
    /// returned `expires_at` is the instant the store signed.
    pub async fn issue(&self, key: &str, method: UrlMethod) -> GatewayResult<SignedUrl> {
        let ttl = self.lifetimes.for_method(method);
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| GatewayError::Signing {
                key: key.to_string(),
                source: StoreError::Signing {
                    key: key.to_string(),
                    reason: format!("lifetime of {}s out of range", ttl.as_secs()),
                },
            })?;

        let url = self
            .store
            .sign_url(key, method, expires_at)
            .await
            .map_err(|source| {
                error!("error generating {:?} url for {}: {}", method, key, source);
                match source {
                    StoreError::InvalidKey(key) => {
                        GatewayError::InvalidInput(format!("invalid object key `{}`", key))
                    }
                    source => GatewayError::Signing {
                        key: key.to_string(),
                        source,
                    },
                }
            })?;

        Ok(SignedUrl {
            url,
            method,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::local::tests::memory_store;

    async fn issuer() -> (UrlIssuer, tempfile::TempDir) {
        let (store, dir) = memory_store().await;
        (UrlIssuer::new(Arc::new(store), UrlLifetimes::default()), dir)
    }

    fn assert_about(actual: chrono::DateTime<Utc>, expected: chrono::DateTime<Utc>) {
        let drift = (actual - expected).num_seconds().abs();
        assert!(drift <= 5, "expiry {} not near {}", actual, expected);
    }

    #[tokio::test]
    async fn read_urls_last_seven_days_and_do_not_accumulate() {
        let (issuer, _dir) = issuer().await;

        let first = issuer.issue("202404/report.pdf", UrlMethod::Read).await.unwrap();
        assert_eq!(first.method, UrlMethod::Read);
        assert_about(first.expires_at, Utc::now() + chrono::Duration::days(7));

        let second = issuer.issue("202404/report.pdf", UrlMethod::Read).await.unwrap();
        assert_about(second.expires_at, Utc::now() + chrono::Duration::days(7));
        assert!(second.expires_at - first.expires_at < chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn write_urls_last_one_day_and_sign_put() {
        let (issuer, _dir) = issuer().await;

        let url = issuer.issue("uploads/a.bin", UrlMethod::Write).await.unwrap();
        assert_eq!(url.method, UrlMethod::Write);
        assert!(url.url.contains("method=PUT"));
        assert_about(url.expires_at, Utc::now() + chrono::Duration::days(1));
    }

    #[tokio::test]
    async fn lifetimes_are_configured_per_intent() {
        let (store, _dir) = memory_store().await;
        let issuer = UrlIssuer::new(
            Arc::new(store),
            UrlLifetimes {
                read: Duration::from_secs(60),
                write: Duration::from_secs(3600),
            },
        );

        let read = issuer.issue("k", UrlMethod::Read).await.unwrap();
        let write = issuer.issue("k", UrlMethod::Write).await.unwrap();
        assert_about(read.expires_at, Utc::now() + chrono::Duration::seconds(60));
        assert_about(write.expires_at, Utc::now() + chrono::Duration::seconds(3600));
    }

    #[tokio::test]
    async fn reported_expiry_is_the_signed_expiry() {
        let (issuer, _dir) = issuer().await;

        for method in [UrlMethod::Read, UrlMethod::Write] {
            let url = issuer.issue("docs/a.txt", method).await.unwrap();
            let signed = format!("&expires={}&", url.expires_at.timestamp());
            assert!(url.url.contains(&signed), "{} lacks {}", url.url, signed);
        }
    }

    #[tokio::test]
    async fn unsafe_key_is_rejected_without_url() {
        let (issuer, _dir) = issuer().await;
        let err = issuer.issue("../etc/passwd", UrlMethod::Read).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
    }
}
