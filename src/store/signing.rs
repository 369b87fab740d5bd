//! HMAC-SHA256 URL signing for stores that cannot presign on their own.
//!
//! A signed URL looks like
//! `{base}/signed/{key}?method=GET&expires=1700000000&signature=...` where the
//! signature covers `method`, `key` and `expires`. The gateway serves and
//! verifies these itself.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::models::signed_url::UrlMethod;

type HmacSha256 = Hmac<Sha256>;

/// Path under which signed URLs are served.
pub const SIGNED_ROUTE_PREFIX: &str = "/signed";

#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
    base_url: String,
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            secret: secret.as_ref().to_vec(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn mac(&self, method: UrlMethod, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(method.http_verb().as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    pub fn signature(&self, method: UrlMethod, key: &str, expires: i64) -> String {
        URL_SAFE_NO_PAD.encode(self.mac(method, key, expires).finalize().into_bytes())
    }

    /// Build the full URL for `key`, valid until `expires_at`.
    pub fn sign(&self, key: &str, method: UrlMethod, expires_at: DateTime<Utc>) -> String {
        let expires = expires_at.timestamp();
        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}{}/{}?method={}&expires={}&signature={}",
            self.base_url,
            SIGNED_ROUTE_PREFIX,
            encoded_key,
            method.http_verb(),
            expires,
            self.signature(method, key, expires)
        )
    }

    /// Check a presented signature. Comparison is constant-time.
    pub fn verify(
        &self,
        key: &str,
        method: UrlMethod,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        let Ok(presented) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        self.mac(method, key, expires).verify_slice(&presented).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signer() -> UrlSigner {
        UrlSigner::new("test-secret", "http://localhost:9003/")
    }

    #[test]
    fn signed_url_embeds_method_expiry_and_encoded_key() {
        let expires_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let url = signer().sign("docs/my report.pdf", UrlMethod::Read, expires_at);

        assert!(url.starts_with("http://localhost:9003/signed/docs/my%20report.pdf?"));
        assert!(url.contains("method=GET"));
        assert!(url.contains("expires=1700000000"));
    }

    #[test]
    fn verify_accepts_untampered_signature() {
        let s = signer();
        let now = Utc::now();
        let expires = (now + Duration::hours(1)).timestamp();
        let sig = s.signature(UrlMethod::Write, "a/b.txt", expires);

        assert!(s.verify("a/b.txt", UrlMethod::Write, expires, &sig, now));
    }

    #[test]
    fn verify_rejects_other_key_method_or_expiry() {
        let s = signer();
        let now = Utc::now();
        let expires = (now + Duration::hours(1)).timestamp();
        let sig = s.signature(UrlMethod::Read, "a/b.txt", expires);

        assert!(!s.verify("a/c.txt", UrlMethod::Read, expires, &sig, now));
        assert!(!s.verify("a/b.txt", UrlMethod::Write, expires, &sig, now));
        assert!(!s.verify("a/b.txt", UrlMethod::Read, expires + 1, &sig, now));
        assert!(!s.verify("a/b.txt", UrlMethod::Read, expires, "garbage!", now));
    }

    #[test]
    fn verify_rejects_expired_url() {
        let s = signer();
        let now = Utc::now();
        let expires = (now - Duration::seconds(1)).timestamp();
        let sig = s.signature(UrlMethod::Read, "k", expires);

        assert!(!s.verify("k", UrlMethod::Read, expires, &sig, now));
    }

    #[test]
    fn different_secrets_produce_different_signatures() {
        let other = UrlSigner::new("other-secret", "http://localhost:9003");
        assert_ne!(
            signer().signature(UrlMethod::Read, "k", 1),
            other.signature(UrlMethod::Read, "k", 1)
        );
    }
}
