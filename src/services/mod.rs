//! Gateway core: key policy, existence probing, URL issuing, uploads and
//! catalog reads, wired together over one shared [`BlobStore`] handle.

pub mod catalog_service;
pub mod existence_probe;
pub mod key_policy;
pub mod upload_service;
pub mod url_issuer;

use std::sync::Arc;

use crate::store::{BlobStore, signing::UrlSigner};
use catalog_service::CatalogService;
use existence_probe::{ExistenceProbe, ProbeFailurePolicy};
use key_policy::KeyPolicy;
use upload_service::{BatchMode, UploadService};
use url_issuer::{UrlIssuer, UrlLifetimes};

/// Policy knobs the core needs, extracted from the application config.
#[derive(Debug, Clone, Copy)]
pub struct GatewayPolicies {
    pub key_policy: KeyPolicy,
    pub probe_failure: ProbeFailurePolicy,
    pub lifetimes: UrlLifetimes,
    pub batch_mode: BatchMode,
    pub max_upload_bytes: u64,
}

/// Shared handler state. Cheap to clone; holds no mutable state.
#[derive(Clone)]
pub struct Gateway {
    pub store: Arc<dyn BlobStore>,
    pub uploads: UploadService,
    pub catalog: CatalogService,
    pub urls: UrlIssuer,
    pub batch_mode: BatchMode,
    /// Present when the store's signed URLs are served by this gateway.
    pub local_signer: Option<UrlSigner>,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn BlobStore>,
        policies: GatewayPolicies,
        local_signer: Option<UrlSigner>,
    ) -> Self {
        let probe = ExistenceProbe::new(store.clone(), policies.probe_failure);
        let urls = UrlIssuer::new(store.clone(), policies.lifetimes);
        let uploads = UploadService::new(
            store.clone(),
            policies.key_policy,
            probe.clone(),
            urls.clone(),
            policies.max_upload_bytes,
        );
        let catalog = CatalogService::new(store.clone(), probe, urls.clone());
        Self {
            store,
            uploads,
            catalog,
            urls,
            batch_mode: policies.batch_mode,
            local_signer,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::{
        models::signed_url::UrlMethod,
        store::{
            BlobStore, ByteStream, ListEntry, ObjectMeta, StoreError, StoreResult,
            local::LocalStore,
        },
    };

    /// LocalStore wrapper that can be told to fail `stat`, the bucket check
    /// or a given `put`.
    pub(crate) struct FlakyStore {
        inner: LocalStore,
        stat_fails: AtomicBool,
        bucket_check_fails: AtomicBool,
        rejects_keys: AtomicBool,
        failing_put: AtomicUsize,
        puts: AtomicUsize,
    }

    impl FlakyStore {
        pub(crate) fn new(inner: LocalStore) -> Self {
            Self {
                inner,
                stat_fails: AtomicBool::new(false),
                bucket_check_fails: AtomicBool::new(false),
                rejects_keys: AtomicBool::new(false),
                failing_put: AtomicUsize::new(0),
                puts: AtomicUsize::new(0),
            }
        }

        pub(crate) fn fail_stat(&self, fail: bool) {
            self.stat_fails.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn fail_bucket_check(&self, fail: bool) {
            self.bucket_check_fails.store(fail, Ordering::SeqCst);
        }

        /// Make every put refuse its key.
        pub(crate) fn reject_keys(&self, reject: bool) {
            self.rejects_keys.store(reject, Ordering::SeqCst);
        }

        /// Make the n-th put (1-based) fail.
        pub(crate) fn fail_put_number(&self, n: usize) {
            self.failing_put.store(n, Ordering::SeqCst);
        }

        pub(crate) fn put_attempts(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }

        fn unavailable(op: &'static str) -> StoreError {
            StoreError::Status { op, status: 503 }
        }
    }

    #[async_trait]
    impl BlobStore for FlakyStore {
        fn bucket(&self) -> &str {
            self.inner.bucket()
        }

        async fn bucket_exists(&self) -> StoreResult<bool> {
            if self.bucket_check_fails.load(Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::other(
                    "connect to /var/lib/gateway/objects.db refused",
                )));
            }
            self.inner.bucket_exists().await
        }

        async fn make_bucket(&self) -> StoreResult<()> {
            self.inner.make_bucket().await
        }

        async fn put(
            &self,
            key: &str,
            body: ByteStream,
            size: Option<u64>,
            content_type: &str,
        ) -> StoreResult<ObjectMeta> {
            let attempt = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt == self.failing_put.load(Ordering::SeqCst) {
                return Err(Self::unavailable("put"));
            }
            if self.rejects_keys.load(Ordering::SeqCst) {
                return Err(StoreError::InvalidKey(key.to_string()));
            }
            self.inner.put(key, body, size, content_type).await
        }

        async fn get(&self, key: &str) -> StoreResult<ByteStream> {
            self.inner.get(key).await
        }

        async fn stat(&self, key: &str) -> StoreResult<ObjectMeta> {
            if self.stat_fails.load(Ordering::SeqCst) {
                return Err(Self::unavailable("stat"));
            }
            self.inner.stat(key).await
        }

        async fn delete(&self, key: &str) -> StoreResult<()> {
            self.inner.delete(key).await
        }

        async fn list(
            &self,
            prefix: Option<&str>,
            recursive: bool,
        ) -> StoreResult<Vec<ListEntry>> {
            self.inner.list(prefix, recursive).await
        }

        async fn sign_url(
            &self,
            key: &str,
            method: UrlMethod,
            expires_at: DateTime<Utc>,
        ) -> StoreResult<String> {
            self.inner.sign_url(key, method, expires_at).await
        }
    }
}
