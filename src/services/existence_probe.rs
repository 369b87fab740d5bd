//! "Does this key exist" on top of `stat`.

use clap::ValueEnum;
use std::sync::Arc;
use tracing::warn;

use crate::{
    errors::{GatewayError, GatewayResult},
    store::{BlobStore, StoreError},
};

/// What a single `stat` told us about a key.
#[derive(Debug)]
pub enum Presence {
    Present,
    Absent,
    /// The store failed for a reason other than not-found.
    Indeterminate(StoreError),
}

/// How [`ExistenceProbe::exists`] reports [`Presence::Indeterminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ProbeFailurePolicy {
    /// Log and answer "does not exist".
    #[default]
    TreatAsAbsent,
    /// Fail with a store-unavailable error.
    Propagate,
}

#[derive(Clone)]
pub struct ExistenceProbe {
    store: Arc<dyn BlobStore>,
    policy: ProbeFailurePolicy,
}

impl ExistenceProbe {
    pub fn new(store: Arc<dyn BlobStore>, policy: ProbeFailurePolicy) -> Self {
        Self { store, policy }
    }

    pub async fn probe(&self, key: &str) -> Presence {
        match self.store.stat(key).await {
            Ok(_) => Presence::Present,
            Err(err) if err.is_not_found() => Presence::Absent,
            Err(err) => Presence::Indeterminate(err),
        }
    }

    pub async fn exists(&self, key: &str) -> GatewayResult<bool> {
        match self.probe(key).await {
            Presence::Present => Ok(true),
            Presence::Absent => Ok(false),
            Presence::Indeterminate(err) => match self.policy {
                ProbeFailurePolicy::TreatAsAbsent => {
                    warn!(
                        "could not check existence of {}, assuming absent: {}",
                        key, err
                    );
                    Ok(false)
                }
                ProbeFailurePolicy::Propagate => Err(GatewayError::StoreUnavailable {
                    op: "stat",
                    key: key.to_string(),
                    source: err,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::FlakyStore;
    use crate::store::local::tests::{body, memory_store};

    #[tokio::test]
    async fn put_then_delete_flips_existence() {
        let (store, _dir) = memory_store().await;
        let store: Arc<dyn BlobStore> = Arc::new(store);
        let probe = ExistenceProbe::new(store.clone(), ProbeFailurePolicy::TreatAsAbsent);

        assert!(!probe.exists("k.txt").await.unwrap());
        store.put("k.txt", body(b"x"), Some(1), "text/plain").await.unwrap();
        assert!(probe.exists("k.txt").await.unwrap());
        store.delete("k.txt").await.unwrap();
        assert!(!probe.exists("k.txt").await.unwrap());
    }

    #[tokio::test]
    async fn store_failure_is_indeterminate() {
        let (store, _dir) = memory_store().await;
        let flaky = FlakyStore::new(store);
        flaky.fail_stat(true);
        let probe = ExistenceProbe::new(Arc::new(flaky), ProbeFailurePolicy::TreatAsAbsent);

        assert!(matches!(probe.probe("k").await, Presence::Indeterminate(_)));
    }

    #[tokio::test]
    async fn failure_policy_decides_how_indeterminate_is_reported() {
        let (store, _dir) = memory_store().await;
        let flaky = Arc::new(FlakyStore::new(store));
        flaky.fail_stat(true);

        let lenient = ExistenceProbe::new(flaky.clone(), ProbeFailurePolicy::TreatAsAbsent);
        assert!(!lenient.exists("k").await.unwrap());

        let strict = ExistenceProbe::new(flaky, ProbeFailurePolicy::Propagate);
        let err = strict.exists("k").await.unwrap_err();
        assert!(matches!(err, GatewayError::StoreUnavailable { op: "stat", .. }));
    }
}
