//! Reading, describing, deleting and listing stored objects.

use futures::{StreamExt, stream::BoxStream};
use std::sync::Arc;
use tracing::info;

use crate::{
    errors::{GatewayError, GatewayResult},
    models::{
        object::{ListedObject, StoredObject},
        signed_url::UrlMethod,
    },
    services::{existence_probe::ExistenceProbe, key_policy, url_issuer::UrlIssuer},
    store::{BlobStore, ByteStream},
};

/// Lazily signed listing; each item costs one signing call when polled.
pub type ListingStream = BoxStream<'static, GatewayResult<ListedObject>>;

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn BlobStore>,
    probe: ExistenceProbe,
    urls: UrlIssuer,
}

fn checked_key(key: &str) -> GatewayResult<&str> {
    key_policy::validate_key(key)
        .map(|_| key)
        .map_err(|reason| GatewayError::InvalidInput(reason.to_string()))
}

impl CatalogService {
    pub fn new(store: Arc<dyn BlobStore>, probe: ExistenceProbe, urls: UrlIssuer) -> Self {
        Self { store, probe, urls }
    }

    pub async fn stat(&self, key: &str) -> GatewayResult<StoredObject> {
        let key = checked_key(key)?;
        self.store
            .stat(key)
            .await
            .map(StoredObject::from)
            .map_err(|err| GatewayError::from_store("stat", key, err))
    }

    /// Metadata plus a byte stream for `key`.
    pub async fn get(&self, key: &str) -> GatewayResult<(StoredObject, ByteStream)> {
        let meta = self.stat(key).await?;
        let body = self
            .store
            .get(key)
            .await
            .map_err(|err| GatewayError::from_store("get", key, err))?;
        Ok((meta, body))
    }

    pub async fn exists(&self, key: &str) -> GatewayResult<bool> {
        let key = checked_key(key)?;
        self.probe.exists(key).await
    }

    /// Delete `key`, reporting NotFound when nothing is there.
    pub async fn delete(&self, key: &str) -> GatewayResult<()> {
        if !self.exists(key).await? {
            return Err(GatewayError::NotFound {
                key: key.to_string(),
            });
        }
        self.store
            .delete(key)
            .await
            .map_err(|err| GatewayError::from_store("delete", key, err))?;
        info!("file deleted successfully: {}", key);
        Ok(())
    }

    /// Every leaf object under `prefix` (all objects when `None`) with a read
    /// URL attached, in store order. Calling again restarts from scratch.
    pub async fn list(&self, prefix: Option<&str>) -> GatewayResult<ListingStream> {
        let prefix = prefix.filter(|p| !p.is_empty());
        let entries = self
            .store
            .list(prefix, true)
            .await
            .map_err(|err| GatewayError::from_store("list", prefix.unwrap_or_default(), err))?;

        let urls = self.urls.clone();
        Ok(futures::stream::iter(entries.into_iter().filter(|entry| !entry.is_dir))
            .then(move |entry| {
                let urls = urls.clone();
                async move {
                    let url = urls.issue(&entry.key, UrlMethod::Read).await?;
                    Ok(ListedObject {
                        key: entry.key,
                        size: entry.size,
                        content_type: entry.content_type,
                        last_modified: entry.last_modified,
                        etag: entry.etag,
                        url,
                    })
                }
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::{existence_probe::ProbeFailurePolicy, url_issuer::UrlLifetimes},
        store::local::tests::{body, memory_store},
    };
    use bytes::Bytes;
    use futures::TryStreamExt;

    async fn catalog() -> (CatalogService, Arc<dyn BlobStore>, tempfile::TempDir) {
        let (store, dir) = memory_store().await;
        let store: Arc<dyn BlobStore> = Arc::new(store);
        let service = CatalogService::new(
            store.clone(),
            ExistenceProbe::new(store.clone(), ProbeFailurePolicy::TreatAsAbsent),
            UrlIssuer::new(store.clone(), UrlLifetimes::default()),
        );
        (service, store, dir)
    }

    #[tokio::test]
    async fn get_round_trips_bytes_and_content_type() {
        let (catalog, store, _dir) = catalog().await;
        store.put("docs/a.json", body(b"{\"a\":1}"), Some(7), "application/json").await.unwrap();

        let (meta, stream) = catalog.get("docs/a.json").await.unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"{\"a\":1}");
        assert_eq!(meta.content_type, "application/json");
        assert_eq!(meta.size, 7);
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let (catalog, _store, _dir) = catalog().await;
        let err = catalog.get("missing.txt").await.err().unwrap();
        assert!(matches!(err, GatewayError::NotFound { .. }));
    }

    #[tokio::test]
    async fn traversal_keys_are_invalid_input() {
        let (catalog, _store, _dir) = catalog().await;
        assert!(matches!(
            catalog.stat("../x").await.unwrap_err(),
            GatewayError::InvalidInput(_)
        ));
        assert!(matches!(
            catalog.delete("/abs").await.unwrap_err(),
            GatewayError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn delete_reports_absent_keys() {
        let (catalog, store, _dir) = catalog().await;
        store.put("a.txt", body(b"x"), None, "text/plain").await.unwrap();

        catalog.delete("a.txt").await.unwrap();
        assert!(!catalog.exists("a.txt").await.unwrap());
        assert!(matches!(
            catalog.delete("a.txt").await.unwrap_err(),
            GatewayError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn list_returns_leaves_under_prefix_with_read_urls() {
        let (catalog, store, _dir) = catalog().await;
        for key in ["img/a.png", "img/sub/b.png", "doc/c.pdf"] {
            store.put(key, body(b"xy"), None, "image/png").await.unwrap();
        }

        let listed: Vec<ListedObject> = catalog
            .list(Some("img/"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let keys: Vec<_> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["img/a.png", "img/sub/b.png"]);
        assert!(listed.iter().all(|o| o.url.method == UrlMethod::Read && o.size == 2));
    }

    #[tokio::test]
    async fn listing_twice_yields_the_same_objects() {
        let (catalog, store, _dir) = catalog().await;
        for key in ["b.txt", "a.txt", "c/d.txt"] {
            store.put(key, body(b"x"), None, "text/plain").await.unwrap();
        }

        let summarize = |items: Vec<ListedObject>| {
            items
                .into_iter()
                .map(|o| (o.key, o.size, o.content_type))
                .collect::<Vec<_>>()
        };
        let first = summarize(catalog.list(None).await.unwrap().try_collect().await.unwrap());
        let second = summarize(catalog.list(Some("")).await.unwrap().try_collect().await.unwrap());
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }
}
