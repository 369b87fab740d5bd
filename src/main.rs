use anyhow::{Context, Result};
use axum::{Router, extract::DefaultBodyLimit};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod store;

use config::{AppConfig, Backend};
use services::Gateway;
use store::{
    BlobStore,
    local::{LocalStore, run_migrations},
    s3::{S3Settings, S3Store},
    signing::UrlSigner,
};

/// Multipart framing on top of the per-file ceiling.
const BODY_LIMIT_SLACK: u64 = 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting upload-gateway with config: {:?}", cfg);

    // --- Initialize blob store ---
    let (store, local_signer): (Arc<dyn BlobStore>, Option<UrlSigner>) = match cfg.backend {
        Backend::Local => {
            let secret = if cfg.signing_secret.is_empty() {
                tracing::warn!(
                    "UPLOADS_SIGNING_SECRET not set; signed URLs will not survive a restart"
                );
                Uuid::new_v4().to_string()
            } else {
                cfg.signing_secret.clone()
            };
            let signer = UrlSigner::new(secret, cfg.public_url.clone());
            let local = LocalStore::connect(
                &cfg.database_url,
                cfg.storage_dir.clone(),
                cfg.bucket.clone(),
                signer.clone(),
            )
            .await
            .with_context(|| format!("opening metadata database {}", cfg.database_url))?;

            // --- Handle migration mode ---
            if migrate {
                run_migrations(&local.db).await?;
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }

            (Arc::new(local), Some(signer))
        }
        Backend::S3 => {
            if migrate {
                tracing::info!("Nothing to migrate for the s3 backend.");
                return Ok(());
            }
            let s3 = S3Store::new(S3Settings {
                endpoint: cfg.s3_endpoint.clone(),
                region: cfg.s3_region.clone(),
                bucket: cfg.bucket.clone(),
                access_key: cfg.s3_access_key.clone(),
                secret_key: cfg.s3_secret_key.clone(),
                path_style: cfg.s3_path_style,
            })
            .context("configuring s3 client")?;
            (Arc::new(s3), None)
        }
    };

    // --- Provision bucket ---
    if store.bucket_exists().await? {
        tracing::info!("Bucket '{}' already exists", store.bucket());
    } else {
        store.make_bucket().await?;
        tracing::info!("Bucket '{}' created", store.bucket());
    }

    // --- Build router ---
    let body_limit = usize::try_from(cfg.policies.max_upload_bytes.saturating_add(BODY_LIMIT_SLACK))
        .unwrap_or(usize::MAX);
    let gateway = Gateway::new(store, cfg.policies, local_signer);
    let app: Router = routes::routes::routes()
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(gateway);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
