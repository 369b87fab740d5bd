use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

use crate::services::{
    GatewayPolicies,
    existence_probe::ProbeFailurePolicy,
    key_policy::KeyPolicy,
    upload_service::{BatchMode, DEFAULT_MAX_UPLOAD_BYTES},
    url_issuer::{DEFAULT_READ_URL_TTL, DEFAULT_WRITE_URL_TTL, UrlLifetimes},
};

/// Which blob store the gateway fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// SQLite metadata + local disk payloads, URLs signed by the gateway.
    Local,
    /// Any S3-compatible endpoint (MinIO, AWS).
    S3,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub bucket: String,
    pub storage_dir: String,
    pub database_url: String,
    pub s3_endpoint: String,
    pub s3_region: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub s3_path_style: bool,
    pub public_url: String,
    pub signing_secret: String,
    pub policies: GatewayPolicies,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("s3_region", &self.s3_region)
            .field("s3_path_style", &self.s3_path_style)
            .field("public_url", &self.public_url)
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Upload gateway with signed URL access")]
pub struct Args {
    /// Host to bind to (overrides UPLOADS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOADS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Blob store backend (overrides UPLOADS_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Bucket holding uploaded objects (overrides UPLOADS_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Payload directory for the local backend (overrides UPLOADS_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database for the local backend (overrides UPLOADS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// S3 endpoint URL (overrides UPLOADS_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// S3 region (overrides UPLOADS_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Use path-style bucket addressing (overrides UPLOADS_S3_PATH_STYLE)
    #[arg(long)]
    pub s3_path_style: Option<bool>,

    /// Externally reachable base URL of this gateway (overrides UPLOADS_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Storage key policy (overrides UPLOADS_KEY_POLICY)
    #[arg(long, value_enum)]
    pub key_policy: Option<KeyPolicy>,

    /// Lifetime of read URLs in seconds (overrides UPLOADS_READ_URL_TTL_SECS)
    #[arg(long)]
    pub read_url_ttl_secs: Option<u64>,

    /// Lifetime of upload URLs in seconds (overrides UPLOADS_WRITE_URL_TTL_SECS)
    #[arg(long)]
    pub write_url_ttl_secs: Option<u64>,

    /// How failed existence checks are reported (overrides UPLOADS_PROBE_FAILURE)
    #[arg(long, value_enum)]
    pub probe_failure: Option<ProbeFailurePolicy>,

    /// Default batch upload behaviour (overrides UPLOADS_BATCH_MODE)
    #[arg(long, value_enum)]
    pub batch_mode: Option<BatchMode>,

    /// Per-file upload ceiling in bytes (overrides UPLOADS_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `name` from the environment, parsing it with `FromStr`.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// Read a `ValueEnum` setting such as `sanitized-dated`.
fn env_enum<T: ValueEnum>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(value) => T::from_str(&value, true)
            .map_err(|err| anyhow::anyhow!(err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_port = env_parse("UPLOADS_PORT", 9003u16)?;
        let env_backend = env_enum("UPLOADS_BACKEND", Backend::Local)?;
        let env_path_style = env_parse("UPLOADS_S3_PATH_STYLE", true)?;
        let env_key_policy = env_enum("UPLOADS_KEY_POLICY", KeyPolicy::default())?;
        let env_read_ttl =
            env_parse("UPLOADS_READ_URL_TTL_SECS", DEFAULT_READ_URL_TTL.as_secs())?;
        let env_write_ttl =
            env_parse("UPLOADS_WRITE_URL_TTL_SECS", DEFAULT_WRITE_URL_TTL.as_secs())?;
        let env_probe = env_enum("UPLOADS_PROBE_FAILURE", ProbeFailurePolicy::default())?;
        let env_batch = env_enum("UPLOADS_BATCH_MODE", BatchMode::default())?;
        let env_max_upload = env_parse("UPLOADS_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        let host = args
            .host
            .unwrap_or_else(|| env_string("UPLOADS_HOST", "0.0.0.0"));
        let port = args.port.unwrap_or(env_port);
        let public_url = args
            .public_url
            .or_else(|| env::var("UPLOADS_PUBLIC_URL").ok())
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", port));

        let read_ttl = args.read_url_ttl_secs.unwrap_or(env_read_ttl);
        let write_ttl = args.write_url_ttl_secs.unwrap_or(env_write_ttl);
        if read_ttl == 0 || write_ttl == 0 {
            anyhow::bail!("signed URL lifetimes must be at least one second");
        }

        // --- Merge ---
        let cfg = Self {
            host,
            port,
            backend: args.backend.unwrap_or(env_backend),
            bucket: args
                .bucket
                .unwrap_or_else(|| env_string("UPLOADS_BUCKET", "uploads")),
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_string("UPLOADS_STORAGE_DIR", "./data/objects")),
            database_url: args.database_url.unwrap_or_else(|| {
                env_string("UPLOADS_DATABASE_URL", "sqlite://./data/meta/uploads.db")
            }),
            s3_endpoint: args
                .s3_endpoint
                .unwrap_or_else(|| env_string("UPLOADS_S3_ENDPOINT", "http://127.0.0.1:9000")),
            s3_region: args
                .s3_region
                .unwrap_or_else(|| env_string("UPLOADS_S3_REGION", "us-east-1")),
            s3_access_key: env_string("UPLOADS_S3_ACCESS_KEY", "minioadmin"),
            s3_secret_key: env_string("UPLOADS_S3_SECRET_KEY", "minioadmin"),
            s3_path_style: args.s3_path_style.unwrap_or(env_path_style),
            public_url,
            signing_secret: env_string("UPLOADS_SIGNING_SECRET", ""),
            policies: GatewayPolicies {
                key_policy: args.key_policy.unwrap_or(env_key_policy),
                probe_failure: args.probe_failure.unwrap_or(env_probe),
                lifetimes: UrlLifetimes {
                    read: Duration::from_secs(read_ttl),
                    write: Duration::from_secs(write_ttl),
                },
                batch_mode: args.batch_mode.unwrap_or(env_batch),
                max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            },
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_defaults() {
        let args = Args::parse_from([
            "upload-gateway",
            "--port",
            "8080",
            "--backend",
            "s3",
            "--key-policy",
            "random-opaque",
            "--read-url-ttl-secs",
            "600",
            "--probe-failure",
            "propagate",
            "--migrate",
        ]);
        let (cfg, migrate) = AppConfig::from_args(args).unwrap();

        assert!(migrate);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.backend, Backend::S3);
        assert_eq!(cfg.policies.key_policy, KeyPolicy::RandomOpaque);
        assert_eq!(cfg.policies.lifetimes.read, Duration::from_secs(600));
        assert_eq!(cfg.policies.probe_failure, ProbeFailurePolicy::Propagate);
        assert_eq!(cfg.addr(), format!("{}:8080", cfg.host));
    }

    #[test]
    fn zero_lifetime_is_rejected() {
        let args = Args {
            write_url_ttl_secs: Some(0),
            ..Args::default()
        };
        assert!(AppConfig::from_args(args).is_err());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let args = Args::default();
        let (mut cfg, _) = AppConfig::from_args(args).unwrap();
        cfg.s3_secret_key = "super-secret".into();
        cfg.signing_secret = "hmac-secret".into();
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("hmac-secret"));
    }
}
