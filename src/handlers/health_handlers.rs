//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the configured bucket is reachable

use crate::services::Gateway;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness probe. Always 200 and never touches the store.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Asks the store whether the bucket exists. HTTP 200 when it does, 503 when
/// it is missing or the store cannot be reached. Store errors are logged,
/// never echoed to the caller.
pub async fn readyz(State(gateway): State<Gateway>) -> impl IntoResponse {
    let bucket_check = match gateway.store.bucket_exists().await {
        Ok(true) => (true, None::<String>),
        Ok(false) => (
            false,
            Some(format!("bucket '{}' does not exist", gateway.store.bucket())),
        ),
        Err(e) => {
            tracing::error!("readiness check of bucket '{}' failed: {}", gateway.store.bucket(), e);
            (false, Some("bucket check failed".to_string()))
        }
    };

    let overall_ok = bucket_check.0;
    let mut checks = HashMap::new();
    checks.insert(
        "bucket",
        CheckStatus {
            ok: bucket_check.0,
            error: bucket_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::{
            GatewayPolicies, existence_probe::ProbeFailurePolicy, key_policy::KeyPolicy,
            test_support::FlakyStore, upload_service::BatchMode, url_issuer::UrlLifetimes,
        },
        store::local::tests::memory_store,
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;

    #[tokio::test]
    async fn readyz_hides_store_error_details() {
        let (store, _dir) = memory_store().await;
        let flaky = Arc::new(FlakyStore::new(store));
        flaky.fail_bucket_check(true);
        let policies = GatewayPolicies {
            key_policy: KeyPolicy::SanitizedDated,
            probe_failure: ProbeFailurePolicy::TreatAsAbsent,
            lifetimes: UrlLifetimes::default(),
            batch_mode: BatchMode::FailFast,
            max_upload_bytes: 64,
        };
        let gateway = Gateway::new(flaky, policies, None);

        let res = readyz(State(gateway)).await.into_response();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["checks"]["bucket"]["error"], "bucket check failed");
        assert!(!body.to_string().contains("objects.db"));
    }
}
