//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and disk I/O
//!
//! Both are served without authentication.

use crate::services::object_store::ObjectStore;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::fs;
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn from_result(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                error: None,
            },
            Err(error) => Self {
                ok: false,
                error: Some(error),
            },
        }
    }
}

/// `GET /healthz`
///
/// Liveness probe; never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

async fn check_sqlite(store: &ObjectStore) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*store.db)
        .await
    {
        Ok(1) => Ok(()),
        Ok(v) => Err(format!("unexpected result: {}", v)),
        Err(e) => Err(format!("error: {}", e)),
    }
}

/// Write, read back and delete a scratch file under the blob root.
async fn check_disk(store: &ObjectStore) -> Result<(), String> {
    let tmp_path = store
        .base_path()
        .join(format!(".readyz-{}", Uuid::new_v4()));
    let outcome = async {
        fs::write(&tmp_path, b"readyz")
            .await
            .map_err(|e| format!("could not write tmp file: {}", e))?;
        let bytes = fs::read(&tmp_path)
            .await
            .map_err(|e| format!("could not read tmp file: {}", e))?;
        if bytes != b"readyz" {
            return Err("file content mismatch".to_string());
        }
        Ok::<(), String>(())
    }
    .await;

    match fs::remove_file(&tmp_path).await {
        Err(e) if outcome.is_ok() && e.kind() != std::io::ErrorKind::NotFound => {
            Err(format!("could not remove tmp file: {}", e))
        }
        _ => outcome,
    }
}

/// `GET /readyz`
///
/// 200 when SQLite answers `SELECT 1` and the blob root is writable,
/// 503 otherwise. The body reports each check.
pub async fn readyz(State(store): State<ObjectStore>) -> impl IntoResponse {
    let sqlite = CheckStatus::from_result(check_sqlite(&store).await);
    let disk = CheckStatus::from_result(check_disk(&store).await);
    let overall_ok = sqlite.ok && disk.ok;
    if !overall_ok {
        tracing::warn!("readiness check failed");
    }

    let checks = BTreeMap::from([("sqlite", sqlite), ("disk", disk)]);
    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" },
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
