//! 헬스 체크 endpoint.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use stock_collector::WorkerStats;
use stock_data::{PoolStats, ProviderHealth};

use crate::state::AppState;

/// 헬스 체크 응답.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// 전체 상태 ("healthy" | "degraded" | "unhealthy")
    pub status: String,
    pub version: String,
    pub uptime_secs: i64,
    pub timestamp: String,
    pub database: ComponentStatus,
    pub pool: PoolStats,
    pub providers: BTreeMap<String, ProviderHealth>,
    pub workers: WorkerStats,
}

/// 컴포넌트 상태.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// "up" | "down"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentStatus {
    pub fn up() -> Self {
        Self {
            status: "up".to_string(),
            message: None,
        }
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self {
            status: "down".to_string(),
            message: Some(message.into()),
        }
    }
}

/// 서버 응답 여부만 확인 (liveness).
///
/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// 의존성 상태 확인 (readiness).
///
/// 데이터베이스가 응답하지 않거나 모든 Provider가 실패하면 503을 반환합니다.
/// 일부 Provider만 실패하면 "degraded"로 보고합니다.
/// GET /health/ready
pub async fn health_ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (db, providers) = tokio::join!(
        state.database.health_check(),
        state.stock_service.provider_health()
    );

    let database = match db {
        Ok(()) => ComponentStatus::up(),
        Err(e) => ComponentStatus::down(e.to_string()),
    };

    let healthy_providers = providers.values().filter(|p| p.healthy).count();
    let (status, code) = if database.status != "up" || healthy_providers == 0 {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    } else if healthy_providers < providers.len() {
        ("degraded", StatusCode::OK)
    } else {
        ("healthy", StatusCode::OK)
    };

    let response = HealthResponse {
        status: status.to_string(),
        version: state.version.clone(),
        uptime_secs: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        database,
        pool: state.database.pool_stats(),
        providers,
        workers: state.worker_pool().stats(),
    };

    (code, Json(response))
}

/// 헬스 체크 라우터 생성.
pub fn health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(health_ready))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::create_test_state;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_check_returns_ok() {
        let app = Router::new().route("/health", get(health_check));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_reports_unavailable_database() {
        let state = Arc::new(create_test_state(&["http://127.0.0.1:9/".to_string()], 1));
        let app = Router::new()
            .route("/health/ready", get(health_ready))
            .with_state(state);

        let response = app
            .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["database"]["status"], "down");
        assert_eq!(json["providers"]["127"]["healthy"], false);
        assert_eq!(json["workers"]["workers"], 1);
    }
}
