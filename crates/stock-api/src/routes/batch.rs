//! 배치 진행 상황 및 워커 통계 endpoint.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use stock_collector::{BatchStatus, WorkerStats};

use crate::error::ApiResult;
use crate::state::AppState;

/// 배치 상태 조회.
///
/// GET /api/v1/batch/{batch_id}
pub async fn get_batch_status(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<BatchStatus>> {
    let status = state.batch_service.batch_status(&batch_id)?;
    Ok(Json(status))
}

/// 워커 풀 통계.
///
/// GET /api/v1/workers/stats
pub async fn get_worker_stats(State(state): State<Arc<AppState>>) -> Json<WorkerStats> {
    Json(state.batch_service.worker_stats())
}

/// 배치/워커 라우터 생성.
pub fn batch_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/batch/{batch_id}", get(get_batch_status))
        .route("/api/v1/workers/stats", get(get_worker_stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::create_test_state;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn app(workers: usize) -> (Router, Arc<AppState>) {
        let state = Arc::new(create_test_state(&["http://127.0.0.1:9/".to_string()], workers));
        (batch_router().with_state(state.clone()), state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_worker_stats() {
        let (app, _) = app(4);
        let (status, json) = get_json(app, "/api/v1/workers/stats").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["workers"], 4);
        assert_eq!(json["queue_capacity"], 8);
        assert_eq!(json["total_tasks"], 0);
    }

    #[tokio::test]
    async fn test_unknown_batch_is_not_found() {
        let (app, _) = app(1);
        let (status, json) = get_json(app, "/api/v1/batch/batch_1_abcdef12").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_batch_status_lists_pending_jobs() {
        let (app, state) = app(1);
        let submission = state
            .batch_service
            .submit_batch(&["2330".to_string(), "2317".to_string()], None)
            .unwrap();

        let uri = format!("/api/v1/batch/{}", submission.batch_id);
        let (status, json) = get_json(app, &uri).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_tasks"], 2);
        assert_eq!(json["pending_tasks"], 2);
        assert_eq!(json["finished"], false);
        assert_eq!(json["tasks"][0]["symbol"], "2330");
    }
}
