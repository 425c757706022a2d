//! API 라우트.
//!
//! # 라우트 구조
//!
//! - `/health` - 헬스 체크 (liveness)
//! - `/health/ready` - 데이터베이스/Provider 상태 (readiness)
//! - `/api/v1/stocks` - 즉시 수집, 조회, 배치 제출
//! - `/api/v1/batch/{batch_id}` - 배치 진행 상황
//! - `/api/v1/workers/stats` - 워커 풀 통계

pub mod batch;
pub mod health;
pub mod stocks;

pub use batch::batch_router;
pub use health::{health_router, ComponentStatus, HealthResponse};
pub use stocks::{stocks_router, BatchUpdateRequest, HistoryQuery, HistoryResponse};

use axum::Router;
use std::sync::Arc;

use crate::state::AppState;

/// 전체 API 라우터 생성.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/health", health_router())
        .nest("/api/v1/stocks", stocks_router())
        .merge(batch_router())
}
