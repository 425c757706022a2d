//! 일봉 수집 REST API 서버.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 종목별 즉시 수집, 저장 데이터 조회, Provider 비교
//! - 워커 풀 기반 배치 수집 제출 및 진행 상황 조회
//! - 데이터베이스/Provider 상태를 포함한 헬스 체크
//!
//! # 모듈 구성
//!
//! - [`state`]: 애플리케이션 공유 상태 (AppState)
//! - [`routes`]: REST API 엔드포인트
//! - [`error`]: 에러 응답 타입

pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiErrorResponse, ApiResult};
pub use routes::create_api_router;
pub use state::AppState;
