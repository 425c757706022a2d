//! 에러 타입 정의.

use stock_data::DataError;
use thiserror::Error;

/// Collector 에러 타입
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 작업 큐가 가득 참
    #[error("task queue is full")]
    QueueFull,

    /// 워커 풀 종료 중
    #[error("worker pool is shutting down")]
    ShuttingDown,

    /// 수집 단계 에러 (Provider, 파싱 등)
    #[error(transparent)]
    Data(#[from] DataError),

    /// 저장 실패
    #[error("persistence error: {0}")]
    Persistence(String),

    /// 작업 제한 시간 초과
    #[error("job timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// 작업 취소
    #[error("job cancelled")]
    Cancelled,

    /// 수집기 panic
    #[error("job panicked: {0}")]
    Panicked(String),

    /// 설정 에러
    #[error("configuration error: {0}")]
    Config(String),

    /// 입력 에러
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 요청한 배치/작업 없음
    #[error("not found: {0}")]
    NotFound(String),

    /// 데이터베이스 에러
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CollectorError {
    /// 호출자가 재시도하면 성공할 수 있는 에러인지 확인.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull | Self::Timeout(_))
            || matches!(self, Self::Data(e) if e.is_retryable())
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CollectorError>;
