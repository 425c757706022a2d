//! 핵심 에러 타입.

use thiserror::Error;

/// 설정 및 도메인 공통 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 설정 파일/환경변수 로드 실패
    #[error("설정 로드 에러: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    /// 설정 값 검증 실패
    #[error("설정 검증 에러: {0}")]
    InvalidConfig(String),

    /// 잘못된 입력
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),
}

/// 핵심 작업을 위한 Result 타입.
pub type CoreResult<T> = Result<T, CoreError>;
