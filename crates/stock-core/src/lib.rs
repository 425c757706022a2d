//! # Stock Core
//!
//! 일봉 수집 서비스의 핵심 도메인 모델 및 공통 인프라를 제공합니다.
//!
//! 이 크레이트는 수집 파이프라인 전반에서 사용되는 기본 타입을 제공합니다:
//! - 정규화된 일봉 레코드 (`DailyBar`)
//! - Provider 단위 수집 결과 (`FetchAttemptResult`)
//! - 설정 관리 (`AppConfig`)
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
