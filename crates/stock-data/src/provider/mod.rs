//! 외부 Provider 수집.
//!
//! - `client`: 고정 헤더/타임아웃/재시도를 적용한 HTTP 요청
//! - `parser`: Provider별 텍스트 응답을 일봉으로 정규화
//! - `validator`: OHLC 불변식 검증 및 이상치 제거
//! - `broker`: 단일 HTTP Provider
//! - `failover`: Provider 순차 시도, 비교 수집, 헬스 체크

pub mod broker;
pub mod client;
pub mod failover;
pub mod parser;
pub mod validator;

pub use broker::{provider_name, DailyBarSource, HttpBrokerSource, HEALTH_CHECK_TIMEOUT};
pub use client::FetchClient;
pub use failover::{ProviderFailover, ProviderHealth, PROVIDER_RETRY_COUNT};
pub use parser::{detect_layout, Layout};
