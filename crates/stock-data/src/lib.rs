//! 일봉 수집 및 저장.
//!
//! 이 crate는 다음을 제공합니다:
//! - 고정 헤더/재시도를 적용한 Provider 요청
//! - 여러 응답 레이아웃을 지원하는 파서와 OHLC 검증
//! - Provider failover, 비교 수집, 헬스 체크
//! - PostgreSQL 배치 upsert/COPY 적재 및 조회 repository

pub mod error;
pub mod provider;
pub mod storage;

pub use error::{DataError, ParseError, Result, ValidationError};

pub use provider::{
    DailyBarSource, FetchClient, HttpBrokerSource, Layout, ProviderFailover, ProviderHealth,
};
pub use storage::{
    BatchInserter, DailyBarRepository, DailyBarWriter, Database, PgDailyBarWriter, PoolStats,
    StockDailyRecord, StockSummary,
};
