//! 일봉 수집 워커 풀 및 수집 서비스.
//!
//! 이 crate는 API 서버와 CLI가 공유하는 수집 실행 계층을 제공합니다:
//! - 종목별 수집 작업을 스케줄링하는 고정 크기 워커 풀
//! - failover → 검증 → 배치 저장을 수행하는 `StockService`
//! - 배치 단위 제출/상태 조회를 담당하는 `BatchService`

pub mod error;
pub mod service;
pub mod stats;
pub mod worker;

pub use error::{CollectorError, Result};
pub use service::{
    BatchService, BatchStatus, BatchSubmission, JobSummary, RejectedSymbol, StockService,
};
pub use stats::CollectionStats;
pub use worker::{
    FetchJob, FetchOutcome, JobStatus, StockFetcher, TaskResult, WorkerPool, WorkerStats,
    JOB_TIMEOUT,
};
