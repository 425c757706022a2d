//! 수집 서비스.
//!
//! - `stock`: 종목 1건 수집 (failover → 검증 → 배치 저장)
//! - `batch`: 워커 풀을 통한 배치 제출과 상태 집계

pub mod batch;
pub mod stock;

pub use batch::{BatchService, BatchStatus, BatchSubmission, JobSummary, RejectedSymbol};
pub use stock::StockService;
