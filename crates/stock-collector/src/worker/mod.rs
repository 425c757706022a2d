//! 종목별 수집 작업 워커 풀.
//!
//! - `job`: 작업 상태 머신과 결과 타입, 수집기 trait
//! - `pool`: 고정 실행자 수와 bounded 큐를 가진 워커 풀

pub mod job;
pub mod pool;

pub use job::{FetchJob, FetchOutcome, JobStatus, StockFetcher, TaskResult};
pub use pool::{WorkerPool, WorkerStats, JOB_TIMEOUT};
