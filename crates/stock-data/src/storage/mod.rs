//! 저장소.
//!
//! - `database`: 연결 풀, 마이그레이션, 풀 통계
//! - `batch`: 배치 upsert / COPY 적재 / 일괄 삭제·수정
//! - `repository`: 저장된 일봉 조회

pub mod batch;
pub mod database;
pub mod repository;

pub use batch::{BatchInserter, DailyBarWriter, PgDailyBarWriter};
pub use database::{Database, PoolStats};
pub use repository::{DailyBarRepository, StockDailyRecord, StockSummary};
