//! 수집 통계 구조체.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::worker::{FetchJob, JobStatus};

/// 수집 작업 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    /// 총 종목 수
    pub total: usize,
    /// 성공 횟수
    pub success: usize,
    /// 에러 횟수
    pub errors: usize,
    /// 제출하지 못한 종목 수 (큐 포화 등)
    pub rejected: usize,
    /// 종료 시점까지 완료되지 않은 작업 수
    pub unfinished: usize,
    /// 수집된 총 일봉 수
    pub total_records: usize,
    /// 저장된 행 수
    pub rows_affected: u64,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl CollectionStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 작업 스냅샷으로부터 집계합니다.
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a FetchJob>) -> Self {
        let mut stats = Self::new();
        for job in jobs {
            stats.record(job);
        }
        stats
    }

    /// 작업 하나를 반영합니다.
    pub fn record(&mut self, job: &FetchJob) {
        self.total += 1;
        match job.status {
            JobStatus::Completed => self.success += 1,
            JobStatus::Failed => self.errors += 1,
            JobStatus::Pending | JobStatus::Running => self.unfinished += 1,
        }
        if let Some(outcome) = &job.result {
            self.total_records += outcome.record_count;
            self.rows_affected += outcome.rows_affected;
        }
    }

    /// 성공률 계산 (%)
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.success as f64 / self.total as f64) * 100.0
        }
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            success = self.success,
            errors = self.errors,
            rejected = self.rejected,
            unfinished = self.unfinished,
            total_records = self.total_records,
            rows_affected = self.rows_affected,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "수집 완료"
        );
    }
}
