//! 배치 수집 서비스.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{CollectorError, Result};
use crate::worker::{FetchJob, JobStatus, WorkerPool, WorkerStats};

/// 제출하지 못한 종목.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedSymbol {
    pub symbol: String,
    pub reason: String,
}

/// 배치 제출 응답.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSubmission {
    pub batch_id: String,
    /// 제출된 종목 수
    pub total_symbols: usize,
    pub rejected: Vec<RejectedSymbol>,
    pub started_at: DateTime<Utc>,
    pub status: String,
    pub message: String,
}

/// 작업 상태 요약.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub symbol: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub record_count: usize,
    pub rows_affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&FetchJob> for JobSummary {
    fn from(job: &FetchJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            symbol: job.symbol.clone(),
            status: job.status,
            provider: job.result.as_ref().map(|r| r.provider.clone()),
            record_count: job.result.as_ref().map_or(0, |r| r.record_count),
            rows_affected: job.result.as_ref().map_or(0, |r| r.rows_affected),
            error: job.error.clone(),
        }
    }
}

/// 배치 상태.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub batch_id: String,
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    /// 모든 작업이 종료되었는지
    pub finished: bool,
    pub tasks: Vec<JobSummary>,
    pub stats: WorkerStats,
}

/// 워커 풀에 종목 배치를 제출하고 진행 상황을 집계합니다.
#[derive(Debug, Clone)]
pub struct BatchService {
    pool: Arc<WorkerPool>,
}

impl BatchService {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    /// 워커 풀.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// 종목 목록을 작업으로 제출합니다.
    ///
    /// 큐가 가득 차 제출하지 못한 종목은 `rejected`로 보고하고 나머지는 계속 제출합니다.
    /// 풀이 종료 중이면 즉시 `ShuttingDown`을 반환합니다.
    pub fn submit_batch(
        &self,
        symbols: &[String],
        broker: Option<String>,
    ) -> Result<BatchSubmission> {
        if symbols.is_empty() {
            return Err(CollectorError::InvalidInput("no symbols provided".into()));
        }

        let started_at = Utc::now();
        let batch_id = new_batch_id(started_at);
        let broker = broker.filter(|b| !b.trim().is_empty());

        info!(
            batch_id = %batch_id,
            symbol_count = symbols.len(),
            broker = broker.as_deref().unwrap_or("auto"),
            "배치 수집 시작"
        );

        let mut submitted = 0;
        let mut rejected = Vec::new();

        for (i, symbol) in symbols.iter().enumerate() {
            let symbol = symbol.trim();
            if symbol.is_empty() {
                rejected.push(RejectedSymbol {
                    symbol: String::new(),
                    reason: "empty symbol".into(),
                });
                continue;
            }

            let job = FetchJob::new(task_id(&batch_id, i), symbol, broker.clone());
            match self.pool.submit(job) {
                Ok(()) => submitted += 1,
                Err(CollectorError::ShuttingDown) => return Err(CollectorError::ShuttingDown),
                Err(e) => {
                    warn!(batch_id = %batch_id, symbol = symbol, error = %e, "작업 제출 실패");
                    rejected.push(RejectedSymbol {
                        symbol: symbol.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            batch_id = %batch_id,
            submitted = submitted,
            rejected = rejected.len(),
            "배치 제출 완료"
        );

        let status = if submitted > 0 { "processing" } else { "rejected" };
        Ok(BatchSubmission {
            message: format!("Submitted {submitted} tasks successfully"),
            batch_id,
            total_symbols: submitted,
            rejected,
            started_at,
            status: status.to_string(),
        })
    }

    /// 배치에 속한 작업의 상태를 집계합니다.
    pub fn batch_status(&self, batch_id: &str) -> Result<BatchStatus> {
        let jobs = self.pool.tasks_by_prefix(&task_prefix(batch_id));
        if jobs.is_empty() {
            return Err(CollectorError::NotFound(format!("batch {batch_id}")));
        }

        let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();
        let pending_tasks = count(JobStatus::Pending);
        let running_tasks = count(JobStatus::Running);

        Ok(BatchStatus {
            batch_id: batch_id.to_string(),
            total_tasks: jobs.len(),
            pending_tasks,
            running_tasks,
            completed_tasks: count(JobStatus::Completed),
            failed_tasks: count(JobStatus::Failed),
            finished: pending_tasks + running_tasks == 0,
            tasks: jobs.iter().map(JobSummary::from).collect(),
            stats: self.pool.stats(),
        })
    }

    /// 배치에 속한 작업 스냅샷.
    pub fn batch_jobs(&self, batch_id: &str) -> Vec<FetchJob> {
        self.pool.tasks_by_prefix(&task_prefix(batch_id))
    }

    /// 워커 풀 통계.
    pub fn worker_stats(&self) -> WorkerStats {
        self.pool.stats()
    }
}

fn new_batch_id(at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("batch_{}_{}", at.timestamp(), &suffix[..8])
}

fn task_prefix(batch_id: &str) -> String {
    format!("{batch_id}_task_")
}

fn task_id(batch_id: &str, index: usize) -> String {
    format!("{}{}", task_prefix(batch_id), index)
}
