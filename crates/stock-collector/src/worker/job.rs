//! 수집 작업과 결과.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use stock_core::{duration_millis, DailyBar};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// 작업 상태.
///
/// `Pending → Running → {Completed | Failed}` 순서로만 진행합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// 종료 상태 여부.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 종목 1건 수집 요약.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOutcome {
    /// 종목 코드
    pub symbol: String,
    /// 응답한 Provider
    pub provider: String,
    /// 저장 대상 레코드 수
    pub record_count: usize,
    /// 저장된 행 수
    pub rows_affected: u64,
    /// 저장 성공 여부
    pub saved: bool,
    /// 저장 실패 사유
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_error: Option<String>,
    /// 수집된 레코드
    pub records: Vec<DailyBar>,
    /// 소요 시간
    #[serde(rename = "elapsed_ms", with = "duration_millis")]
    pub elapsed: Duration,
    /// 수집 완료 시각
    pub fetched_at: DateTime<Utc>,
}

impl FetchOutcome {
    /// 레코드 없는 빈 결과.
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            provider: String::new(),
            record_count: 0,
            rows_affected: 0,
            saved: false,
            save_error: None,
            records: Vec::new(),
            elapsed: Duration::ZERO,
            fetched_at: Utc::now(),
        }
    }

    /// 레코드를 제외한 사본 (상태 조회 응답용).
    pub fn without_records(&self) -> Self {
        Self {
            records: Vec::new(),
            ..self.clone()
        }
    }
}

/// 워커 풀이 관리하는 수집 작업.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchJob {
    /// 작업 ID
    pub job_id: String,
    /// 종목 코드
    pub symbol: String,
    /// 선호 Provider (참고용)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
    /// 현재 상태
    pub status: JobStatus,
    /// 실패 사유 (Failed일 때만)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 수집 결과
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FetchOutcome>,
    /// 종료 시각
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl FetchJob {
    /// Pending 상태의 새 작업.
    pub fn new(
        job_id: impl Into<String>,
        symbol: impl Into<String>,
        preferred_provider: Option<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            symbol: symbol.into(),
            preferred_provider,
            created_at: Utc::now(),
            status: JobStatus::Pending,
            error: None,
            result: None,
            finished_at: None,
        }
    }
}

/// 실행자가 결과 처리기로 보내는 작업 결과.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub job_id: String,
    pub symbol: String,
    pub success: bool,
    pub error: Option<String>,
    pub record_count: usize,
    pub duration: Duration,
    pub completed_at: DateTime<Utc>,
    pub outcome: Option<FetchOutcome>,
}

impl TaskResult {
    /// 수집기 반환값으로부터 결과를 만듭니다.
    ///
    /// 수집은 성공했지만 저장이 실패한 경우 실패로 기록하되 수집 결과는 유지합니다.
    pub fn from_fetch(job: &FetchJob, fetched: Result<FetchOutcome>, duration: Duration) -> Self {
        let (success, error, outcome) = match fetched {
            Ok(outcome) => match &outcome.save_error {
                Some(e) => (false, Some(format!("persistence failed: {e}")), Some(outcome)),
                None => (true, None, Some(outcome)),
            },
            Err(e) => (false, Some(e.to_string()), None),
        };

        Self {
            job_id: job.job_id.clone(),
            symbol: job.symbol.clone(),
            success,
            error,
            record_count: outcome.as_ref().map_or(0, |o| o.record_count),
            duration,
            completed_at: Utc::now(),
            outcome,
        }
    }
}

/// 종목 수집기.
///
/// 워커 풀은 이 trait만 알고 있으므로 서비스 계층과 분리됩니다.
#[async_trait]
pub trait StockFetcher: Send + Sync {
    /// 종목의 일봉을 수집하고 저장합니다.
    ///
    /// `provider_hint`는 참고용이며 Provider 순서를 바꾸지 않습니다.
    /// 저장 실패는 에러가 아니라 `FetchOutcome::save_error`로 보고합니다.
    async fn fetch_stock_daily(
        &self,
        symbol: &str,
        provider_hint: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome>;
}
