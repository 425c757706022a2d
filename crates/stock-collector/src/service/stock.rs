//! 종목 수집 서비스.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use stock_core::{AppConfig, DailyBar, FetchAttemptResult};
use stock_data::provider::validator;
use stock_data::{
    BatchInserter, DailyBarRepository, FetchClient, ProviderFailover, ProviderHealth,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{CollectorError, Result};
use crate::worker::{FetchOutcome, StockFetcher};

/// 종목 수집 서비스.
///
/// Provider failover로 일봉을 가져와 검증한 뒤 배치 저장합니다.
/// 저장 실패는 수집 결과를 무효화하지 않습니다.
#[derive(Clone)]
pub struct StockService {
    failover: ProviderFailover,
    inserter: BatchInserter,
    repository: Option<DailyBarRepository>,
    persist_retries: u32,
    save_timeout: Duration,
}

impl StockService {
    pub fn new(
        failover: ProviderFailover,
        inserter: BatchInserter,
        persist_retries: u32,
        save_timeout: Duration,
    ) -> Self {
        Self {
            failover,
            inserter,
            repository: None,
            persist_retries,
            save_timeout,
        }
    }

    /// 설정과 연결 풀로 서비스를 구성합니다.
    pub fn from_config(config: &AppConfig, pool: PgPool) -> Result<Self> {
        let crawler = &config.crawler;
        let client = FetchClient::new(crawler.request_timeout())?;
        let failover = ProviderFailover::from_urls_with_retries(
            &crawler.provider_urls,
            client,
            crawler.retry_count,
        );
        let inserter = BatchInserter::postgres(pool.clone(), crawler.batch_size);

        let service = Self::new(
            failover,
            inserter,
            crawler.persist_retries,
            crawler.save_timeout(),
        );

        Ok(if crawler.first_load_copy {
            service.with_first_load_copy(DailyBarRepository::new(pool))
        } else {
            service
        })
    }

    /// 저장된 데이터가 없는 종목을 COPY 경로로 적재합니다.
    #[must_use]
    pub fn with_first_load_copy(mut self, repository: DailyBarRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Provider 이름 목록 (시도 순서).
    pub fn provider_names(&self) -> Vec<String> {
        self.failover.provider_names()
    }

    /// 종목 일봉을 수집하고 저장합니다.
    #[instrument(skip(self, cancel), fields(providers = self.failover.len()))]
    pub async fn fetch(
        &self,
        symbol: &str,
        provider_hint: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(CollectorError::InvalidInput("empty symbol".into()));
        }
        if let Some(hint) = provider_hint {
            if !self.failover.provider_names().iter().any(|name| name == hint) {
                debug!(hint = hint, "알 수 없는 Provider 힌트, 기본 순서 사용");
            }
        }

        let started = Instant::now();
        let attempt = self.failover.fetch_with_failover(symbol, cancel).await?;

        let fetched = attempt.records.len();
        let records = validator::sanitize(attempt.records);
        if records.len() < fetched {
            info!(
                symbol = symbol,
                fetched = fetched,
                kept = records.len(),
                "이상치 레코드 제외"
            );
        }

        let mut outcome = FetchOutcome {
            symbol: symbol.to_string(),
            provider: attempt.provider_name,
            record_count: records.len(),
            ..FetchOutcome::empty(symbol)
        };

        if !records.is_empty() {
            match tokio::time::timeout(self.save_timeout, self.persist(symbol, &records)).await {
                Ok(Ok(rows)) => {
                    outcome.saved = true;
                    outcome.rows_affected = rows;
                    info!(symbol = symbol, rows_affected = rows, "저장 완료");
                }
                Ok(Err(e)) => {
                    // 수집 결과는 그대로 반환
                    error!(symbol = symbol, error = %e, "저장 실패");
                    outcome.save_error = Some(e.to_string());
                }
                Err(_) => {
                    error!(
                        symbol = symbol,
                        timeout_secs = self.save_timeout.as_secs(),
                        "저장 제한 시간 초과"
                    );
                    outcome.save_error =
                        Some(format!("save timed out after {:?}", self.save_timeout));
                }
            }
        }

        outcome.records = records;
        outcome.elapsed = started.elapsed();
        outcome.fetched_at = Utc::now();
        Ok(outcome)
    }

    async fn persist(&self, symbol: &str, records: &[DailyBar]) -> Result<u64> {
        if let Some(repository) = &self.repository {
            match repository.exists(symbol, None).await {
                Ok(false) => {
                    match self
                        .inserter
                        .insert_with_retry(records, self.persist_retries)
                        .await
                    {
                        Ok(rows) => return Ok(rows),
                        Err(e) => {
                            warn!(symbol = symbol, error = %e, "COPY 적재 실패, upsert로 전환");
                        }
                    }
                }
                Ok(true) => {}
                Err(e) => {
                    warn!(symbol = symbol, error = %e, "기존 데이터 확인 실패, upsert 사용");
                }
            }
        }

        self.inserter
            .upsert_with_retry(records, self.persist_retries)
            .await
            .map_err(|e| CollectorError::Persistence(e.to_string()))
    }

    /// 모든 Provider에서 수집해 비교합니다. 저장하지 않습니다.
    pub async fn compare(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchAttemptResult>> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(CollectorError::InvalidInput("empty symbol".into()));
        }
        Ok(self.failover.fetch_from_all(symbol, cancel).await)
    }

    /// Provider별 헬스 체크.
    pub async fn provider_health(&self) -> BTreeMap<String, ProviderHealth> {
        self.failover.health_check_all().await
    }
}

impl std::fmt::Debug for StockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockService")
            .field("failover", &self.failover)
            .field("batch_size", &self.inserter.batch_size())
            .field("first_load_copy", &self.repository.is_some())
            .field("persist_retries", &self.persist_retries)
            .field("save_timeout", &self.save_timeout)
            .finish()
    }
}

#[async_trait]
impl StockFetcher for StockService {
    async fn fetch_stock_daily(
        &self,
        symbol: &str,
        provider_hint: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        self.fetch(symbol, provider_hint, cancel).await
    }
}
