//! Provider failover 컨트롤러.
//!
//! 설정된 순서대로 Provider를 시도하고 첫 성공을 반환합니다.
//! 수집 시점에는 순서를 바꾸지 않으며, 헬스 체크는 별도의 참고용 작업입니다.

use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use stock_core::FetchAttemptResult;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::broker::{DailyBarSource, HttpBrokerSource};
use super::client::FetchClient;
use crate::error::{DataError, Result};

/// Provider별 재시도 횟수.
pub const PROVIDER_RETRY_COUNT: u32 = 3;

/// Provider 헬스 체크 결과.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    /// 정상 여부
    pub healthy: bool,
    /// 실패 사유
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 응답 시간 (밀리초)
    pub latency_ms: u64,
}

/// failover 컨트롤러.
#[derive(Clone)]
pub struct ProviderFailover {
    sources: Vec<Arc<dyn DailyBarSource>>,
}

impl ProviderFailover {
    /// 데이터 소스 목록으로 생성합니다. 순서가 곧 시도 순서입니다.
    pub fn new(sources: Vec<Arc<dyn DailyBarSource>>) -> Self {
        Self { sources }
    }

    /// 기본 URL 목록으로 HTTP Provider들을 구성합니다.
    pub fn from_urls(urls: &[String], client: FetchClient) -> Self {
        Self::from_urls_with_retries(urls, client, PROVIDER_RETRY_COUNT)
    }

    /// Provider별 재시도 횟수를 지정해 구성합니다.
    pub fn from_urls_with_retries(urls: &[String], client: FetchClient, retries: u32) -> Self {
        let sources = urls
            .iter()
            .map(|url| {
                Arc::new(HttpBrokerSource::new(url.clone(), client.clone(), retries))
                    as Arc<dyn DailyBarSource>
            })
            .collect();
        Self::new(sources)
    }

    /// Provider 이름 목록 (시도 순서).
    pub fn provider_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Provider 수.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Provider가 없는지 확인.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// 첫 번째로 유효 레코드를 반환한 Provider의 결과를 반환합니다.
    ///
    /// 모든 Provider가 실패하면 마지막 오류를 담은 `AllProvidersFailed`를 반환합니다.
    /// 취소되면 남은 Provider를 시도하지 않고 `Cancelled`를 반환합니다.
    #[instrument(skip(self, cancel), fields(providers = self.sources.len()))]
    pub async fn fetch_with_failover(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchAttemptResult> {
        let started = Instant::now();
        let mut last_error: Option<DataError> = None;

        for source in &self.sources {
            if cancel.is_cancelled() {
                return Err(DataError::Cancelled);
            }

            let attempt_started = Instant::now();
            debug!(provider = source.name(), symbol = symbol, "Provider 요청");

            match source.fetch_daily(symbol, cancel).await {
                Ok(records) if !records.is_empty() => {
                    info!(
                        provider = source.name(),
                        symbol = symbol,
                        records = records.len(),
                        elapsed_ms = attempt_started.elapsed().as_millis() as u64,
                        "Provider 수집 성공"
                    );
                    return Ok(FetchAttemptResult::success(
                        symbol,
                        source.name(),
                        records,
                        started.elapsed(),
                    ));
                }
                Ok(_) => {
                    last_error = Some(DataError::NoValidRecords {
                        provider: source.name().to_string(),
                    });
                }
                Err(DataError::Cancelled) => return Err(DataError::Cancelled),
                Err(e) => {
                    warn!(provider = source.name(), symbol = symbol, error = %e, "Provider 수집 실패");
                    last_error = Some(e);
                }
            }
        }

        Err(DataError::AllProvidersFailed {
            symbol: symbol.to_string(),
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no providers configured".to_string()),
        })
    }

    /// 모든 Provider에서 수집합니다 (비교/감사용, 저장하지 않음).
    ///
    /// 결과는 Provider 순서와 같습니다.
    pub async fn fetch_from_all(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Vec<FetchAttemptResult> {
        let attempts = self.sources.iter().map(|source| async move {
            let started = Instant::now();
            match source.fetch_daily(symbol, cancel).await {
                Ok(records) => {
                    FetchAttemptResult::success(symbol, source.name(), records, started.elapsed())
                }
                Err(e) => FetchAttemptResult::failure(
                    symbol,
                    source.name(),
                    e.to_string(),
                    started.elapsed(),
                ),
            }
        });

        join_all(attempts).await
    }

    /// 모든 Provider에 가벼운 요청을 동시에 보냅니다. 실패는 결과로만 보고합니다.
    pub async fn health_check_all(&self) -> BTreeMap<String, ProviderHealth> {
        let checks = self.sources.iter().map(|source| async move {
            let started = Instant::now();
            let outcome = source.health_check().await;
            let health = ProviderHealth {
                healthy: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
                latency_ms: started.elapsed().as_millis() as u64,
            };
            (source.name().to_string(), health)
        });

        join_all(checks).await.into_iter().collect()
    }
}

impl std::fmt::Debug for ProviderFailover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFailover")
            .field("providers", &self.provider_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stock_core::DailyBar;

    struct FakeSource {
        name: String,
        records: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DailyBarSource for FakeSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_daily(
            &self,
            symbol: &str,
            _cancel: &CancellationToken,
        ) -> Result<Vec<DailyBar>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.records == 0 {
                return Err(DataError::Transport("connection refused".into()));
            }
            Ok((0..self.records)
                .map(|i| {
                    DailyBar::new(
                        symbol,
                        NaiveDate::from_ymd_opt(2024, 1, 2 + i as u32).unwrap(),
                        dec!(100),
                        dec!(102),
                        dec!(99),
                        dec!(101),
                        1000,
                    )
                    .with_source(self.name.clone())
                })
                .collect())
        }

        async fn health_check(&self) -> Result<()> {
            if self.records == 0 {
                Err(DataError::Transport("down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn failover(records: &[usize], calls: &Arc<AtomicUsize>) -> ProviderFailover {
        let sources = records
            .iter()
            .enumerate()
            .map(|(i, &records)| {
                Arc::new(FakeSource {
                    name: format!("p{}", i + 1),
                    records,
                    calls: calls.clone(),
                }) as Arc<dyn DailyBarSource>
            })
            .collect();
        ProviderFailover::new(sources)
    }

    #[tokio::test]
    async fn test_failover_uses_first_successful_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let controller = failover(&[0, 0, 1, 5], &calls);

        let result = controller
            .fetch_with_failover("2330", &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.provider_name, "p3");
        assert_eq!(result.record_count, 1);
        assert_eq!(result.records[0].source, "p3");
        // 성공 이후에는 호출하지 않음
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_all_providers_failed_carries_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let controller = failover(&[0, 0], &calls);

        let err = controller
            .fetch_with_failover("2330", &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            DataError::AllProvidersFailed { symbol, last_error } => {
                assert_eq!(symbol, "2330");
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let calls = Arc::new(AtomicUsize::new(0));
        let controller = failover(&[1], &calls);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = controller.fetch_with_failover("2330", &cancel).await.unwrap_err();
        assert!(matches!(err, DataError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_from_all_does_not_short_circuit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let controller = failover(&[2, 0, 3], &calls);

        let results = controller
            .fetch_from_all("2330", &CancellationToken::new())
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let summary: Vec<(&str, bool, usize)> = results
            .iter()
            .map(|r| (r.provider_name.as_str(), r.succeeded, r.record_count))
            .collect();
        assert_eq!(summary, vec![("p1", true, 2), ("p2", false, 0), ("p3", true, 3)]);
    }

    #[tokio::test]
    async fn test_health_check_reports_per_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let controller = failover(&[1, 0], &calls);

        let health = controller.health_check_all().await;
        assert!(health["p1"].healthy);
        assert!(!health["p2"].healthy);
        assert!(health["p2"].error.is_some());
    }
}
