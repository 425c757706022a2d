//! Provider HTTP 요청 클라이언트.
//!
//! 고정 헤더(`User-Agent`, `Accept`)와 요청 타임아웃을 적용하며,
//! 네트워크/상태 코드 오류에 한해 선형 backoff로 재시도합니다.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DataError, Result};

/// 모든 Provider 요청에 사용하는 User-Agent.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// 모든 Provider 요청에 사용하는 Accept 헤더.
pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// 기본 backoff 단위 (n번째 실패 후 n × 2초 대기).
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(2);

/// Provider 요청 클라이언트.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    timeout: Duration,
    backoff_unit: Duration,
}

impl FetchClient {
    /// 기본 요청 타임아웃으로 클라이언트를 생성합니다.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| DataError::ConfigError(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
        })
    }

    /// backoff 단위를 변경합니다.
    #[must_use]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// 기본 요청 타임아웃.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 기본 타임아웃으로 단일 요청을 수행합니다.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetch_with_deadline(url, self.timeout).await
    }

    /// 지정한 타임아웃으로 단일 요청을 수행합니다.
    ///
    /// 200 이외의 상태는 `Status`, 연결/타임아웃 실패는 `Transport`로 반환합니다.
    pub async fn fetch_with_deadline(&self, url: &str, deadline: Duration) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| DataError::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DataError::Status {
                code: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DataError::Transport(e.to_string()))?;

        Ok(body.to_vec())
    }

    /// 재시도를 포함한 요청.
    ///
    /// 최대 `retries`회 시도하며 n번째 실패 후 `n × backoff_unit` 대기합니다.
    /// 마지막 시도 뒤에는 대기하지 않습니다. `cancel`이 발동하면 남은 시도와
    /// 상관없이 즉시 `Cancelled`를 반환합니다.
    pub async fn fetch_with_retry(
        &self,
        url: &str,
        retries: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let attempts = retries.max(1);
        let mut last_error = DataError::Transport("no attempt made".to_string());

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(DataError::Cancelled);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(DataError::Cancelled),
                res = self.fetch(url) => res,
            };

            match outcome {
                Ok(body) => return Ok(body),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempt < attempts {
                        let wait = self.backoff_unit * attempt;
                        debug!(
                            url = url,
                            attempt = attempt,
                            max_attempts = attempts,
                            wait_ms = wait.as_millis() as u64,
                            error = %e,
                            "요청 실패, 재시도 예정"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(DataError::Cancelled),
                            _ = tokio::time::sleep(wait) => {}
                        }
                    } else {
                        warn!(url = url, attempts = attempts, error = %e, "요청 최종 실패");
                    }
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_client() -> FetchClient {
        FetchClient::new(Duration::from_secs(5))
            .unwrap()
            .with_backoff_unit(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_fetch_sends_fixed_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/data")
            .match_header("user-agent", DEFAULT_USER_AGENT)
            .match_header("accept", DEFAULT_ACCEPT)
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let body = fast_client()
            .fetch(&format!("{}/data", server.url()))
            .await
            .unwrap();
        assert_eq!(body, b"ok");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_200_is_status_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let err = fast_client()
            .fetch(&format!("{}/missing", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Status { code: 404, .. }));
    }

    #[tokio::test]
    async fn test_retry_stops_after_attempt_limit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let err = fast_client()
            .fetch_with_retry(&format!("{}/flaky", server.url()), 3, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Status { code: 503, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_before_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/never")
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fast_client()
            .fetch_with_retry(&format!("{}/never", server.url()), 3, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Cancelled));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_returns_immediately() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/down")
            .with_status(500)
            .create_async()
            .await;

        // backoff를 길게 잡고 대기 중 취소
        let client = FetchClient::new(Duration::from_secs(5))
            .unwrap()
            .with_backoff_unit(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = client
            .fetch_with_retry(&format!("{}/down", server.url()), 3, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
