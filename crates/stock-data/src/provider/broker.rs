//! HTTP 기반 일봉 Provider.
//!
//! 모든 Provider는 같은 경로/쿼리 템플릿을 사용하고 기본 URL만 다릅니다.

use async_trait::async_trait;
use std::time::Duration;
use stock_core::DailyBar;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::FetchClient;
use super::{parser, validator};
use crate::error::{DataError, Result};

/// 헬스 체크 요청 타임아웃.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// 일봉 요청 경로.
const DAILY_PATH: &str = "/z/BCD/czkc1.djbcd";

/// 일봉 데이터 소스.
///
/// failover 컨트롤러는 이 trait만 알고 있으므로 테스트에서는 가짜 구현으로 대체합니다.
#[async_trait]
pub trait DailyBarSource: Send + Sync {
    /// Provider 이름 (레코드의 `source`로 기록됨)
    fn name(&self) -> &str;

    /// 종목의 검증된 일봉을 가져옵니다.
    ///
    /// 검증을 통과한 레코드가 하나도 없으면 `NoValidRecords`를 반환합니다.
    async fn fetch_daily(&self, symbol: &str, cancel: &CancellationToken)
        -> Result<Vec<DailyBar>>;

    /// 가벼운 연결 확인.
    async fn health_check(&self) -> Result<()>;
}

/// HTTP Provider.
#[derive(Debug, Clone)]
pub struct HttpBrokerSource {
    name: String,
    base_url: String,
    client: FetchClient,
    retries: u32,
}

impl HttpBrokerSource {
    /// 기본 URL로 Provider를 생성합니다. 이름은 호스트의 첫 레이블입니다.
    pub fn new(base_url: impl Into<String>, client: FetchClient, retries: u32) -> Self {
        let base_url = base_url.into();
        Self {
            name: provider_name(&base_url),
            base_url,
            client,
            retries,
        }
    }

    /// 기본 URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 종목별 요청 URL을 생성합니다. 종목 코드는 퍼센트 인코딩됩니다.
    pub fn build_url(&self, symbol: &str) -> String {
        format!(
            "{}{}?a={}&b=A&c=2880&E=1&ver=5",
            self.base_url.trim_end_matches('/'),
            DAILY_PATH,
            urlencoding::encode(symbol)
        )
    }
}

#[async_trait]
impl DailyBarSource for HttpBrokerSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DailyBar>> {
        let url = self.build_url(symbol);
        let body = self.client.fetch_with_retry(&url, self.retries, cancel).await?;
        let text = String::from_utf8_lossy(&body);

        let parsed = parser::parse(&text, symbol)?;
        let (valid, rejected) = validator::validate_batch(parsed);
        if !rejected.is_empty() {
            debug!(
                provider = %self.name,
                symbol = symbol,
                rejected = rejected.len(),
                "검증 실패 레코드 제외"
            );
        }

        if valid.is_empty() {
            return Err(DataError::NoValidRecords {
                provider: self.name.clone(),
            });
        }

        Ok(valid
            .into_iter()
            .map(|bar| bar.with_source(self.name.clone()))
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        self.client
            .fetch_with_deadline(&self.base_url, HEALTH_CHECK_TIMEOUT)
            .await
            .map(|_| ())
    }
}

/// 기본 URL에서 Provider 이름을 추출합니다.
///
/// `http://fubon-ebrokerdj.fbs.com.tw/` → `fubon-ebrokerdj`
pub fn provider_name(base_url: &str) -> String {
    reqwest::Url::parse(base_url)
        .ok()
        .and_then(|url| {
            url.host_str()
                .and_then(|host| host.split('.').next())
                .filter(|label| !label.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(base: &str) -> HttpBrokerSource {
        let client = FetchClient::new(Duration::from_secs(5))
            .unwrap()
            .with_backoff_unit(Duration::from_millis(10));
        HttpBrokerSource::new(base, client, 3)
    }

    #[test]
    fn test_provider_name_from_host() {
        assert_eq!(provider_name("http://fubon-ebrokerdj.fbs.com.tw/"), "fubon-ebrokerdj");
        assert_eq!(provider_name("https://sjmain.esunsec.com.tw/"), "sjmain");
        assert_eq!(provider_name("not a url"), "unknown");
    }

    #[test]
    fn test_build_url() {
        let src = source("http://justdata.moneydj.com/");
        assert_eq!(
            src.build_url("2330"),
            "http://justdata.moneydj.com/z/BCD/czkc1.djbcd?a=2330&b=A&c=2880&E=1&ver=5"
        );
    }

    #[test]
    fn test_build_url_encodes_symbol() {
        let src = source("http://justdata.moneydj.com");
        assert_eq!(
            src.build_url("2330&b=X #1"),
            "http://justdata.moneydj.com/z/BCD/czkc1.djbcd?a=2330%26b%3DX%20%231&b=A&c=2880&E=1&ver=5"
        );
        assert!(src.build_url("BRK.B").contains("?a=BRK.B&"));
    }

    #[tokio::test]
    async fn test_fetch_daily_tags_source_and_validates() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/z/BCD/czkc1.djbcd")
            .match_query(mockito::Matcher::UrlEncoded("a".into(), "2330".into()))
            .with_status(200)
            .with_body("2024/01/02,2024/01/03,100,101,99,101,500,101,103,98,102,600")
            .create_async()
            .await;

        let src = source(&server.url());
        let bars = src
            .fetch_daily("2330", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bars.len(), 2);
        assert!(bars.iter().all(|b| b.validated));
        assert!(bars.iter().all(|b| b.source == src.name()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_parse_failure_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/z/BCD/czkc1.djbcd")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .expect(1)
            .create_async()
            .await;

        let err = source(&server.url())
            .fetch_daily("2330", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Parse(_)));
        mock.assert_async().await;
    }
}
