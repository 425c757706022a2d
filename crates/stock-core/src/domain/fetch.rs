//! Provider 수집 결과.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::daily_bar::DailyBar;

/// 한 종목에 대한 failover 수집 1회의 결과.
///
/// 저장되지 않으며 호출자(서비스 계층 또는 워커 작업)가 즉시 소비합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchAttemptResult {
    /// 종목 코드
    pub symbol: String,
    /// 수집된 레코드 (날짜순)
    pub records: Vec<DailyBar>,
    /// 응답한 Provider 이름
    pub provider_name: String,
    /// 성공 여부
    pub succeeded: bool,
    /// 실패 사유
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 소요 시간
    #[serde(rename = "elapsed_ms", with = "duration_millis")]
    pub elapsed: Duration,
    /// 레코드 수
    pub record_count: usize,
}

impl FetchAttemptResult {
    /// 성공 결과 생성.
    pub fn success(
        symbol: impl Into<String>,
        provider_name: impl Into<String>,
        records: Vec<DailyBar>,
        elapsed: Duration,
    ) -> Self {
        let record_count = records.len();
        Self {
            symbol: symbol.into(),
            records,
            provider_name: provider_name.into(),
            succeeded: true,
            error: None,
            elapsed,
            record_count,
        }
    }

    /// 실패 결과 생성.
    pub fn failure(
        symbol: impl Into<String>,
        provider_name: impl Into<String>,
        error: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            records: Vec::new(),
            provider_name: provider_name.into(),
            succeeded: false,
            error: Some(error.into()),
            elapsed,
            record_count: 0,
        }
    }
}

/// `Duration`을 밀리초 정수로 직렬화.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_has_no_records() {
        let result = FetchAttemptResult::failure("2330", "fubon", "timeout", Duration::from_millis(1500));
        assert!(!result.succeeded);
        assert_eq!(result.record_count, 0);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["elapsed_ms"], 1500);
        assert_eq!(json["error"], "timeout");
    }
}
