//! 데이터 모듈 오류 타입.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

/// Provider 응답 본문 파싱 오류.
///
/// 해당 본문에 대해서는 재시도하지 않으며, failover는 다음 Provider로 넘어갑니다.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// 빈 응답
    #[error("empty response body")]
    EmptyBody,

    /// 날짜 토큰 없음
    #[error("no valid dates found in response")]
    NoDatesFound,

    /// 숫자 토큰 없음
    #[error("no valid numbers found in response")]
    NoNumbersFound,

    /// 날짜당 필드 수 부족 (OHLC 최소 4개)
    #[error("insufficient fields: {numbers} numbers for {dates} dates (need at least 4 per date)")]
    InsufficientFields { dates: usize, numbers: usize },

    /// 모든 후보 레코드가 제외됨
    #[error("no valid records among {candidates} candidates")]
    NoValidRecords { candidates: usize },
}

/// 레코드 단위 검증 오류.
///
/// 배치를 중단시키지 않으며 해당 레코드만 제외됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// 종목 코드 누락
    #[error("missing instrument code ({date})")]
    MissingCode { date: NaiveDate },

    /// 0 이하 가격
    #[error("{code} {date}: {field} must be positive, got {value}")]
    NonPositivePrice {
        code: String,
        date: NaiveDate,
        field: &'static str,
        value: Decimal,
    },

    /// 고가 < 시가
    #[error("{code} {date}: high {high} < open {open}")]
    HighBelowOpen {
        code: String,
        date: NaiveDate,
        high: Decimal,
        open: Decimal,
    },

    /// 고가 < 종가
    #[error("{code} {date}: high {high} < close {close}")]
    HighBelowClose {
        code: String,
        date: NaiveDate,
        high: Decimal,
        close: Decimal,
    },

    /// 고가 < 저가
    #[error("{code} {date}: high {high} < low {low}")]
    HighBelowLow {
        code: String,
        date: NaiveDate,
        high: Decimal,
        low: Decimal,
    },

    /// 저가 > 시가
    #[error("{code} {date}: low {low} > open {open}")]
    LowAboveOpen {
        code: String,
        date: NaiveDate,
        low: Decimal,
        open: Decimal,
    },

    /// 저가 > 종가
    #[error("{code} {date}: low {low} > close {close}")]
    LowAboveClose {
        code: String,
        date: NaiveDate,
        low: Decimal,
        close: Decimal,
    },

    /// 음수 거래량
    #[error("{code} {date}: negative volume {volume}")]
    NegativeVolume {
        code: String,
        date: NaiveDate,
        volume: i64,
    },
}

/// 데이터 관련 오류.
#[derive(Debug, Error)]
pub enum DataError {
    /// 네트워크/타임아웃 오류 (재시도 가능)
    #[error("Transport error: {0}")]
    Transport(String),

    /// 200이 아닌 HTTP 상태 (재시도 가능)
    #[error("HTTP status {code} from {url}")]
    Status { code: u16, url: String },

    /// 호출자 취소
    #[error("Operation cancelled")]
    Cancelled,

    /// 응답 파싱 실패
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// 파싱은 됐으나 검증을 통과한 레코드 없음
    #[error("No valid records from {provider}")]
    NoValidRecords { provider: String },

    /// 모든 Provider 실패
    #[error("All providers failed for {symbol}: {last_error}")]
    AllProvidersFailed { symbol: String, last_error: String },

    /// 배치 저장 실패
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// 데이터베이스 연결 오류
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// 쿼리 실행 오류
    #[error("Query error: {0}")]
    QueryError(String),

    /// 레코드를 찾을 수 없음
    #[error("Record not found: {0}")]
    NotFound(String),

    /// 중복 레코드
    #[error("Duplicate record: {0}")]
    DuplicateError(String),

    /// 연결 풀 소진
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// 마이그레이션 오류
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// 설정 오류
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 타임아웃 오류
    #[error("Operation timeout: {0}")]
    Timeout(String),
}

impl DataError {
    /// Fetch Client가 재시도할 수 있는 오류인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DataError::Transport(_) | DataError::Status { .. })
    }
}

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DataError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut => DataError::PoolExhausted,
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                if code == "23505" {
                    // PostgreSQL 고유 제약 조건 위반
                    DataError::DuplicateError(db_err.message().to_string())
                } else {
                    DataError::QueryError(db_err.message().to_string())
                }
            }
            _ => DataError::QueryError(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for DataError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => DataError::Status {
                code: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => DataError::Transport(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(DataError::Transport("reset".into()).is_retryable());
        assert!(DataError::Status {
            code: 503,
            url: "http://x".into()
        }
        .is_retryable());
        assert!(!DataError::Parse(ParseError::NoDatesFound).is_retryable());
        assert!(!DataError::Cancelled.is_retryable());
        assert!(!DataError::Persistence("deadlock".into()).is_retryable());
    }
}
