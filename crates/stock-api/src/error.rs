//! API 에러 응답 타입.
//!
//! 모든 엔드포인트는 `ApiResult<T>`를 반환하며, 실패 시 일관된 JSON 본문을 사용합니다.

use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stock_collector::CollectorError;
use stock_data::DataError;

/// API 에러 응답 본문.
///
/// ```json
/// {
///   "code": "NOT_FOUND",
///   "message": "No data found for symbol: 2330",
///   "timestamp": 1738300800
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// 에러 코드 (예: "BAD_REQUEST", "NOT_FOUND", "UPSTREAM_ERROR")
    pub code: String,
    /// 에러 메시지
    pub message: String,
    /// 추가 정보
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Unix timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// HTTP 메서드
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// 요청 경로
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ApiErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: Some(chrono::Utc::now().timestamp()),
            method: None,
            path: None,
        }
    }

    /// 상세 정보 추가.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// 요청 정보(메서드, 경로) 추가.
    #[must_use]
    pub fn with_request_info(mut self, method: &Method, uri: &Uri) -> Self {
        self.method = Some(method.to_string());
        self.path = Some(uri.path().to_string());
        self
    }
}

impl std::fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiErrorResponse {}

/// 상태 코드를 포함한 핸들러 에러.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ApiErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorResponse::new(code, message),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.body = self.body.with_details(details);
        self
    }

    #[must_use]
    pub fn with_request_info(mut self, method: &Method, uri: &Uri) -> Self {
        self.body = self.body.with_request_info(method, uri);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = %self.body.code, message = %self.body.message, "요청 처리 실패");
        }
        (self.status, Json(self.body)).into_response()
    }
}

impl From<DataError> for ApiError {
    fn from(err: DataError) -> Self {
        let (status, code) = match &err {
            DataError::AllProvidersFailed { .. }
            | DataError::NoValidRecords { .. }
            | DataError::Transport(_)
            | DataError::Status { .. }
            | DataError::Parse(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            DataError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            DataError::Cancelled | DataError::Timeout(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
            }
            DataError::PoolExhausted | DataError::ConnectionError(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "DB_UNAVAILABLE")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "DB_ERROR"),
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<CollectorError> for ApiError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::Data(e) => e.into(),
            CollectorError::InvalidInput(msg) => Self::bad_request(msg),
            CollectorError::NotFound(msg) => Self::not_found(msg),
            CollectorError::QueueFull => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, "QUEUE_FULL", err.to_string())
            }
            CollectorError::ShuttingDown | CollectorError::Cancelled => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", err.to_string())
            }
            CollectorError::Timeout(_) => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", err.to_string())
            }
            other => Self::internal(other.to_string()),
        }
    }
}

/// API 핸들러 Result 타입 별칭.
pub type ApiResult<T> = Result<T, ApiError>;
