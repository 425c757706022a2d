//! 종목 일봉 endpoint.
//!
//! - `GET /{symbol}/daily`: Provider에서 즉시 수집 후 저장
//! - `GET /{symbol}/latest`, `/history`, `/quality`: 저장된 데이터 조회
//! - `GET /{symbol}/compare`: 모든 Provider 응답 비교 (저장하지 않음)
//! - `GET /summary`: 종목별 저장 현황
//! - `POST /batch-update`: 워커 풀에 배치 제출

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use stock_collector::{BatchSubmission, FetchOutcome};
use stock_core::FetchAttemptResult;
use stock_data::{StockDailyRecord, StockSummary};
use tokio_util::sync::CancellationToken;
use tracing::info;
use validator::{Validate, ValidationError};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 조회 기간 기본값 (일).
const DEFAULT_HISTORY_DAYS: i64 = 30;

/// 종목 코드 최대 길이.
const MAX_SYMBOL_LEN: usize = 16;

// ==================== 검증 ====================

fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// 종목 목록 검증
fn validate_symbols(symbols: &[String]) -> Result<(), ValidationError> {
    if let Some(bad) = symbols.iter().find(|s| !is_valid_symbol(s.trim())) {
        return Err(ValidationError::new("invalid_symbol")
            .with_message(format!("유효하지 않은 종목 코드입니다: {:?}", bad).into()));
    }
    Ok(())
}

fn path_symbol(symbol: &str) -> ApiResult<&str> {
    let symbol = symbol.trim();
    if is_valid_symbol(symbol) {
        Ok(symbol)
    } else {
        Err(ApiError::bad_request(format!("Invalid stock symbol: {symbol}")))
    }
}

fn parse_date(value: Option<&str>, field: &str) -> ApiResult<Option<NaiveDate>> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            NaiveDate::parse_from_str(v, "%Y-%m-%d").map_err(|_| {
                ApiError::bad_request(format!("Invalid {field} date format. Use YYYY-MM-DD"))
            })
        })
        .transpose()
}

// ==================== 요청/응답 타입 ====================

/// 배치 수집 요청
#[derive(Debug, Deserialize, Validate)]
pub struct BatchUpdateRequest {
    /// 종목 목록
    #[validate(
        length(min = 1, max = 1000, message = "종목은 1-1000개 사이여야 합니다"),
        custom(function = "validate_symbols")
    )]
    pub symbols: Vec<String>,
    /// 선호 Provider (참고용)
    #[serde(default)]
    #[validate(length(max = 64, message = "Provider 이름은 64자 이하여야 합니다"))]
    pub broker: Option<String>,
}

/// 즉시 수집 쿼리
#[derive(Debug, Default, Deserialize)]
pub struct DailyQuery {
    pub broker: Option<String>,
}

/// 기간 조회 쿼리
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// 시작일 (YYYY-MM-DD, 기본: 종료일 30일 전)
    pub start: Option<String>,
    /// 종료일 (YYYY-MM-DD, 기본: 오늘)
    pub end: Option<String>,
}

/// 기간 조회 응답
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub record_count: usize,
    pub records: Vec<StockDailyRecord>,
}

/// Provider 비교 응답
#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub symbol: String,
    /// 성공한 Provider 수
    pub succeeded: usize,
    pub results: Vec<FetchAttemptResult>,
}

/// 저장 현황 응답
#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub total: usize,
    pub stocks: Vec<StockSummary>,
}

// ==================== 핸들러 ====================

/// 즉시 수집 및 저장.
///
/// 저장이 실패해도 수집된 레코드를 반환하며 `save_error`에 사유를 담습니다.
/// GET /api/v1/stocks/{symbol}/daily
pub async fn get_stock_daily(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<DailyQuery>,
) -> ApiResult<Json<FetchOutcome>> {
    let symbol = path_symbol(&symbol)?;
    info!(symbol = symbol, broker = ?query.broker, "즉시 수집 요청");

    let outcome = state
        .stock_service
        .fetch(symbol, query.broker.as_deref(), &CancellationToken::new())
        .await?;
    Ok(Json(outcome))
}

/// 최신 레코드.
///
/// GET /api/v1/stocks/{symbol}/latest
pub async fn get_latest(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> ApiResult<Json<StockDailyRecord>> {
    let symbol = path_symbol(&symbol)?;
    state
        .repository
        .get_latest(symbol)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No data found for symbol: {symbol}")))
}

/// 기간 조회.
///
/// GET /api/v1/stocks/{symbol}/history?start=YYYY-MM-DD&end=YYYY-MM-DD
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let symbol = path_symbol(&symbol)?;
    let end = parse_date(query.end.as_deref(), "end")?.unwrap_or_else(|| Utc::now().date_naive());
    let start = parse_date(query.start.as_deref(), "start")?
        .unwrap_or(end - Duration::days(DEFAULT_HISTORY_DAYS));
    if start > end {
        return Err(ApiError::bad_request("start date must not be after end date"));
    }

    let records = state.repository.get_range(symbol, start, end).await?;
    Ok(Json(HistoryResponse {
        symbol: symbol.to_string(),
        start_date: start,
        end_date: end,
        record_count: records.len(),
        records,
    }))
}

/// 품질 태그별 레코드 수.
///
/// GET /api/v1/stocks/{symbol}/quality
pub async fn get_quality(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> ApiResult<Json<BTreeMap<String, i64>>> {
    let symbol = path_symbol(&symbol)?;
    Ok(Json(state.repository.quality_stats(symbol).await?))
}

/// 모든 Provider 응답 비교.
///
/// GET /api/v1/stocks/{symbol}/compare
pub async fn compare_providers(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> ApiResult<Json<CompareResponse>> {
    let symbol = path_symbol(&symbol)?;
    let results = state
        .stock_service
        .compare(symbol, &CancellationToken::new())
        .await?;

    Ok(Json(CompareResponse {
        symbol: symbol.to_string(),
        succeeded: results.iter().filter(|r| r.succeeded).count(),
        results,
    }))
}

/// 종목별 저장 현황.
///
/// GET /api/v1/stocks/summary
pub async fn get_summary(State(state): State<Arc<AppState>>) -> ApiResult<Json<SummaryResponse>> {
    let stocks = state.repository.get_summary().await?;
    Ok(Json(SummaryResponse {
        total: stocks.len(),
        stocks,
    }))
}

/// 배치 수집 제출.
///
/// 제출된 종목이 하나도 없으면 429를 반환합니다.
/// POST /api/v1/stocks/batch-update
pub async fn batch_update(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchUpdateRequest>,
) -> ApiResult<(StatusCode, Json<BatchSubmission>)> {
    if let Err(errors) = request.validate() {
        let message = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{}: 유효하지 않은 값", field))
                })
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message));
    }

    let submission = state
        .batch_service
        .submit_batch(&request.symbols, request.broker)?;

    if submission.total_symbols == 0 {
        let details = serde_json::to_value(&submission).unwrap_or_default();
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "QUEUE_FULL",
            "No tasks could be submitted",
        )
        .with_details(details));
    }

    Ok((StatusCode::ACCEPTED, Json(submission)))
}

/// 종목 라우터 생성.
pub fn stocks_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/batch-update", post(batch_update))
        .route("/summary", get(get_summary))
        .route("/{symbol}/daily", get(get_stock_daily))
        .route("/{symbol}/latest", get(get_latest))
        .route("/{symbol}/history", get(get_history))
        .route("/{symbol}/quality", get(get_quality))
        .route("/{symbol}/compare", get(compare_providers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::create_test_state;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    const FIXTURE: &str = "2024/01/02,2024/01/03,100,101,99,101,500,101,103,98,102,600";

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn app_with(urls: &[String], workers: usize) -> Router {
        stocks_router().with_state(Arc::new(create_test_state(urls, workers)))
    }

    #[test]
    fn test_symbol_validation() {
        assert!(is_valid_symbol("2330"));
        assert!(is_valid_symbol("00878"));
        assert!(is_valid_symbol("BRK.B"));
        assert!(!is_valid_symbol(""));
        assert!(!is_valid_symbol("23 30"));
        assert!(!is_valid_symbol("a/b"));
        assert!(!is_valid_symbol("12345678901234567"));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date(Some("2024-01-02"), "start").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2)
        );
        assert_eq!(parse_date(None, "start").unwrap(), None);
        assert_eq!(parse_date(Some(""), "start").unwrap(), None);
        assert!(parse_date(Some("2024/01/02"), "start").is_err());
    }

    #[tokio::test]
    async fn test_batch_update_accepts_and_reports_rejections() {
        let app = app_with(&["http://127.0.0.1:9/".to_string()], 1);
        let body = serde_json::json!({"symbols": ["2330", "2317", "2454"], "broker": "fubon"});

        let (status, json) = send(app, post_json("/batch-update", body)).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "processing");
        assert_eq!(json["total_symbols"], 2);
        assert_eq!(json["rejected"][0]["symbol"], "2454");
        assert!(json["batch_id"].as_str().unwrap().starts_with("batch_"));
    }

    #[tokio::test]
    async fn test_batch_update_validation_error() {
        let app = app_with(&["http://127.0.0.1:9/".to_string()], 1);

        let (status, json) =
            send(app.clone(), post_json("/batch-update", serde_json::json!({"symbols": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "VALIDATION_ERROR");

        let (status, _) = send(
            app,
            post_json("/batch-update", serde_json::json!({"symbols": ["23 30"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_daily_rejects_invalid_symbol() {
        let app = app_with(&["http://127.0.0.1:9/".to_string()], 1);
        let (status, json) = send(app, get("/bad%20symbol/daily")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_daily_returns_records_when_save_fails() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/z/BCD/czkc1.djbcd")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(FIXTURE)
            .create_async()
            .await;

        let app = app_with(&[server.url()], 1);
        let (status, json) = send(app, get("/2330/daily")).await;

        // 데이터베이스 없이도 수집 결과는 반환
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["record_count"], 2);
        assert_eq!(json["saved"], false);
        assert!(json["save_error"].is_string());
        assert_eq!(json["records"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_daily_upstream_failure_is_bad_gateway() {
        let app = app_with(&["http://127.0.0.1:9/".to_string()], 1);
        let (status, json) = send(app, get("/2330/daily")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["code"], "UPSTREAM_ERROR");
    }

    #[tokio::test]
    async fn test_compare_reports_every_provider() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/z/BCD/czkc1.djbcd")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(FIXTURE)
            .create_async()
            .await;

        let app = app_with(&[server.url(), "http://127.0.0.1:9/".to_string()], 1);
        let (status, json) = send(app, get("/2330/compare")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["succeeded"], 1);
        assert_eq!(json["results"].as_array().unwrap().len(), 2);
        assert_eq!(json["results"][1]["succeeded"], false);
    }

    #[tokio::test]
    async fn test_history_rejects_inverted_range() {
        let app = app_with(&["http://127.0.0.1:9/".to_string()], 1);
        let (status, _) = send(app, get("/2330/history?start=2024-02-01&end=2024-01-01")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
