//! 저장된 일봉 조회.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::collections::BTreeMap;
use stock_core::DailyBar;
use tracing::instrument;

use crate::error::Result;

const SELECT_COLUMNS: &str = "id, stock_code, trade_date, open_price, high_price, low_price, \
     close_price, volume, turnover, data_source, data_quality, is_validated, created_at, updated_at";

/// `stock_daily_data` 행.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StockDailyRecord {
    pub id: i64,
    pub stock_code: String,
    pub trade_date: NaiveDate,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub close_price: Decimal,
    pub volume: i64,
    pub turnover: Option<Decimal>,
    pub data_source: String,
    pub data_quality: String,
    pub is_validated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockDailyRecord {
    /// 도메인 레코드로 변환합니다. 알 수 없는 품질 태그는 `raw`로 취급합니다.
    pub fn into_bar(self) -> DailyBar {
        let mut bar = DailyBar::new(
            self.stock_code,
            self.trade_date,
            self.open_price,
            self.high_price,
            self.low_price,
            self.close_price,
            self.volume,
        )
        .with_source(self.data_source)
        .with_quality(self.data_quality.parse().unwrap_or_default());
        bar.turnover = self.turnover;
        bar.validated = self.is_validated;
        bar
    }
}

/// 종목별 저장 현황.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StockSummary {
    pub stock_code: String,
    pub record_count: i64,
    pub first_date: Option<NaiveDate>,
    pub latest_date: Option<NaiveDate>,
    pub data_source: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// 일봉 조회 repository.
#[derive(Debug, Clone)]
pub struct DailyBarRepository {
    pool: PgPool,
}

impl DailyBarRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `(종목, 거래일)` 단건 조회.
    #[instrument(skip(self))]
    pub async fn get(&self, code: &str, date: NaiveDate) -> Result<Option<StockDailyRecord>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM stock_daily_data WHERE stock_code = $1 AND trade_date = $2"
        );
        let record = sqlx::query_as(&query)
            .bind(code)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// 가장 최근 거래일 레코드.
    #[instrument(skip(self))]
    pub async fn get_latest(&self, code: &str) -> Result<Option<StockDailyRecord>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM stock_daily_data \
             WHERE stock_code = $1 ORDER BY trade_date DESC LIMIT 1"
        );
        let record = sqlx::query_as(&query)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// 기간 조회 (양 끝 포함, 날짜 오름차순).
    #[instrument(skip(self))]
    pub async fn get_range(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<StockDailyRecord>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM stock_daily_data \
             WHERE stock_code = $1 AND trade_date BETWEEN $2 AND $3 ORDER BY trade_date ASC"
        );
        let records = sqlx::query_as(&query)
            .bind(code)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// 종목별 저장 현황.
    #[instrument(skip(self))]
    pub async fn get_summary(&self) -> Result<Vec<StockSummary>> {
        let summary = sqlx::query_as(
            r#"
            SELECT
                stock_code,
                COUNT(*) AS record_count,
                MIN(trade_date) AS first_date,
                MAX(trade_date) AS latest_date,
                MAX(data_source) AS data_source,
                MAX(updated_at) AS last_updated
            FROM stock_daily_data
            GROUP BY stock_code
            ORDER BY stock_code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(summary)
    }

    /// 종목의 품질 태그별 레코드 수.
    #[instrument(skip(self))]
    pub async fn quality_stats(&self, code: &str) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT data_quality, COUNT(*)
            FROM stock_daily_data
            WHERE stock_code = $1
            GROUP BY data_quality
            "#,
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// 레코드 존재 여부. `date`가 없으면 종목 단위로 확인합니다.
    #[instrument(skip(self))]
    pub async fn exists(&self, code: &str, date: Option<NaiveDate>) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM stock_daily_data
                WHERE stock_code = $1 AND ($2::date IS NULL OR trade_date = $2)
            )
            "#,
        )
        .bind(code)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
