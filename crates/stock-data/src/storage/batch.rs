//! 일봉 배치 저장.
//!
//! - upsert: 청크 단위 UNNEST 다중 행 upsert, `(stock_code, trade_date)` 충돌 시 마지막 값 우선
//! - insert: `COPY ... FROM STDIN` 일괄 적재, 충돌 처리 없음 (최초 적재 전용)
//!
//! 재시도는 전체 작업 단위로 수행하며 upsert의 멱등성에 의존합니다.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolCopyExt};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stock_core::{DailyBar, DataQuality};
use tracing::{error, info, instrument, warn};

use crate::error::{DataError, Result};

/// 기본 재시도 대기 단위 (n번째 재시도 전 n × 1초).
pub const DEFAULT_RETRY_UNIT: Duration = Duration::from_secs(1);

/// 일봉 쓰기 백엔드.
#[async_trait]
pub trait DailyBarWriter: Send + Sync {
    /// 한 청크를 단일 다중 행 upsert로 저장합니다.
    async fn upsert_chunk(&self, chunk: &[DailyBar]) -> Result<u64>;

    /// COPY 경로로 일괄 적재합니다.
    async fn copy_in(&self, bars: &[DailyBar]) -> Result<u64>;

    /// 기간 내 레코드 삭제.
    async fn delete_range(&self, code: &str, start: NaiveDate, end: NaiveDate) -> Result<u64>;

    /// 품질 태그 일괄 변경.
    async fn update_quality(&self, code: &str, from: DataQuality, to: DataQuality)
        -> Result<u64>;
}

/// PostgreSQL 쓰기 백엔드.
#[derive(Debug, Clone)]
pub struct PgDailyBarWriter {
    pool: PgPool,
}

impl PgDailyBarWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DailyBarWriter for PgDailyBarWriter {
    async fn upsert_chunk(&self, chunk: &[DailyBar]) -> Result<u64> {
        if chunk.is_empty() {
            return Ok(0);
        }

        // 각 컬럼에 대한 배열 생성
        let codes: Vec<&str> = chunk.iter().map(|b| b.instrument_code.as_str()).collect();
        let dates: Vec<NaiveDate> = chunk.iter().map(|b| b.trade_date).collect();
        let opens: Vec<Decimal> = chunk.iter().map(|b| b.open).collect();
        let highs: Vec<Decimal> = chunk.iter().map(|b| b.high).collect();
        let lows: Vec<Decimal> = chunk.iter().map(|b| b.low).collect();
        let closes: Vec<Decimal> = chunk.iter().map(|b| b.close).collect();
        let volumes: Vec<i64> = chunk.iter().map(|b| b.volume).collect();
        let turnovers: Vec<Option<Decimal>> = chunk.iter().map(|b| b.turnover).collect();
        let sources: Vec<&str> = chunk.iter().map(|b| b.source.as_str()).collect();
        let qualities: Vec<&str> = chunk.iter().map(|b| b.quality.as_str()).collect();
        let validated: Vec<bool> = chunk.iter().map(|b| b.validated).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO stock_daily_data
                (stock_code, trade_date, open_price, high_price, low_price, close_price,
                 volume, turnover, data_source, data_quality, is_validated)
            SELECT * FROM UNNEST(
                $1::text[], $2::date[],
                $3::numeric[], $4::numeric[], $5::numeric[], $6::numeric[],
                $7::int8[], $8::numeric[], $9::text[], $10::text[], $11::bool[]
            )
            ON CONFLICT (stock_code, trade_date) DO UPDATE SET
                open_price = EXCLUDED.open_price,
                high_price = EXCLUDED.high_price,
                low_price = EXCLUDED.low_price,
                close_price = EXCLUDED.close_price,
                volume = EXCLUDED.volume,
                turnover = EXCLUDED.turnover,
                data_source = EXCLUDED.data_source,
                data_quality = EXCLUDED.data_quality,
                is_validated = EXCLUDED.is_validated,
                updated_at = NOW()
            "#,
        )
        .bind(&codes)
        .bind(&dates)
        .bind(&opens)
        .bind(&highs)
        .bind(&lows)
        .bind(&closes)
        .bind(&volumes)
        .bind(&turnovers)
        .bind(&sources)
        .bind(&qualities)
        .bind(&validated)
        .execute(&self.pool)
        .await
        .map_err(|e| DataError::Persistence(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn copy_in(&self, bars: &[DailyBar]) -> Result<u64> {
        if bars.is_empty() {
            return Ok(0);
        }

        let mut copy = self
            .pool
            .copy_in_raw(
                "COPY stock_daily_data \
                 (stock_code, trade_date, open_price, high_price, low_price, close_price, \
                  volume, turnover, data_source, data_quality, is_validated) \
                 FROM STDIN WITH (FORMAT csv)",
            )
            .await
            .map_err(|e| DataError::Persistence(e.to_string()))?;

        let payload = encode_csv(bars);
        let sent = copy.send(payload.into_bytes()).await.map(|_| ());
        if let Err(e) = sent {
            let _ = copy.abort(e.to_string()).await;
            return Err(DataError::Persistence(e.to_string()));
        }

        copy.finish()
            .await
            .map_err(|e| DataError::Persistence(e.to_string()))
    }

    async fn delete_range(&self, code: &str, start: NaiveDate, end: NaiveDate) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM stock_daily_data WHERE stock_code = $1 AND trade_date BETWEEN $2 AND $3",
        )
        .bind(code)
        .bind(start)
        .bind(end)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_quality(
        &self,
        code: &str,
        from: DataQuality,
        to: DataQuality,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE stock_daily_data
            SET data_quality = $3, updated_at = NOW()
            WHERE stock_code = $1 AND data_quality = $2
            "#,
        )
        .bind(code)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// COPY용 CSV 본문. 문자열 필드는 항상 인용하며, 거래대금이 없으면 빈 값(NULL)입니다.
fn encode_csv(bars: &[DailyBar]) -> String {
    let mut out = String::with_capacity(bars.len() * 96);
    for bar in bars {
        let turnover = bar.turnover.map(|t| t.to_string()).unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{}\n",
            quote_csv(&bar.instrument_code),
            bar.trade_date.format("%Y-%m-%d"),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume,
            turnover,
            quote_csv(&bar.source),
            quote_csv(bar.quality.as_str()),
            bar.validated,
        ));
    }
    out
}

/// 같은 `(종목, 거래일)` 레코드는 마지막 값만 남깁니다. 순서는 첫 등장 위치 기준.
///
/// 한 문장 안에서 같은 키를 두 번 갱신하면 PostgreSQL이 upsert를 거부합니다.
fn dedup_last_wins(bars: &[DailyBar]) -> Vec<DailyBar> {
    let mut positions: HashMap<(&str, NaiveDate), usize> = HashMap::with_capacity(bars.len());
    let mut unique: Vec<DailyBar> = Vec::with_capacity(bars.len());

    for bar in bars {
        match positions.entry((bar.instrument_code.as_str(), bar.trade_date)) {
            Entry::Occupied(slot) => unique[*slot.get()] = bar.clone(),
            Entry::Vacant(slot) => {
                slot.insert(unique.len());
                unique.push(bar.clone());
            }
        }
    }

    if unique.len() < bars.len() {
        warn!(
            duplicates = bars.len() - unique.len(),
            "중복 (종목, 거래일) 레코드 병합"
        );
    }
    unique
}

fn quote_csv(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// 배치 저장기.
#[derive(Clone)]
pub struct BatchInserter {
    writer: Arc<dyn DailyBarWriter>,
    batch_size: usize,
    retry_unit: Duration,
}

impl BatchInserter {
    /// 쓰기 백엔드와 청크 크기로 생성합니다.
    pub fn new(writer: Arc<dyn DailyBarWriter>, batch_size: usize) -> Self {
        Self {
            writer,
            batch_size: batch_size.max(1),
            retry_unit: DEFAULT_RETRY_UNIT,
        }
    }

    /// PostgreSQL 백엔드로 생성합니다.
    pub fn postgres(pool: PgPool, batch_size: usize) -> Self {
        Self::new(Arc::new(PgDailyBarWriter::new(pool)), batch_size)
    }

    /// 재시도 대기 단위를 변경합니다.
    #[must_use]
    pub fn with_retry_unit(mut self, unit: Duration) -> Self {
        self.retry_unit = unit;
        self
    }

    /// 청크 크기.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 청크 단위 upsert. 실패한 청크에서 즉시 중단합니다.
    #[instrument(skip(self, bars), fields(count = bars.len()))]
    pub async fn upsert(&self, bars: &[DailyBar]) -> Result<u64> {
        if bars.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let bars = dedup_last_wins(bars);
        let mut affected = 0;

        for chunk in bars.chunks(self.batch_size) {
            affected += self.writer.upsert_chunk(chunk).await?;
        }

        info!(
            rows_affected = affected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "배치 upsert 완료"
        );
        Ok(affected)
    }

    /// 재시도 포함 upsert.
    ///
    /// 최초 시도 후 최대 `max_retries`회 재시도하며 재시도마다 전체 배치를 다시 보냅니다.
    pub async fn upsert_with_retry(&self, bars: &[DailyBar], max_retries: u32) -> Result<u64> {
        self.with_retry("upsert", max_retries, || self.upsert(bars))
            .await
    }

    /// COPY 경로 일괄 적재 (최초 적재 전용, 충돌 처리 없음).
    #[instrument(skip(self, bars), fields(count = bars.len()))]
    pub async fn insert(&self, bars: &[DailyBar]) -> Result<u64> {
        if bars.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let inserted = self.writer.copy_in(&dedup_last_wins(bars)).await?;

        info!(
            rows_inserted = inserted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "COPY 적재 완료"
        );
        Ok(inserted)
    }

    /// 재시도 포함 COPY 적재.
    pub async fn insert_with_retry(&self, bars: &[DailyBar], max_retries: u32) -> Result<u64> {
        self.with_retry("insert", max_retries, || self.insert(bars))
            .await
    }

    /// 기간 내 레코드 삭제.
    #[instrument(skip(self))]
    pub async fn bulk_delete(&self, code: &str, start: NaiveDate, end: NaiveDate) -> Result<u64> {
        let deleted = self.writer.delete_range(code, start, end).await?;
        info!(rows_deleted = deleted, "일괄 삭제 완료");
        Ok(deleted)
    }

    /// 품질 태그 일괄 변경.
    #[instrument(skip(self))]
    pub async fn bulk_update_quality(
        &self,
        code: &str,
        from: DataQuality,
        to: DataQuality,
    ) -> Result<u64> {
        let updated = self.writer.update_quality(code, from, to).await?;
        info!(rows_updated = updated, "품질 태그 일괄 변경 완료");
        Ok(updated)
    }

    async fn with_retry<F, Fut>(&self, operation: &str, max_retries: u32, mut op: F) -> Result<u64>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<u64>>,
    {
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let wait = self.retry_unit * attempt;
                warn!(
                    operation = operation,
                    attempt = attempt,
                    max_retries = max_retries,
                    wait_ms = wait.as_millis() as u64,
                    "배치 저장 재시도"
                );
                tokio::time::sleep(wait).await;
            }

            match op().await {
                Ok(rows) => return Ok(rows),
                Err(e) => {
                    error!(operation = operation, attempt = attempt, error = %e, "배치 저장 실패");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Persistence("no attempt made".to_string())))
    }
}

impl std::fmt::Debug for BatchInserter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchInserter")
            .field("batch_size", &self.batch_size)
            .field("retry_unit", &self.retry_unit)
            .finish()
    }
}
