//! 일봉 레코드 검증.
//!
//! 검증 실패는 배치를 중단시키지 않습니다. 실패한 레코드는 제외되고
//! 사유만 함께 반환됩니다.

use chrono::Datelike;
use rust_decimal::Decimal;
use stock_core::DailyBar;

use crate::error::ValidationError;

/// 고가/저가 배율 상한 (이상치 필터).
const MAX_RANGE_MULTIPLE: i64 = 10;

/// 허용 연도 범위 (이상치 필터).
const SANE_YEARS: std::ops::RangeInclusive<i32> = 1990..=2100;

/// 단일 레코드 검증.
///
/// 검사 순서: 필수 필드, 가격 양수, 고가 관계, 저가 관계, 거래량.
pub fn validate(bar: &DailyBar) -> Result<(), ValidationError> {
    let code = &bar.instrument_code;
    let date = bar.trade_date;

    if code.trim().is_empty() {
        return Err(ValidationError::MissingCode { date });
    }

    for (field, value) in [
        ("open", bar.open),
        ("high", bar.high),
        ("low", bar.low),
        ("close", bar.close),
    ] {
        if value <= Decimal::ZERO {
            return Err(ValidationError::NonPositivePrice {
                code: code.clone(),
                date,
                field,
                value,
            });
        }
    }

    if bar.high < bar.open {
        return Err(ValidationError::HighBelowOpen {
            code: code.clone(),
            date,
            high: bar.high,
            open: bar.open,
        });
    }
    if bar.high < bar.close {
        return Err(ValidationError::HighBelowClose {
            code: code.clone(),
            date,
            high: bar.high,
            close: bar.close,
        });
    }
    if bar.high < bar.low {
        return Err(ValidationError::HighBelowLow {
            code: code.clone(),
            date,
            high: bar.high,
            low: bar.low,
        });
    }
    if bar.low > bar.open {
        return Err(ValidationError::LowAboveOpen {
            code: code.clone(),
            date,
            low: bar.low,
            open: bar.open,
        });
    }
    if bar.low > bar.close {
        return Err(ValidationError::LowAboveClose {
            code: code.clone(),
            date,
            low: bar.low,
            close: bar.close,
        });
    }
    if bar.volume < 0 {
        return Err(ValidationError::NegativeVolume {
            code: code.clone(),
            date,
            volume: bar.volume,
        });
    }

    Ok(())
}

/// 배치 검증. 유효 레코드는 `validated = true`로 표시됩니다.
pub fn validate_batch(bars: Vec<DailyBar>) -> (Vec<DailyBar>, Vec<ValidationError>) {
    let mut valid = Vec::with_capacity(bars.len());
    let mut errors = Vec::new();

    for mut bar in bars {
        match validate(&bar) {
            Ok(()) => {
                bar.validated = true;
                valid.push(bar);
            }
            Err(e) => errors.push(e),
        }
    }

    (valid, errors)
}

/// 이상치 제거.
///
/// `high > low × 10`이거나 연도가 1990..=2100 밖이면 제외합니다.
pub fn sanitize(bars: Vec<DailyBar>) -> Vec<DailyBar> {
    bars.into_iter()
        .filter(|bar| {
            // 배율 계산이 범위를 넘으면 이상치로 보지 않음
            bar.low
                .checked_mul(Decimal::from(MAX_RANGE_MULTIPLE))
                .map_or(true, |limit| bar.high <= limit)
        })
        .filter(|bar| SANE_YEARS.contains(&bar.trade_date.year()))
        .collect()
}

/// 필수 필드가 채워져 있고 가격이 모두 양수인지 확인합니다.
pub fn is_complete(bar: &DailyBar) -> bool {
    !bar.instrument_code.trim().is_empty()
        && bar.open > Decimal::ZERO
        && bar.high > Decimal::ZERO
        && bar.low > Decimal::ZERO
        && bar.close > Decimal::ZERO
}
