//! 정규화된 일봉(OHLCV) 레코드.
//!
//! Provider마다 다른 텍스트 인코딩을 파싱한 결과는 모두 이 형태로 정규화됩니다.
//! `(instrument_code, trade_date)`가 저장소의 고유 키입니다.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 데이터 품질 태그.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    /// 가공되지 않은 원본
    #[default]
    Raw,
    /// 일봉 단위로 보정된 데이터 (Provider 파서 출력)
    CorrectedDaily,
}

impl DataQuality {
    /// DB 저장용 문자열.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::CorrectedDaily => "corrected_daily",
        }
    }
}

impl fmt::Display for DataQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" | "" => Ok(Self::Raw),
            "corrected_daily" => Ok(Self::CorrectedDaily),
            other => Err(format!("Unknown data quality: {}", other)),
        }
    }
}

/// 한 종목의 하루치 가격 레코드.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyBar {
    /// 종목 코드 (예: "2330")
    pub instrument_code: String,
    /// 거래일 (시각 정보 없음)
    pub trade_date: NaiveDate,
    /// 시가
    pub open: Decimal,
    /// 고가
    pub high: Decimal,
    /// 저가
    pub low: Decimal,
    /// 종가
    pub close: Decimal,
    /// 거래량
    pub volume: i64,
    /// 거래대금 (`volume * close / 1000`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turnover: Option<Decimal>,
    /// 데이터를 제공한 Provider 이름
    pub source: String,
    /// 데이터 품질 태그
    pub quality: DataQuality,
    /// Validator 통과 여부
    pub validated: bool,
}

impl DailyBar {
    /// 새 레코드 생성.
    ///
    /// 거래대금은 거래량과 종가가 모두 양수일 때만 계산됩니다.
    pub fn new(
        instrument_code: impl Into<String>,
        trade_date: NaiveDate,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: i64,
    ) -> Self {
        Self {
            instrument_code: instrument_code.into(),
            trade_date,
            open,
            high,
            low,
            close,
            volume,
            turnover: compute_turnover(volume, close),
            source: String::new(),
            quality: DataQuality::Raw,
            validated: false,
        }
    }

    /// Provider 이름 지정.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// 품질 태그 지정.
    #[must_use]
    pub fn with_quality(mut self, quality: DataQuality) -> Self {
        self.quality = quality;
        self
    }

    /// OHLC 관계 불변식 확인.
    ///
    /// `0 < low <= open <= high`, `0 < low <= close <= high`, `volume >= 0`.
    pub fn is_consistent(&self) -> bool {
        self.low > Decimal::ZERO
            && self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
            && self.volume >= 0
    }

    /// 고가 대비 저가 배율.
    pub fn range_ratio(&self) -> Option<Decimal> {
        if self.low > Decimal::ZERO {
            self.high.checked_div(self.low)
        } else {
            None
        }
    }
}

/// 거래대금 계산 (`volume * close / 1000`, 소수점 4자리).
///
/// 값이 Decimal 범위를 넘으면 `None`.
pub fn compute_turnover(volume: i64, close: Decimal) -> Option<Decimal> {
    if volume <= 0 || close <= Decimal::ZERO {
        return None;
    }
    Decimal::from(volume)
        .checked_mul(close)?
        .checked_div(Decimal::from(1000))
        .map(|t| t.round_dp(4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_turnover_derived_from_volume_and_close() {
        let bar = DailyBar::new("2330", date(2024, 1, 2), dec!(100), dec!(102), dec!(99), dec!(101), 2000);
        assert_eq!(bar.turnover, Some(dec!(202)));

        let no_volume = DailyBar::new("2330", date(2024, 1, 2), dec!(100), dec!(102), dec!(99), dec!(101), 0);
        assert_eq!(no_volume.turnover, None);
    }

    #[test]
    fn test_turnover_overflow_is_none() {
        assert_eq!(compute_turnover(i64::MAX, Decimal::MAX), None);
        assert_eq!(compute_turnover(1_000_000_000_000_000_000, dec!(100000000000)), None);

        let bar = DailyBar::new("2330", date(2024, 1, 2), Decimal::MAX, Decimal::MAX, dec!(1), Decimal::MAX, 10);
        assert_eq!(bar.turnover, None);
        assert_eq!(DailyBar { low: dec!(0.0000001), ..bar }.range_ratio(), None);
    }

    #[test]
    fn test_is_consistent() {
        let bar = DailyBar::new("2330", date(2024, 1, 2), dec!(100), dec!(102), dec!(99), dec!(101), 10);
        assert!(bar.is_consistent());

        let mut broken = bar.clone();
        broken.high = dec!(98);
        assert!(!broken.is_consistent());

        let mut zero_low = bar;
        zero_low.low = Decimal::ZERO;
        assert!(!zero_low.is_consistent());
    }

    #[test]
    fn test_data_quality_round_trip() {
        assert_eq!("raw".parse::<DataQuality>().unwrap(), DataQuality::Raw);
        assert_eq!(
            "CORRECTED_DAILY".parse::<DataQuality>().unwrap(),
            DataQuality::CorrectedDaily
        );
        assert!("adjusted".parse::<DataQuality>().is_err());
        assert_eq!(DataQuality::CorrectedDaily.to_string(), "corrected_daily");
    }
}
