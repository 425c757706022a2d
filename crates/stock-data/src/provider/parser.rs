//! Provider 응답 파서.
//!
//! Provider 응답은 형식이 통일되어 있지 않아 구조적으로 판별 가능한 레이아웃을
//! 순서대로 검사합니다. 첫 번째로 구조가 맞는 레이아웃이 파싱을 담당합니다.
//!
//! | 레이아웃 | 형태 |
//! |---|---|
//! | [`Layout::FlatDateRun`] | `d1,d2,...,dN,` 뒤에 날짜별 연속 숫자 (`ppd = 숫자 수 / 날짜 수`), 또는 필드별 연속 숫자 |
//! | [`Layout::RowMajorSextets`] | `date,open,high,low,close,volume` 반복 |
//! | [`Layout::WhitespaceSections`] | 공백으로 구분된 6개 콤마 리스트 (날짜, 시가, 고가, 저가, 종가, 거래량) |
//! | [`Layout::TabRows`] | 줄마다 탭 구분 `date open high low close volume`, 민국 연도 허용 |
//!
//! 어떤 레이아웃에도 맞지 않으면 기본 레이아웃을 관대하게 적용해
//! `NoDatesFound` 등 표준 오류를 생성합니다.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use stock_core::{DailyBar, DataQuality};

use crate::error::ParseError;

/// 민국 연도 → 서기 연도 오프셋.
const ROC_YEAR_OFFSET: i32 = 1911;

/// 날짜당 최소 필드 수 (OHLC).
const MIN_FIELDS_PER_DATE: usize = 4;

/// 응답 레이아웃.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// 날짜 연속 후 날짜별 숫자 묶음
    FlatDateRun,
    /// 행 단위 6개 필드 반복
    RowMajorSextets,
    /// 공백 구분 6개 섹션 (열 단위)
    WhitespaceSections,
    /// 탭 구분 행
    TabRows,
}

impl Layout {
    /// 판별 순서.
    pub const DETECTION_ORDER: [Layout; 4] = [
        Layout::FlatDateRun,
        Layout::RowMajorSextets,
        Layout::WhitespaceSections,
        Layout::TabRows,
    ];

    /// 본문 구조가 이 레이아웃과 일치하는지 확인합니다.
    pub fn matches(&self, body: &str) -> bool {
        match self {
            Layout::FlatDateRun => matches_flat_date_run(body),
            Layout::RowMajorSextets => matches_row_major(body),
            Layout::WhitespaceSections => split_sections(body).is_some(),
            Layout::TabRows => matches_tab_rows(body),
        }
    }

    /// 이 레이아웃으로 파싱합니다.
    pub fn parse(&self, body: &str, code: &str) -> Result<Vec<DailyBar>, ParseError> {
        match self {
            Layout::FlatDateRun => parse_flat(body, code),
            Layout::RowMajorSextets => parse_row_major(body, code),
            Layout::WhitespaceSections => parse_sections(body, code),
            Layout::TabRows => parse_tab_rows(body, code),
        }
    }

    /// 레이아웃 이름.
    pub fn name(&self) -> &'static str {
        match self {
            Layout::FlatDateRun => "flat_date_run",
            Layout::RowMajorSextets => "row_major_sextets",
            Layout::WhitespaceSections => "whitespace_sections",
            Layout::TabRows => "tab_rows",
        }
    }
}

/// 구조가 일치하는 첫 레이아웃을 반환합니다.
pub fn detect_layout(body: &str) -> Option<Layout> {
    Layout::DETECTION_ORDER
        .into_iter()
        .find(|layout| layout.matches(body))
}

/// 응답 본문을 일봉 레코드로 변환합니다.
pub fn parse(body: &str, code: &str) -> Result<Vec<DailyBar>, ParseError> {
    let body = body.trim_start_matches('\u{feff}').trim();
    if body.is_empty() {
        return Err(ParseError::EmptyBody);
    }

    match detect_layout(body) {
        Some(layout) => layout.parse(body, code),
        None => parse_flat(body, code),
    }
}

// ==================== 토큰 분류 ====================

#[derive(Debug, Clone, Copy)]
enum Token {
    Date(Option<NaiveDate>),
    Number(Decimal),
}

/// `YYYY/MM/DD` 형식 확인 (연도 1900..=2100, 월 1..=12, 일 1..=31).
///
/// 형식은 맞지만 달력상 존재하지 않는 날짜는 `Some(None)`을 반환합니다.
fn classify_date(token: &str) -> Option<Option<NaiveDate>> {
    let mut parts = token.split('/');
    let (y, m, d) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let year: i32 = y.parse().ok()?;
    let month: u32 = m.parse().ok()?;
    let day: u32 = d.parse().ok()?;
    if !(1900..=2100).contains(&year) || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(NaiveDate::from_ymd_opt(year, month, day))
}

fn classify(token: &str) -> Option<Token> {
    if let Some(date) = classify_date(token) {
        return Some(Token::Date(date));
    }
    clean_number(token, false).map(Token::Number)
}

/// 통화 표기와 (선택적으로) 천 단위 구분자를 제거한 뒤 숫자로 변환합니다.
fn clean_number(token: &str, strip_thousands: bool) -> Option<Decimal> {
    let mut s = token.trim();
    for prefix in ["NT$", "$"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim_start();
        }
    }
    for suffix in ["TWD", "twd", "USD", "usd", "元"] {
        if let Some(rest) = s.strip_suffix(suffix) {
            s = rest.trim_end();
        }
    }
    if s.is_empty() {
        return None;
    }
    if strip_thousands && s.contains(',') {
        Decimal::from_str(&s.replace(',', "")).ok()
    } else {
        Decimal::from_str(s).ok()
    }
}

fn comma_tokens(body: &str) -> Vec<&str> {
    body.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}

/// 날짜 필드로 후보 레코드를 만들고 OHLC 불변식을 만족하지 않으면 `None`.
fn build_candidate(code: &str, date: NaiveDate, fields: &[Decimal]) -> Option<DailyBar> {
    let (open, high, low, close) = (fields[0], fields[1], fields[2], fields[3]);
    let volume = match fields.get(4) {
        Some(v) => v.trunc().to_i64()?,
        None => 0,
    };
    let bar = DailyBar::new(code, date, open, high, low, close, volume)
        .with_quality(DataQuality::CorrectedDaily);
    bar.is_consistent().then_some(bar)
}

fn finish(records: Vec<DailyBar>, candidates: usize) -> Result<Vec<DailyBar>, ParseError> {
    if records.is_empty() {
        Err(ParseError::NoValidRecords { candidates })
    } else {
        Ok(records)
    }
}

// ==================== 기본 레이아웃: 날짜 연속 + 날짜별 숫자 ====================

fn matches_flat_date_run(body: &str) -> bool {
    let tokens = comma_tokens(body);
    if tokens.iter().any(|t| t.contains(char::is_whitespace)) {
        return false;
    }
    let kinds: Vec<Option<Token>> = tokens.iter().map(|t| classify(t)).collect();
    let last_date = kinds
        .iter()
        .rposition(|k| matches!(k, Some(Token::Date(_))));
    let first_number = kinds.iter().position(|k| matches!(k, Some(Token::Number(_))));
    match (last_date, first_number) {
        (Some(last_date), Some(first_number)) => last_date < first_number,
        _ => false,
    }
}

/// 기본 레이아웃 파싱.
///
/// 공백이 섞인 토큰(`"2025/09/09 258.27"`)은 부분별로 분류합니다.
fn parse_flat(body: &str, code: &str) -> Result<Vec<DailyBar>, ParseError> {
    let mut dates = Vec::new();
    let mut numbers = Vec::new();

    for token in comma_tokens(body) {
        for part in token.split_whitespace() {
            match classify(part) {
                Some(Token::Date(d)) => dates.push(d),
                Some(Token::Number(n)) => numbers.push(n),
                None => {}
            }
        }
    }

    if dates.is_empty() {
        return Err(ParseError::NoDatesFound);
    }
    if numbers.is_empty() {
        return Err(ParseError::NoNumbersFound);
    }

    let per_date = numbers.len() / dates.len();
    if per_date < MIN_FIELDS_PER_DATE {
        return Err(ParseError::InsufficientFields {
            dates: dates.len(),
            numbers: numbers.len(),
        });
    }

    // 날짜별 묶음과 필드별 연속 중 유효 레코드가 더 많은 쪽을 사용 (동률이면 날짜별)
    let by_date = slice_by_date(&dates, &numbers, per_date, code);
    let by_field = slice_by_field(&dates, &numbers, code);
    let records = if by_field.len() > by_date.len() {
        by_field
    } else {
        by_date
    };

    finish(records, dates.len())
}

/// 날짜 `i`의 필드는 `numbers[i*ppd..(i+1)*ppd]`.
fn slice_by_date(
    dates: &[Option<NaiveDate>],
    numbers: &[Decimal],
    per_date: usize,
    code: &str,
) -> Vec<DailyBar> {
    dates
        .iter()
        .enumerate()
        .filter_map(|(i, date)| {
            let fields = &numbers[i * per_date..(i + 1) * per_date];
            build_candidate(code, (*date)?, fields)
        })
        .collect()
}

/// 시가 N개, 고가 N개, 저가 N개, 종가 N개, (거래량 N개) 순서의 열 단위 배치.
fn slice_by_field(dates: &[Option<NaiveDate>], numbers: &[Decimal], code: &str) -> Vec<DailyBar> {
    let n = dates.len();
    let has_volume = numbers.len() >= n * 5;

    dates
        .iter()
        .enumerate()
        .filter_map(|(i, date)| {
            let mut fields = vec![numbers[i], numbers[n + i], numbers[2 * n + i], numbers[3 * n + i]];
            if has_volume {
                fields.push(numbers[4 * n + i]);
            }
            build_candidate(code, (*date)?, &fields)
        })
        .collect()
}

// ==================== 행 단위 6필드 ====================

fn matches_row_major(body: &str) -> bool {
    let tokens = comma_tokens(body);
    if tokens.is_empty() || tokens.len() % 6 != 0 {
        return false;
    }
    tokens.chunks(6).all(|row| {
        classify_date(row[0]).is_some()
            && row[1..].iter().all(|t| clean_number(t, false).is_some())
    })
}

fn parse_row_major(body: &str, code: &str) -> Result<Vec<DailyBar>, ParseError> {
    let tokens = comma_tokens(body);
    let rows = tokens.len() / 6;
    let records: Vec<DailyBar> = tokens
        .chunks(6)
        .filter_map(|row| {
            let date = classify_date(row[0]).flatten()?;
            let fields: Option<Vec<Decimal>> =
                row[1..].iter().map(|t| clean_number(t, false)).collect();
            build_candidate(code, date, &fields?)
        })
        .collect();

    finish(records, rows)
}

// ==================== 공백 구분 6개 섹션 ====================

/// 공백으로 나눈 6개 콤마 리스트. 길이가 모두 같고 첫 섹션이 날짜여야 합니다.
fn split_sections(body: &str) -> Option<[Vec<&str>; 6]> {
    let sections: Vec<Vec<&str>> = body.split_whitespace().map(comma_tokens).collect();
    if sections.len() != 6 {
        return None;
    }
    let len = sections[0].len();
    if len == 0 || sections.iter().any(|s| s.len() != len) {
        return None;
    }
    if !sections[0].iter().all(|t| classify_date(t).is_some()) {
        return None;
    }
    sections.try_into().ok()
}

fn parse_sections(body: &str, code: &str) -> Result<Vec<DailyBar>, ParseError> {
    let Some(sections) = split_sections(body) else {
        return Err(ParseError::NoDatesFound);
    };
    let [dates, opens, highs, lows, closes, volumes] = sections;

    let records: Vec<DailyBar> = (0..dates.len())
        .filter_map(|i| {
            let date = classify_date(dates[i]).flatten()?;
            let fields = [
                clean_number(opens[i], false)?,
                clean_number(highs[i], false)?,
                clean_number(lows[i], false)?,
                clean_number(closes[i], false)?,
                clean_number(volumes[i], false).unwrap_or(Decimal::ZERO),
            ];
            build_candidate(code, date, &fields)
        })
        .collect();

    finish(records, dates.len())
}

// ==================== 탭 구분 행 ====================

/// `YYYY/MM/DD`, `YYYY-MM-DD`, 민국 `YYY/MM/DD` 날짜.
fn parse_tab_date(token: &str) -> Option<NaiveDate> {
    let sep = if token.contains('/') { '/' } else { '-' };
    let mut parts = token.trim().split(sep);
    let (y, m, d) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let mut year: i32 = y.parse().ok()?;
    if year < 1900 {
        year += ROC_YEAR_OFFSET;
    }
    NaiveDate::from_ymd_opt(year, m.parse().ok()?, d.parse().ok()?)
}

fn tab_rows(body: &str) -> impl Iterator<Item = Vec<&str>> + '_ {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.split('\t').map(str::trim).collect::<Vec<_>>())
        .filter(|fields| fields.len() >= 6)
}

fn matches_tab_rows(body: &str) -> bool {
    body.contains('\t') && tab_rows(body).any(|fields| parse_tab_date(fields[0]).is_some())
}

fn parse_tab_rows(body: &str, code: &str) -> Result<Vec<DailyBar>, ParseError> {
    let mut candidates = 0;
    let records: Vec<DailyBar> = tab_rows(body)
        .filter_map(|fields| {
            let date = parse_tab_date(fields[0])?;
            candidates += 1;
            let values: Option<Vec<Decimal>> =
                fields[1..6].iter().map(|t| clean_number(t, true)).collect();
            build_candidate(code, date, &values?)
        })
        .collect();

    finish(records, candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_flat_layout_slices_fields_per_date() {
        let body = "2024/01/02,2024/01/03,100,101,99,101,500,101,103,98,102,600";
        assert_eq!(detect_layout(body), Some(Layout::FlatDateRun));

        let records = parse(body, "2330").unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.trade_date, date(2024, 1, 2));
        assert_eq!(
            (first.open, first.high, first.low, first.close, first.volume),
            (dec!(100), dec!(101), dec!(99), dec!(101), 500)
        );
        assert_eq!(first.quality, DataQuality::CorrectedDaily);
        assert_eq!(first.instrument_code, "2330");

        let second = &records[1];
        assert_eq!(second.trade_date, date(2024, 1, 3));
        assert_eq!(
            (second.open, second.high, second.low, second.close, second.volume),
            (dec!(101), dec!(103), dec!(98), dec!(102), 600)
        );
    }

    #[test]
    fn test_flat_layout_skips_inconsistent_date() {
        // 날짜당 5개씩: 두 번째 날짜는 high(98) < open(103)이라 제외됨
        let body = "2024/01/02,2024/01/03,100,102,99,101,101,103,98,102,500,600";
        let records = parse(body, "2330").unwrap();

        assert_eq!(records.len(), 1);
        let only = &records[0];
        assert_eq!(only.trade_date, date(2024, 1, 2));
        assert_eq!(
            (only.open, only.high, only.low, only.close, only.volume),
            (dec!(100), dec!(102), dec!(99), dec!(101), 101)
        );
    }

    #[test]
    fn test_flat_layout_field_runs() {
        // 시가 2개, 고가 2개, 저가 2개, 종가 2개, 거래량 2개
        let body = "2024/01/02,2024/01/03,100,101,102,103,99,100,101,102,500,600";
        assert_eq!(detect_layout(body), Some(Layout::FlatDateRun));

        let records = parse(body, "2330").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            (records[0].open, records[0].high, records[0].low, records[0].close, records[0].volume),
            (dec!(100), dec!(102), dec!(99), dec!(101), 500)
        );
        assert_eq!(
            (records[1].open, records[1].high, records[1].low, records[1].close, records[1].volume),
            (dec!(101), dec!(103), dec!(100), dec!(102), 600)
        );
    }

    #[test]
    fn test_field_runs_without_volume() {
        let body = "2024/01/02,2024/01/03,100,101,102,103,99,100,101,102";
        let records = parse(body, "2330").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].close, dec!(102));
        assert!(records.iter().all(|r| r.volume == 0));
    }

    #[test]
    fn test_huge_values_do_not_panic() {
        let body = "2024/01/02,100000000000,100000000000,100000000000,100000000000,1000000000000000000";
        let records = parse(body, "2330").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].volume, 1_000_000_000_000_000_000);
        assert_eq!(records[0].turnover, None);
    }

    #[test]
    fn test_flat_layout_volume_defaults_to_zero() {
        let body = "2024/01/02,100,102,99,101";
        let records = parse(body, "2330").unwrap();
        assert_eq!(records[0].volume, 0);
        assert_eq!(records[0].turnover, None);
    }

    #[test]
    fn test_canonical_errors() {
        assert_eq!(parse("   ", "2330"), Err(ParseError::EmptyBody));
        assert_eq!(parse("100,101,102", "2330"), Err(ParseError::NoDatesFound));
        assert_eq!(parse("2024/01/02,abc", "2330"), Err(ParseError::NoNumbersFound));
        assert_eq!(
            parse("2024/01/02,2024/01/03,100,101,99,101,102", "2330"),
            Err(ParseError::InsufficientFields { dates: 2, numbers: 5 })
        );
        assert_eq!(
            parse("2024/01/02,100,90,99,101,5", "2330"),
            Err(ParseError::NoValidRecords { candidates: 1 })
        );
    }

    #[test]
    fn test_invalid_calendar_date_skipped() {
        let body = "2024/02/31,2024/03/01,100,101,99,100,10,100,101,99,100,20";
        let records = parse(body, "2330").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].trade_date, date(2024, 3, 1));
        assert_eq!(records[0].volume, 20);
    }

    #[test]
    fn test_year_out_of_range_is_not_a_date() {
        assert!(classify_date("1899/12/31").is_none());
        assert!(classify_date("2101/01/01").is_none());
        assert!(classify_date("2024/13/01").is_none());
        assert_eq!(classify_date("2024/02/30"), Some(None));
    }

    #[test]
    fn test_mixed_date_price_tokens() {
        let body = "2025/09/09 258.27,260,255,259,1200";
        let records = parse(body, "2330").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].open, dec!(258.27));
        assert_eq!(records[0].volume, 1200);
    }

    #[test]
    fn test_row_major_sextets() {
        let body = "2024/01/02,100,102,99,101,500,2024/01/03,101,103,100,102,600";
        assert_eq!(detect_layout(body), Some(Layout::RowMajorSextets));

        let records = parse(body, "2330").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].trade_date, date(2024, 1, 3));
        assert_eq!(records[1].close, dec!(102));
        assert_eq!(records[1].volume, 600);
    }

    #[test]
    fn test_whitespace_sections_with_currency_markers() {
        let body = "2024/01/02,2024/01/03 $100,NT$101 102,103TWD 99,100 101,102元 500,600";
        assert_eq!(detect_layout(body), Some(Layout::WhitespaceSections));

        let records = parse(body, "2330").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].open, dec!(100));
        assert_eq!(records[0].high, dec!(102));
        assert_eq!(records[1].open, dec!(101));
        assert_eq!(records[1].high, dec!(103));
        assert_eq!(records[1].close, dec!(102));
        assert_eq!(records[1].volume, 600);
    }

    #[test]
    fn test_tab_rows_with_roc_dates() {
        let body = "106/05/02\t100\t102\t99\t101\t1,500\n106/05/03\t101\t103\t100\t102\t2000\n";
        assert_eq!(detect_layout(body), Some(Layout::TabRows));

        let records = parse(body, "2330").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].trade_date, date(2017, 5, 2));
        assert_eq!(records[0].volume, 1500);
        assert_eq!(records[1].trade_date, date(2017, 5, 3));
    }

    #[test]
    fn test_clean_number() {
        assert_eq!(clean_number("NT$ 1234.5", false), Some(dec!(1234.5)));
        assert_eq!(clean_number("99 USD", false), Some(dec!(99)));
        assert_eq!(clean_number("1,234", true), Some(dec!(1234)));
        assert_eq!(clean_number("1,234", false), None);
        assert_eq!(clean_number("N/A", false), None);
    }
}
