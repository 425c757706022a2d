//! 도메인 모델.

pub mod daily_bar;
pub mod fetch;

pub use daily_bar::{DailyBar, DataQuality};
pub use fetch::{duration_millis, FetchAttemptResult};
