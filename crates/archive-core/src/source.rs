//! 업스트림 시세 소스 경계.
//!
//! 실제 전송 계층(핸드셰이크, 와이어 직렬화)은 이 크레이트 밖의
//! 협력자입니다. 모든 요청 메서드는 즉시 반환하며, 결과와 에러는
//! 상관관계 레지스트리를 통해 비동기적으로 도착합니다.
//!
//! 요청 기간 계산과 타임아웃 버킷 테이블도 이 모듈에 있습니다.
//! 기간은 마지막 저장 시각으로부터의 주 수로 표현하고, 52주를 넘으면
//! 연 단위로 올림합니다.

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::instrument::Identity;

/// 히스토리 요청 옵션 (캔들 길이 / 세션 필터).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarRequestOptions {
    /// 캔들 길이 (예: "15 mins")
    pub bar_size: String,
    /// 캔들 구성 기준 (예: "Bid_Ask")
    pub what_to_show: String,
    /// 정규장만 포함 여부
    pub regular_hours_only: bool,
}

impl Default for BarRequestOptions {
    fn default() -> Self {
        Self {
            bar_size: "15 mins".to_string(),
            what_to_show: "Bid_Ask".to_string(),
            regular_hours_only: true,
        }
    }
}

/// 비동기 업스트림 시세 소스.
///
/// 구현체는 응답을 `RequestRegistry::dispatch` /
/// `RequestRegistry::dispatch_error`로 전달해야 합니다.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// 내부 계약 ID 조회 요청. 응답: `Reply::InstrumentId`.
    async fn request_instrument_id(&self, request_id: i64, instrument: &Identity) -> Result<()>;

    /// 옵션 체인(만기/행사가) 조회 요청. 응답: `Reply::OptionChain` (다발성).
    async fn request_option_chain(&self, request_id: i64, symbol: &str, con_id: i64)
        -> Result<()>;

    /// 히스토리 캔들 요청.
    /// 응답: 0개 이상의 `Reply::Bar` 후 종결 `Reply::HistoryComplete`.
    async fn request_historical_bars(
        &self,
        request_id: i64,
        instrument: &Identity,
        end: NaiveDateTime,
        span: FetchSpan,
        options: &BarRequestOptions,
    ) -> Result<()>;

    /// 연결 상태 확인
    fn is_connected(&self) -> bool;

    /// 업스트림 접속 (재접속 루프에서 호출)
    async fn connect(&self) -> Result<()>;
}

/// 히스토리 요청 기간.
///
/// 주 단위가 기본이며 52주를 넘으면 연 단위로만 표현합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSpan {
    Weeks(i64),
    Years(i64),
}

impl FetchSpan {
    /// 마지막 저장 시각으로부터 필요한 요청 기간 계산.
    ///
    /// 저장 이력이 없으면 2년 전 1월 1일을 기준으로 합니다.
    /// 주 수 = `floor(경과일 / 7) + 1` (최소 1).
    pub fn since(last_update: Option<NaiveDateTime>, now: NaiveDateTime) -> Result<Self> {
        let last_update = last_update.unwrap_or_else(|| default_last_update(now));
        let days = (now - last_update).num_days();
        let weeks = (days.div_euclid(7) + 1).max(1);

        match weeks {
            1..=52 => Ok(Self::Weeks(weeks)),
            w if w > 52 => Ok(Self::Years((w + 51) / 52)),
            w => Err(CoreError::InvalidDuration(w)),
        }
    }

    /// 타임아웃 버킷 조회용 주 수
    pub fn weeks(&self) -> i64 {
        match self {
            Self::Weeks(w) => *w,
            Self::Years(y) => y * 52,
        }
    }

    /// 업스트림 API 기간 문자열 (예: "2 W", "2 Y")
    pub fn request_str(&self) -> String {
        match self {
            Self::Weeks(w) => format!("{} W", w),
            Self::Years(y) => format!("{} Y", y),
        }
    }
}

impl std::fmt::Display for FetchSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.request_str())
    }
}

/// 이력이 없을 때의 기본 기준 시각: 2년 전 1월 1일.
fn default_last_update(now: NaiveDateTime) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(now.year() - 2, 1, 1)
        .map(|d| d.and_time(chrono::NaiveTime::MIN))
        .unwrap_or_else(|| now - Duration::days(730))
}

/// 기간 버킷별 응답 대기 예산.
///
/// 주 수보다 크거나 같은 가장 작은 버킷 키를 선택하고, 모든 버킷을
/// 넘으면 기본 예산을 사용합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutTable {
    /// (주 수 상한, 대기 초) - 키 오름차순
    buckets: Vec<(i64, u64)>,
    /// 모든 버킷을 넘는 기간의 대기 초
    fallback_secs: u64,
}

impl Default for TimeoutTable {
    fn default() -> Self {
        Self {
            buckets: vec![(4, 20), (8, 40), (26, 120), (52, 180)],
            fallback_secs: 300,
        }
    }
}

impl TimeoutTable {
    pub fn new(mut buckets: Vec<(i64, u64)>, fallback_secs: u64) -> Self {
        buckets.sort_by_key(|(weeks, _)| *weeks);
        Self {
            buckets,
            fallback_secs,
        }
    }

    /// 기간(주)에 대한 대기 예산
    pub fn budget(&self, weeks: i64) -> std::time::Duration {
        let secs = self
            .buckets
            .iter()
            .find(|(limit, _)| weeks <= *limit)
            .map(|(_, secs)| *secs)
            .unwrap_or(self.fallback_secs);
        std::time::Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 29)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_span_ten_days_is_two_weeks() {
        let last = now() - Duration::days(10);
        let span = FetchSpan::since(Some(last), now()).unwrap();
        assert_eq!(span, FetchSpan::Weeks(2));
        assert_eq!(span.request_str(), "2 W");
    }

    #[test]
    fn test_span_400_days_is_two_years() {
        let last = now() - Duration::days(400);
        let span = FetchSpan::since(Some(last), now()).unwrap();
        // floor(400/7)+1 = 58주 → ceil(58/52) = 2년
        assert_eq!(span, FetchSpan::Years(2));
        assert_eq!(span.request_str(), "2 Y");
    }

    #[test]
    fn test_span_exactly_52_weeks_stays_weeks() {
        let last = now() - Duration::days(51 * 7);
        let span = FetchSpan::since(Some(last), now()).unwrap();
        assert_eq!(span, FetchSpan::Weeks(52));
    }

    #[test]
    fn test_span_without_history_defaults_to_two_years_ago() {
        // 2023-01-01부터 2025-08-29까지: 971일 → 139주 → 3년
        let span = FetchSpan::since(None, now()).unwrap();
        assert_eq!(span, FetchSpan::Years(3));
    }

    #[test]
    fn test_span_future_last_update_clamps_to_one_week() {
        let last = now() + Duration::days(3);
        let span = FetchSpan::since(Some(last), now()).unwrap();
        assert_eq!(span, FetchSpan::Weeks(1));
    }

    #[test]
    fn test_timeout_buckets() {
        let table = TimeoutTable::default();
        assert_eq!(table.budget(2).as_secs(), 20);
        assert_eq!(table.budget(4).as_secs(), 20);
        assert_eq!(table.budget(5).as_secs(), 40);
        assert_eq!(table.budget(8).as_secs(), 40);
        assert_eq!(table.budget(26).as_secs(), 120);
        assert_eq!(table.budget(52).as_secs(), 180);
        assert_eq!(table.budget(60).as_secs(), 300);
    }
}
