//! 환경변수 기반 설정 모듈.

use std::time::Duration;

use chrono::{NaiveTime, Weekday};

use archive_core::{BarRequestOptions, TimeoutTable};

use crate::error::{ArchiverError, Result};

/// 기본 기초자산 유니버스. `UNDERLYINGS`로 재정의 가능.
pub const DEFAULT_UNDERLYINGS: &[&str] = &[
    "USO", "SPY", "QQQ", "IWM", "GLD", "TLT", "IEF", "LQD", "AAPL", "MSFT", "AMZN", "GOOGL",
    "META", "NVDA", "TSLA", "BRK.B", "JPM", "XOM",
];

/// Archiver 전체 설정
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    /// 데이터베이스 URL (드라이런에서는 불필요)
    pub database_url: Option<String>,
    /// 업스트림 접속 설정
    pub upstream: UpstreamConfig,
    /// 기초자산 심볼 유니버스
    pub underlyings: Vec<String>,
    /// 히스토리 요청 옵션 (캔들 길이 / 세션 필터)
    pub bars: BarRequestOptions,
    /// 스케줄링 설정
    pub schedule: ScheduleConfig,
    /// Ready 큐 용량 (백프레셔 지점)
    pub ready_capacity: usize,
    /// INSERT 문당 최대 행 수
    pub insert_max_rows: usize,
    /// 옵션 풀 셔플 여부
    pub randomize_options: bool,
    /// 체인 응답 대기 시간 (초)
    pub chain_wait_secs: u64,
    /// 재접속 백오프 (초)
    pub reconnect_backoff_secs: u64,
    /// 기간 버킷별 응답 대기 예산
    pub timeouts: TimeoutTable,
}

/// 업스트림 접속 설정
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
    /// 클라이언트 ID
    pub client_id: i32,
}

/// 스케줄링 설정
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// 주식 전체 갱신 시각 (커서 리셋)
    pub stock_refresh_time: NaiveTime,
    /// 만기 옵션 재스캔 시각
    pub expired_refresh_time: NaiveTime,
    /// 타이머를 건너뛸 요일 (비거래일)
    pub excluded_weekdays: Vec<Weekday>,
    /// 만기 옵션 탐색 유예 기간 (일)
    pub expired_grace_days: i64,
}

impl ArchiverConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let underlyings = match std::env::var("UNDERLYINGS") {
            Ok(s) => s
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => DEFAULT_UNDERLYINGS.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            upstream: UpstreamConfig {
                host: std::env::var("UPSTREAM_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env_var_parse("UPSTREAM_PORT", 7496),
                client_id: env_var_parse("UPSTREAM_CLIENT_ID", 1),
            },
            underlyings,
            bars: BarRequestOptions {
                bar_size: std::env::var("BAR_SIZE").unwrap_or_else(|_| "15 mins".to_string()),
                what_to_show: std::env::var("WHAT_TO_SHOW")
                    .unwrap_or_else(|_| "Bid_Ask".to_string()),
                regular_hours_only: env_var_bool("USE_RTH", true),
            },
            schedule: ScheduleConfig {
                stock_refresh_time: env_var_time("STOCK_REFRESH_TIME", "18:00")?,
                expired_refresh_time: env_var_time("EXPIRED_REFRESH_TIME", "22:30")?,
                excluded_weekdays: env_var_weekdays("EXCLUDED_WEEKDAYS", "sat,sun")?,
                expired_grace_days: env_var_parse("EXPIRED_GRACE_DAYS", 2),
            },
            ready_capacity: env_var_parse("READY_QUEUE_CAPACITY", 10),
            insert_max_rows: env_var_parse("INSERT_MAX_ROWS", 995),
            randomize_options: env_var_bool("RANDOMIZE_OPTIONS", true),
            chain_wait_secs: env_var_parse("CHAIN_WAIT_SECS", 5),
            reconnect_backoff_secs: env_var_parse("RECONNECT_BACKOFF_SECS", 10),
            timeouts: TimeoutTable::default(),
        })
    }

    /// 체인 응답 대기 시간
    pub fn chain_wait(&self) -> Duration {
        Duration::from_secs(self.chain_wait_secs)
    }

    /// 재접속 백오프
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    /// 데이터베이스 URL (필수 컨텍스트에서 사용)
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            ArchiverError::Config("DATABASE_URL 환경변수가 설정되지 않았습니다".to_string())
        })
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// 환경변수에서 bool 값 파싱
fn env_var_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

/// 환경변수에서 "HH:MM" 시각 파싱
fn env_var_time(key: &str, default: &str) -> Result<NaiveTime> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .map_err(|e| ArchiverError::Config(format!("{key} 파싱 실패 ({raw}): {e}")))
}

/// 환경변수에서 쉼표로 구분된 요일 목록 파싱
fn env_var_weekdays(key: &str, default: &str) -> Result<Vec<Weekday>> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Weekday>()
                .map_err(|_| ArchiverError::Config(format!("{key}: 알 수 없는 요일 '{s}'")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekday_parsing() {
        let days = env_var_weekdays("ARCHIVER_TEST_NO_SUCH_KEY", "sat,sun").unwrap();
        assert_eq!(days, vec![Weekday::Sat, Weekday::Sun]);
    }

    #[test]
    fn test_time_parsing() {
        let t = env_var_time("ARCHIVER_TEST_NO_SUCH_KEY", "18:00").unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(18, 0, 0).unwrap());
    }
}
