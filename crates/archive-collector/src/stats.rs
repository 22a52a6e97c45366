//! 수집 통계 구조체.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 유니버스 구축 / 만기 재스캔 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepStats {
    /// 구축된 주식 수
    pub stocks: usize,
    /// 구축된 옵션 계약 수
    pub options: usize,
    /// 만기 풀로 이동한 계약 수
    pub expired: usize,
    /// 에러 횟수 (id 미해결 등)
    pub errors: usize,
    /// 건너뛴 횟수 (체인 없음 등)
    pub skipped: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl SweepStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            stocks = self.stocks,
            options = self.options,
            expired = self.expired,
            errors = self.errors,
            skipped = self.skipped,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "작업 완료"
        );
    }
}
