//! 일일 벽시계 타이머.
//!
//! 스케줄러 루프의 폴링 주기와 무관하게, 설정된 시각을 지날 때마다
//! 정확히 한 번 발화하고 다음 날로 재무장합니다. 비거래 요일에는
//! 평가가 통째로 건너뛰어집니다.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};

/// 하루 한 번 발화하는 타이머.
#[derive(Debug, Clone)]
pub struct DailyTimer {
    next_due: NaiveDateTime,
}

impl DailyTimer {
    /// 오늘의 지정 시각을 첫 발화 시점으로 하는 타이머 생성.
    ///
    /// 생성 시점이 이미 지정 시각을 지났다면 첫 평가에서 바로 발화합니다.
    pub fn new(time_of_day: NaiveTime, now: NaiveDateTime) -> Self {
        Self {
            next_due: now.date().and_time(time_of_day),
        }
    }

    /// 다음 발화 예정 시각
    pub fn next_due(&self) -> NaiveDateTime {
        self.next_due
    }

    /// 타이머 평가. 발화 시 true를 반환하고 하루 뒤로 재무장.
    pub fn poll(&mut self, now: NaiveDateTime, excluded_weekdays: &[Weekday]) -> bool {
        if excluded_weekdays.contains(&now.weekday()) {
            return false;
        }
        if now >= self.next_due {
            // 여러 날을 건너뛴 뒤에도 크로싱당 한 번만 발화하도록
            // 미래의 가장 이른 시각까지 재무장한다
            while self.next_due <= now {
                self.next_due += Duration::days(1);
            }
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 9, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_fires_once_per_crossing() {
        // 2025-09-01은 월요일
        let mut timer = DailyTimer::new(NaiveTime::from_hms_opt(18, 0, 0).unwrap(), at(1, 9, 0));

        assert!(!timer.poll(at(1, 17, 59), &[]));
        assert!(timer.poll(at(1, 18, 0), &[]));
        // 같은 크로싱에서 두 번 발화하지 않는다
        assert!(!timer.poll(at(1, 23, 0), &[]));
        // 다음 날 다시 발화
        assert!(timer.poll(at(2, 18, 0), &[]));
    }

    #[test]
    fn test_missed_crossings_fire_once() {
        let mut timer = DailyTimer::new(NaiveTime::from_hms_opt(18, 0, 0).unwrap(), at(1, 9, 0));

        // 사흘 뒤 첫 평가: 밀린 크로싱들을 한 번의 발화로 흡수한다
        assert!(timer.poll(at(4, 19, 0), &[]));
        assert!(!timer.poll(at(4, 20, 0), &[]));
        assert_eq!(timer.next_due(), at(5, 18, 0));
        assert!(timer.poll(at(5, 18, 0), &[]));
    }

    #[test]
    fn test_excluded_weekday_skips_evaluation() {
        // 2025-09-06은 토요일
        let mut timer = DailyTimer::new(NaiveTime::from_hms_opt(18, 0, 0).unwrap(), at(6, 9, 0));
        let weekend = [Weekday::Sat, Weekday::Sun];

        assert!(!timer.poll(at(6, 19, 0), &weekend));
        assert!(!timer.poll(at(7, 19, 0), &weekend));
        // 월요일에는 발화한다
        assert!(timer.poll(at(8, 18, 0), &weekend));
    }
}
