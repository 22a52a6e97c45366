//! 수집 스케줄러 스테이지.
//!
//! 준비 큐에 빈 자리가 있는 동안 만기 풀 → 주식 커서 → 옵션 풀
//! 순으로 대상을 뽑아 넣습니다. 일일 타이머가 주식 커서 재설정과
//! 만기 재스캔을 트리거하고, 수행 시각은 체크포인트로 남깁니다.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use archive_core::{InstrumentHandle, SecurityKind, EXPIRY_CUTOFF_MINUTES};

use crate::error::Result;
use crate::modules::{discovery, load_last_update};
use crate::pipeline::PipelineContext;
use crate::stats::SweepStats;
use crate::timer::DailyTimer;

/// 유휴 시 폴링 간격
const IDLE_TICK: Duration = Duration::from_millis(100);

/// 옵션 재수집 최소 경과 일수
const MIN_REFRESH_DAYS: i64 = 30;

/// 주식 커서 재설정 체크포인트 이름
pub const STOCK_REFRESH_WORKFLOW: &str = "stock_refresh";
/// 만기 재스캔 체크포인트 이름
pub const EXPIRED_REFRESH_WORKFLOW: &str = "expired_refresh";

/// 활성 옵션 평가 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OptionAction {
    /// 준비 큐로 보냄
    Enqueue,
    /// 꼬리로 회전
    Rotate,
    /// 풀에서 영구 제거
    Drop,
}

/// 활성 옵션 한 건의 다음 행동을 결정.
///
/// 컷오프(만기일 + 21시간 45분) 이후 데이터까지 이미 보유했으면
/// 더 갱신할 것이 없으므로 제거합니다. 만기가 지났지만 컷오프 데이터가
/// 없는 계약은 만기 재스캔이 가져가도록 회전만 합니다.
pub(crate) fn assess_option(
    expiry: NaiveDate,
    last_update: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> OptionAction {
    let cutoff = expiry.and_time(chrono::NaiveTime::MIN)
        + chrono::Duration::minutes(EXPIRY_CUTOFF_MINUTES);

    if let Some(last_update) = last_update {
        if last_update >= cutoff {
            return OptionAction::Drop;
        }
    }
    if expiry < now.date() {
        return OptionAction::Rotate;
    }
    let Some(last_update) = last_update else {
        return OptionAction::Enqueue;
    };

    // 만기까지 남은 시간의 절반, 최소 30일 간격으로 재수집
    let time_to_expiry = cutoff - now;
    let threshold = std::cmp::max(time_to_expiry / 2, chrono::Duration::days(MIN_REFRESH_DAYS));
    if now - last_update >= threshold {
        OptionAction::Enqueue
    } else {
        OptionAction::Rotate
    }
}

/// 만기 계약이 최종 백필을 필요로 하는지 판정.
pub(crate) fn expired_needs_backfill(
    expiry: NaiveDate,
    last_update: Option<NaiveDateTime>,
) -> bool {
    let cutoff = expiry.and_time(chrono::NaiveTime::MIN)
        + chrono::Duration::minutes(EXPIRY_CUTOFF_MINUTES);
    match last_update {
        Some(last_update) => last_update < cutoff,
        None => true,
    }
}

/// 스케줄러 메인 루프.
pub async fn run(
    ctx: Arc<PipelineContext>,
    ready_tx: mpsc::Sender<InstrumentHandle>,
    shutdown: CancellationToken,
) -> Result<()> {
    let now = Local::now().naive_local();
    let mut stock_timer = DailyTimer::new(ctx.config.schedule.stock_refresh_time, now);
    let mut expired_timer = DailyTimer::new(ctx.config.schedule.expired_refresh_time, now);

    // 첫 주식 패스는 첫 타이머 이후에만 시작
    let mut stock_cursor = ctx.pools.stocks.lock().await.len();
    let mut stock_pass_active = false;
    // 발굴 단계의 시작 재스캔이 채워 둔 만기 풀도 배수 추적 대상
    let mut expired_draining = ctx.pools.peek_expired().await.is_some();

    for workflow in [STOCK_REFRESH_WORKFLOW, EXPIRED_REFRESH_WORKFLOW] {
        match ctx.catalog.load_checkpoint(workflow).await {
            Ok(Some(at)) => tracing::info!(workflow, last_run = %at, "체크포인트 로드"),
            Ok(None) => tracing::info!(workflow, "이전 수행 기록 없음"),
            Err(e) => tracing::warn!(workflow, error = %e, "체크포인트 로드 실패"),
        }
    }

    tracing::info!(
        stock_refresh = %stock_timer.next_due(),
        expired_refresh = %expired_timer.next_due(),
        "스케줄러 시작"
    );

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let now = Local::now().naive_local();
        let excluded = &ctx.config.schedule.excluded_weekdays;
        if stock_timer.poll(now, excluded) {
            tracing::info!("일일 주식 갱신 커서 재설정");
            stock_cursor = 0;
            stock_pass_active = true;
        }
        if expired_timer.poll(now, excluded) {
            let mut stats = SweepStats::new();
            if let Err(e) = discovery::sweep_expired(&ctx, &mut stats).await {
                tracing::warn!(error = %e, "만기 재스캔 실패, 다음 주기에 재시도");
            } else {
                stats.log_summary("expired_sweep");
                expired_draining = true;
            }
        }

        // 단일 송신자이므로 빈 자리 확인 후의 send는 블로킹하지 않음
        while ready_tx.capacity() > 0 {
            match fill_one(&ctx, &ready_tx, &mut stock_cursor).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "스케줄 후보 평가 실패");
                    break;
                }
            }
        }

        // 체크포인트는 트리거 시점이 아니라 소진 시점에 기록한다
        if stock_pass_active && stock_cursor >= ctx.pools.stocks.lock().await.len() {
            stock_pass_active = false;
            save_checkpoint(&ctx, STOCK_REFRESH_WORKFLOW, Local::now().naive_local()).await;
            tracing::info!("주식 갱신 패스 완료");
        }
        if expired_draining && ctx.pools.peek_expired().await.is_none() {
            expired_draining = false;
            save_checkpoint(&ctx, EXPIRED_REFRESH_WORKFLOW, Local::now().naive_local()).await;
            tracing::info!("만기 풀 소진 완료");
        }

        tokio::select! {
            _ = tokio::time::sleep(IDLE_TICK) => {}
            _ = shutdown.cancelled() => break,
        }
    }

    tracing::info!("스케줄러 종료");
    Ok(())
}

async fn save_checkpoint(ctx: &PipelineContext, workflow: &str, at: NaiveDateTime) {
    if let Err(e) = ctx.catalog.save_checkpoint(workflow, at).await {
        tracing::warn!(workflow, error = %e, "체크포인트 저장 실패");
    }
}

/// 후보 한 건을 준비 큐에 넣기. 넣었으면 true.
///
/// 우선순위: 만기 풀 → 주식 커서 → 활성 옵션 풀. 옵션이 회전만 한
/// 경우에도 false를 돌려 타이머 평가가 굶지 않게 합니다.
async fn fill_one(
    ctx: &Arc<PipelineContext>,
    ready_tx: &mpsc::Sender<InstrumentHandle>,
    stock_cursor: &mut usize,
) -> Result<bool> {
    // 1. 만기 풀: 최종 백필이 필요 없는 계약은 제거하고 다음으로
    while let Some(handle) = ctx.pools.peek_expired().await {
        let Some(instrument) = ctx.arena.get(handle).await else {
            ctx.pools.pop_expired().await;
            continue;
        };
        let expiry = instrument.identity.expiry()?;
        let last_update = load_last_update(&ctx.catalog, &instrument).await?;
        ctx.pools.pop_expired().await;
        if expired_needs_backfill(expiry, last_update) {
            send_ready(ready_tx, handle).await;
            return Ok(true);
        }
        tracing::debug!(instrument = %instrument.identity, "만기 백필 불필요, 건너뜀");
    }

    // 2. 주식 커서
    {
        let stocks = ctx.pools.stocks.lock().await;
        if *stock_cursor < stocks.len() {
            let handle = stocks[*stock_cursor];
            *stock_cursor += 1;
            drop(stocks);
            send_ready(ready_tx, handle).await;
            return Ok(true);
        }
    }

    // 3. 활성 옵션 풀
    if let Some(handle) = ctx.pools.peek_option().await {
        let Some(instrument) = ctx.arena.get(handle).await else {
            ctx.pools.pop_option().await;
            return Ok(false);
        };
        debug_assert_eq!(instrument.identity.kind, SecurityKind::Option);
        let expiry = instrument.identity.expiry()?;
        let last_update = load_last_update(&ctx.catalog, &instrument).await?;
        let now = Local::now().naive_local();
        match assess_option(expiry, last_update, now) {
            OptionAction::Enqueue => {
                ctx.pools.pop_option().await;
                send_ready(ready_tx, handle).await;
                return Ok(true);
            }
            OptionAction::Rotate => {
                ctx.pools.rotate_option().await;
            }
            OptionAction::Drop => {
                ctx.pools.pop_option().await;
                tracing::debug!(instrument = %instrument.identity, "수집 완료 옵션 제거");
            }
        }
    }
    Ok(false)
}

async fn send_ready(ready_tx: &mpsc::Sender<InstrumentHandle>, handle: InstrumentHandle) {
    // fill_one은 capacity 확인 후에만 호출되므로 즉시 완료된다
    if ready_tx.send(handle).await.is_err() {
        tracing::debug!(handle = handle.index(), "준비 큐가 닫혀 후보를 버립니다");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_option_without_history_is_enqueued() {
        let action = assess_option(d(2025, 12, 19), None, dt(2025, 8, 29, 10, 0));
        assert_eq!(action, OptionAction::Enqueue);
    }

    #[test]
    fn test_option_updated_past_cutoff_is_dropped() {
        // 컷오프 정각 데이터 보유 = 수집 완료
        let action = assess_option(
            d(2025, 8, 15),
            Some(dt(2025, 8, 15, 21, 45)),
            dt(2025, 8, 29, 10, 0),
        );
        assert_eq!(action, OptionAction::Drop);
    }

    #[test]
    fn test_expired_option_without_cutoff_data_rotates() {
        let action = assess_option(
            d(2025, 8, 15),
            Some(dt(2025, 8, 10, 15, 30)),
            dt(2025, 8, 29, 10, 0),
        );
        assert_eq!(action, OptionAction::Rotate);
    }

    #[test]
    fn test_fresh_option_rotates_under_threshold() {
        // 만기까지 약 112일, 임계값 = 56일 > 경과 1일
        let action = assess_option(
            d(2025, 12, 19),
            Some(dt(2025, 8, 28, 15, 30)),
            dt(2025, 8, 29, 10, 0),
        );
        assert_eq!(action, OptionAction::Rotate);
    }

    #[test]
    fn test_stale_option_is_enqueued_past_half_tte() {
        // 만기까지 20일 → 임계값 max(10일, 30일) = 30일, 경과 40일
        let action = assess_option(
            d(2025, 9, 18),
            Some(dt(2025, 7, 20, 15, 30)),
            dt(2025, 8, 29, 10, 0),
        );
        assert_eq!(action, OptionAction::Enqueue);
    }

    #[test]
    fn test_thirty_day_floor_applies_near_expiry() {
        // 만기까지 4일 → 임계값 30일, 경과 20일이면 아직 회전
        let action = assess_option(
            d(2025, 9, 2),
            Some(dt(2025, 8, 9, 15, 30)),
            dt(2025, 8, 29, 10, 0),
        );
        assert_eq!(action, OptionAction::Rotate);
    }

    #[test]
    fn test_expired_backfill_judgement() {
        assert!(expired_needs_backfill(d(2025, 8, 15), None));
        assert!(expired_needs_backfill(
            d(2025, 8, 15),
            Some(dt(2025, 8, 14, 15, 30))
        ));
        assert!(!expired_needs_backfill(
            d(2025, 8, 15),
            Some(dt(2025, 8, 15, 21, 45))
        ));
    }
}
