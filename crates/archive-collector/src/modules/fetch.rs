//! 히스토리 수집 스테이지.
//!
//! 준비 큐에서 핸들을 받아 마지막 갱신 이후 구간을 계산하고,
//! 업스트림에 캔들을 요청한 뒤 종결 또는 시간 초과까지 기다립니다.
//! 완료된 디스크립터는 기록 큐로 넘깁니다.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use archive_core::{Continuation, CoreError, FetchSpan, InstrumentHandle, MarketDataSource};

use crate::error::Result;
use crate::modules::load_last_update;
use crate::pipeline::PipelineContext;

/// 종결 폴링 간격
const POLL_TICK: Duration = Duration::from_millis(500);

/// 수집 결과.
enum FetchOutcome {
    /// 종결 수신, 캔들 보유
    Complete,
    /// 데이터 없음 에러 수신
    NoData,
    /// 예산 내 종결 실패
    Timeout,
    /// 종료 신호
    Cancelled,
}

/// 수집 메인 루프.
pub async fn run(
    ctx: Arc<PipelineContext>,
    mut ready_rx: mpsc::Receiver<InstrumentHandle>,
    write_tx: mpsc::UnboundedSender<InstrumentHandle>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let handle = tokio::select! {
            received = ready_rx.recv() => match received {
                Some(handle) => handle,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };

        if let Err(e) = fetch_one(&ctx, handle, &write_tx, &shutdown).await {
            tracing::warn!(handle = handle.index(), error = %e, "수집 실패, 건너뜀");
        }
        if shutdown.is_cancelled() {
            break;
        }
    }

    tracing::info!("수집 스테이지 종료");
    Ok(())
}

/// 디스크립터 한 건 수집.
async fn fetch_one(
    ctx: &Arc<PipelineContext>,
    handle: InstrumentHandle,
    write_tx: &mpsc::UnboundedSender<InstrumentHandle>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let Some(instrument) = ctx.arena.get(handle).await else {
        return Ok(());
    };

    let last_update = load_last_update(&ctx.catalog, &instrument).await?;
    let now = Local::now().naive_local();
    let span = match FetchSpan::since(last_update, now) {
        Ok(span) => span,
        Err(CoreError::InvalidDuration(days)) => {
            tracing::error!(
                instrument = %instrument.identity,
                days,
                "요청 구간 계산 불가, 수집 대상에서 제외"
            );
            instrument.mark_error().await;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    ensure_connected(&ctx.source, ctx.config.reconnect_backoff(), shutdown).await;
    if shutdown.is_cancelled() {
        return Ok(());
    }

    instrument.begin_request().await;
    let request_id = ctx.ids.next_fetch();
    ctx.registry
        .register(request_id, Continuation::BarsReceived(handle))
        .await;

    tracing::debug!(
        instrument = %instrument.identity,
        request_id,
        span = %span.request_str(),
        "히스토리 요청"
    );
    if let Err(e) = ctx
        .source
        .request_historical_bars(request_id, &instrument.identity, now, span, &ctx.config.bars)
        .await
    {
        ctx.registry.retire(request_id).await;
        return Err(e.into());
    }

    let budget = ctx.config.timeouts.budget(span.weeks());
    let outcome = await_completion(
        &instrument,
        &ctx.source,
        ctx.config.reconnect_backoff(),
        budget,
        shutdown,
    )
    .await;

    match outcome {
        FetchOutcome::Complete => {
            if instrument.bars_snapshot().await.is_empty() {
                tracing::debug!(instrument = %instrument.identity, "수신 캔들 없음");
            } else if write_tx.send(handle).is_err() {
                tracing::warn!("기록 큐가 닫혀 수집 결과를 버립니다");
            }
        }
        FetchOutcome::NoData => {
            tracing::debug!(instrument = %instrument.identity, "데이터 없음 응답");
            instrument.clear_bars().await;
        }
        FetchOutcome::Timeout => {
            tracing::warn!(
                instrument = %instrument.identity,
                request_id,
                budget_secs = budget.as_secs(),
                "히스토리 응답 시간 초과"
            );
            ctx.registry.retire(request_id).await;
            instrument.clear_bars().await;
        }
        FetchOutcome::Cancelled => {
            ctx.registry.retire(request_id).await;
        }
    }
    Ok(())
}

/// 종결 마커 또는 예산 소진까지 대기.
///
/// 대기 중에도 매 틱 연결 상태를 확인하고, 끊겨 있으면 즉시 재접속
/// 루프에 진입합니다. 예산 시계는 재접속 중에도 계속 흐릅니다.
async fn await_completion(
    instrument: &Arc<archive_core::Instrument>,
    source: &Arc<dyn MarketDataSource>,
    reconnect_backoff: Duration,
    budget: Duration,
    shutdown: &CancellationToken,
) -> FetchOutcome {
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        // 조건 확인 전에 통지 대기를 등록해 깨움 유실을 막는다
        let notified = instrument.notified();
        if instrument.history_complete().await {
            return FetchOutcome::Complete;
        }
        if instrument.has_error().await {
            return FetchOutcome::NoData;
        }
        if tokio::time::Instant::now() >= deadline {
            return FetchOutcome::Timeout;
        }
        if !source.is_connected() {
            ensure_connected(source, reconnect_backoff, shutdown).await;
            if shutdown.is_cancelled() {
                return FetchOutcome::Cancelled;
            }
            continue;
        }

        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(POLL_TICK) => {}
            _ = shutdown.cancelled() => return FetchOutcome::Cancelled,
        }
    }
}

/// 업스트림 연결 보장. 끊겨 있으면 재접속을 반복 시도합니다.
async fn ensure_connected(
    source: &Arc<dyn MarketDataSource>,
    backoff: Duration,
    shutdown: &CancellationToken,
) {
    while !source.is_connected() && !shutdown.is_cancelled() {
        tracing::warn!("업스트림 연결 끊김, 재접속 시도");
        if let Err(e) = source.connect().await {
            tracing::warn!(error = %e, "재접속 실패");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_core::{Identity, InstrumentArena, RequestRegistry};

    use crate::sim::SimSource;

    async fn test_instrument() -> (
        Arc<archive_core::Instrument>,
        Arc<dyn MarketDataSource>,
        Arc<SimSource>,
    ) {
        let arena = Arc::new(InstrumentArena::new());
        let (_, instrument) = arena.insert(Identity::stock("SPY")).await;
        let registry = Arc::new(RequestRegistry::new(arena));
        let source = Arc::new(SimSource::new(registry));
        (
            instrument,
            Arc::clone(&source) as Arc<dyn MarketDataSource>,
            source,
        )
    }

    #[tokio::test]
    async fn test_no_data_error_releases_wait_before_budget() {
        let (instrument, source, _sim) = test_instrument().await;
        let marker_target = Arc::clone(&instrument);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            marker_target.mark_error().await;
        });

        let started = tokio::time::Instant::now();
        let outcome = await_completion(
            &instrument,
            &source,
            Duration::from_millis(100),
            Duration::from_secs(60),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, FetchOutcome::NoData));
        // 에러 마커가 60초 예산을 기다리지 않고 대기를 해제한다
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_disconnect_during_wait_triggers_reconnect() {
        let (instrument, source, sim) = test_instrument().await;
        sim.set_connected(false);

        let marker_target = Arc::clone(&instrument);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            marker_target.mark_history_complete().await;
        });

        let outcome = await_completion(
            &instrument,
            &source,
            Duration::from_millis(50),
            Duration::from_secs(60),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, FetchOutcome::Complete));
        // 대기 중 감지된 단절이 재접속으로 복구되어 있어야 한다
        assert!(source.is_connected());
    }
}
