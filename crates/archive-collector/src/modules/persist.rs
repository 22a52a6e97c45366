//! 영속화 스테이지.
//!
//! 기록 큐에서 핸들을 받아 누적 캔들을 카탈로그에 기록합니다.
//! 기존 타임스탬프는 제외하고, 배치 크기 상한으로 나눠 넣습니다.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use archive_core::InstrumentHandle;
use archive_data::BarRow;

use crate::error::Result;
use crate::pipeline::PipelineContext;

/// 영속화 메인 루프. 종료 신호 후에도 큐에 남은 작업은 마저 비웁니다.
pub async fn run(
    ctx: Arc<PipelineContext>,
    mut write_rx: mpsc::UnboundedReceiver<InstrumentHandle>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let handle = tokio::select! {
            received = write_rx.recv() => match received {
                Some(handle) => handle,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };

        if let Err(e) = persist_one(&ctx, handle).await {
            tracing::warn!(handle = handle.index(), error = %e, "영속화 실패");
        }
    }

    // 종료 신호로 빠져나온 경우 잔여 작업 드레인
    while let Ok(handle) = write_rx.try_recv() {
        if let Err(e) = persist_one(&ctx, handle).await {
            tracing::warn!(handle = handle.index(), error = %e, "잔여 영속화 실패");
        }
    }

    tracing::info!("영속화 스테이지 종료");
    Ok(())
}

/// 디스크립터 한 건의 캔들을 기록.
async fn persist_one(ctx: &Arc<PipelineContext>, handle: InstrumentHandle) -> Result<()> {
    let Some(instrument) = ctx.arena.get(handle).await else {
        return Ok(());
    };
    let bars = instrument.bars_snapshot().await;
    if bars.is_empty() {
        return Ok(());
    }

    ctx.catalog.ensure_table(&instrument.identity).await?;
    let existing = ctx.catalog.existing_timestamps(&instrument.identity).await?;

    let rows: Vec<BarRow> = bars
        .iter()
        .filter(|(stamp, _)| !existing.contains(stamp))
        .map(|(stamp, ohlc)| BarRow {
            stamp: *stamp,
            ohlc: *ohlc,
        })
        .collect();

    let mut inserted = 0u64;
    for chunk in rows.chunks(ctx.config.insert_max_rows.max(1)) {
        inserted += ctx.catalog.write_batch(&instrument.identity, chunk).await?;
    }

    tracing::info!(
        instrument = %instrument.identity,
        received = bars.len(),
        inserted,
        duplicates = bars.len() - rows.len(),
        "캔들 기록 완료"
    );

    // 다음 스케줄 평가가 새 마지막 갱신 시각을 읽도록 캐시 무효화
    instrument.clear_bars().await;
    instrument.invalidate_last_update().await;
    Ok(())
}
