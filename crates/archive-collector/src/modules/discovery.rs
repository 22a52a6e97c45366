//! 계약 발굴 스테이지.
//!
//! 기초자산 목록을 계약 ID로 해소하고, 옵션 체인을 받아
//! 만기 × 행사가 × 콜/풋 조합으로 전개한 뒤 풀에 적재합니다.
//! 만기 재스캔은 카탈로그의 옵션 테이블 목록을 훑어 최근 만기일
//! 계약을 만기 풀로 넘깁니다.

use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use rand::seq::SliceRandom;

use archive_core::{Continuation, Identity, InstrumentHandle, OptionRight, SecurityKind};

use crate::error::Result;
use crate::modules::scheduler::EXPIRED_REFRESH_WORKFLOW;
use crate::pipeline::PipelineContext;
use crate::stats::SweepStats;

/// 계약 ID 응답 대기 한도
const ID_WAIT: Duration = Duration::from_secs(20);

/// 전개 진행 로그 간격 (계약 수)
const PROGRESS_INTERVAL: usize = 1000;

/// 전체 발굴 수행: 주식 해소 → 체인 수신 → 옵션 전개 → 만기 재스캔.
pub async fn run(ctx: &PipelineContext) -> Result<()> {
    let mut stats = SweepStats::new();
    let started = std::time::Instant::now();

    resolve_stocks(ctx, &mut stats).await?;
    resolve_chains(ctx).await?;
    expand_options(ctx, &mut stats).await?;

    if ctx.config.randomize_options {
        shuffle_options(ctx).await;
    }

    // 시작 재스캔은 마지막 수행 체크포인트 기준으로 기한이 지났을 때만
    let checkpoint = match ctx.catalog.load_checkpoint(EXPIRED_REFRESH_WORKFLOW).await {
        Ok(checkpoint) => checkpoint,
        Err(e) => {
            tracing::warn!(error = %e, "체크포인트 로드 실패, 재스캔을 수행합니다");
            None
        }
    };
    let now = Local::now().naive_local();
    if sweep_due(checkpoint, now, ctx.config.schedule.expired_refresh_time) {
        sweep_expired(ctx, &mut stats).await?;
    } else {
        tracing::info!(last_run = ?checkpoint, "만기 재스캔 기록이 최신, 시작 재스캔 생략");
    }

    stats.elapsed = started.elapsed();
    stats.log_summary("discovery");
    Ok(())
}

/// 기초자산을 계약 ID로 해소해 주식 풀에 적재.
async fn resolve_stocks(ctx: &PipelineContext, stats: &mut SweepStats) -> Result<()> {
    for symbol in &ctx.config.underlyings {
        let identity = Identity::stock(symbol.clone());
        let (handle, instrument) = ctx.arena.insert(identity).await;

        let request_id = ctx.ids.next_discovery();
        ctx.registry
            .register(request_id, Continuation::InstrumentId(handle))
            .await;
        ctx.source
            .request_instrument_id(request_id, &instrument.identity)
            .await?;

        // 응답 도착 또는 에러 마커까지 대기
        let deadline = tokio::time::Instant::now() + ID_WAIT;
        loop {
            let notified = instrument.notified();
            if instrument.con_id().await.is_some() || instrument.has_error().await {
                break;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        if instrument.has_error().await {
            tracing::warn!(symbol = %symbol, "계약 정의를 찾지 못해 제외합니다");
            stats.skipped += 1;
            continue;
        }
        let Some(con_id) = instrument.con_id().await else {
            tracing::warn!(symbol = %symbol, "계약 ID 응답 시간 초과");
            ctx.registry.retire(request_id).await;
            stats.errors += 1;
            continue;
        };

        tracing::debug!(symbol = %symbol, con_id, "주식 계약 해소 완료");
        ctx.catalog.ensure_table(&instrument.identity).await?;
        ctx.pools.push_stock(handle).await;
        stats.stocks += 1;
    }
    Ok(())
}

/// 각 주식의 옵션 체인을 요청하고 고정 대기 후 수신을 종결.
async fn resolve_chains(ctx: &PipelineContext) -> Result<()> {
    let stocks: Vec<InstrumentHandle> = ctx.pools.stocks.lock().await.clone();

    for handle in stocks {
        let Some(instrument) = ctx.arena.get(handle).await else {
            continue;
        };
        let Some(con_id) = instrument.con_id().await else {
            continue;
        };

        let request_id = ctx.ids.next_discovery();
        ctx.registry
            .register(request_id, Continuation::ChainResolved(handle))
            .await;
        ctx.source
            .request_option_chain(request_id, &instrument.identity.symbol, con_id)
            .await?;

        // 체인 행이 도착하면 즉시, 늦어도 대기 한도에서 수신을 종결
        let deadline = tokio::time::Instant::now() + ctx.config.chain_wait();
        loop {
            let notified = instrument.notified();
            if instrument.has_chain().await {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        ctx.registry.retire(request_id).await;

        if !instrument.has_chain().await {
            tracing::warn!(symbol = %instrument.identity.symbol, "옵션 체인 응답 없음");
        }
    }
    Ok(())
}

/// 체인을 만기 × 행사가 × 콜/풋으로 전개해 옵션 풀에 적재.
async fn expand_options(ctx: &PipelineContext, stats: &mut SweepStats) -> Result<()> {
    let today = Local::now().date_naive();
    let stocks: Vec<InstrumentHandle> = ctx.pools.stocks.lock().await.clone();

    for handle in stocks {
        let Some(stock) = ctx.arena.get(handle).await else {
            continue;
        };
        let (expiries, strikes) = stock.chain_snapshot().await;

        for expiry in &expiries {
            if *expiry < today {
                continue;
            }
            let mut ensured = false;
            for strike in &strikes {
                for right in [OptionRight::Call, OptionRight::Put] {
                    let identity =
                        Identity::option(stock.identity.symbol.clone(), *strike, right, *expiry);
                    if !ensured {
                        // 만기 테이블은 체결 단위가 아니라 만기 단위로 공유
                        ctx.catalog.ensure_table(&identity).await?;
                        ensured = true;
                    }
                    let (opt_handle, _) = ctx.arena.insert(identity).await;
                    stock.register_child(opt_handle).await;
                    ctx.pools.push_option(opt_handle).await;
                    stats.options += 1;
                    if stats.options % PROGRESS_INTERVAL == 0 {
                        tracing::info!(expanded = stats.options, "옵션 계약 전개 진행 중");
                    }
                }
            }
        }
    }
    Ok(())
}

/// 평가 순서 편중을 줄이기 위한 옵션 풀 셔플.
async fn shuffle_options(ctx: &PipelineContext) {
    let mut options = ctx.pools.options.lock().await;
    let mut drained: Vec<InstrumentHandle> = options.drain(..).collect();
    drained.shuffle(&mut rand::thread_rng());
    options.extend(drained);
}

/// 시작 시점의 만기 재스캔 수행 여부.
///
/// 마지막 수행이 가장 최근의 재스캔 시각 크로싱보다 앞이면 기한이
/// 지난 것으로 판단합니다. 수행 기록이 없으면 항상 기한 경과입니다.
pub(crate) fn sweep_due(
    checkpoint: Option<NaiveDateTime>,
    now: NaiveDateTime,
    refresh_time: NaiveTime,
) -> bool {
    let Some(checkpoint) = checkpoint else {
        return true;
    };
    let boundary = if now.time() >= refresh_time {
        now.date().and_time(refresh_time)
    } else {
        (now.date() - chrono::Duration::days(1)).and_time(refresh_time)
    };
    checkpoint < boundary
}

/// 만기 재스캔 대상 날짜 목록. 당일 기준 시각을 지났으면 당일부터,
/// 아니면 전일부터 유예 기간만큼 거슬러 올라갑니다.
pub(crate) fn sweep_dates(
    today: NaiveDate,
    after_refresh_time: bool,
    grace_days: i64,
) -> Vec<NaiveDate> {
    let start = if after_refresh_time { 0 } else { 1 };
    (start..=grace_days)
        .map(|d| today - chrono::Duration::days(d))
        .collect()
}

/// 최근 만기일의 옵션 계약을 활성 풀에서 만기 풀로 이동.
///
/// 카탈로그에 테이블은 있으나 풀에 계약이 없으면 (재기동 직후 등)
/// 모체 주식의 체인으로부터 다시 합성합니다.
pub async fn sweep_expired(ctx: &PipelineContext, stats: &mut SweepStats) -> Result<()> {
    let now = Local::now().naive_local();
    let after = now.time() >= ctx.config.schedule.expired_refresh_time;
    let dates = sweep_dates(now.date(), after, ctx.config.schedule.expired_grace_days);
    if dates.is_empty() {
        return Ok(());
    }

    let tables = ctx.catalog.list_expired_option_tables(&dates).await?;
    for table in tables {
        let moved = move_pool_matches(ctx, &table.symbol, table.expiry).await;
        if moved > 0 {
            stats.expired += moved;
            continue;
        }

        let synthesized = synthesize_expired(ctx, &table.symbol, table.expiry).await;
        if synthesized == 0 {
            tracing::warn!(
                symbol = %table.symbol,
                expiry = %table.expiry,
                "만기 테이블에 대응하는 계약을 찾지 못했습니다"
            );
        }
        stats.expired += synthesized;
    }
    Ok(())
}

/// 활성 옵션 풀에서 (심볼, 만기) 일치 핸들을 찾아 만기 풀로 이동.
async fn move_pool_matches(
    ctx: &PipelineContext,
    table_symbol: &str,
    expiry: NaiveDate,
) -> usize {
    let candidates: Vec<InstrumentHandle> = ctx.pools.options.lock().await.iter().copied().collect();

    let mut matched = Vec::new();
    for handle in candidates {
        let Some(instrument) = ctx.arena.get(handle).await else {
            continue;
        };
        let same_symbol = instrument.identity.table_symbol() == table_symbol;
        let same_expiry = instrument.identity.expiry().map(|e| e == expiry).unwrap_or(false);
        if same_symbol && same_expiry {
            matched.push(handle);
        }
    }

    let removed = ctx.pools.remove_options(&matched).await;
    for handle in &matched {
        ctx.pools.push_expired(*handle).await;
    }
    tracing::debug!(symbol = table_symbol, expiry = %expiry, moved = removed, "만기 계약 이동");
    removed
}

/// 모체 주식의 체인으로 만기 계약을 재합성해 만기 풀에 적재.
async fn synthesize_expired(
    ctx: &PipelineContext,
    table_symbol: &str,
    expiry: NaiveDate,
) -> usize {
    let stocks: Vec<InstrumentHandle> = ctx.pools.stocks.lock().await.clone();

    for handle in stocks {
        let Some(stock) = ctx.arena.get(handle).await else {
            continue;
        };
        if stock.identity.kind != SecurityKind::Stock
            || stock.identity.table_symbol() != table_symbol
        {
            continue;
        }

        let (_, strikes) = stock.chain_snapshot().await;
        let mut count = 0;
        for strike in &strikes {
            for right in [OptionRight::Call, OptionRight::Put] {
                let identity =
                    Identity::option(stock.identity.symbol.clone(), *strike, right, expiry);
                let (opt_handle, _) = ctx.arena.insert(identity).await;
                stock.register_child(opt_handle).await;
                ctx.pools.push_expired(opt_handle).await;
                count += 1;
            }
        }
        return count;
    }
    0
}
