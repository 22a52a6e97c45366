//! 파이프라인 조립과 실행.
//!
//! 발굴을 먼저 블로킹으로 수행한 뒤 스케줄러/수집/영속화 세 태스크를
//! 띄웁니다. 준비 큐는 용량 고정 채널, 기록 큐는 무한 채널이며
//! 종료 신호는 `CancellationToken`으로 전파합니다.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use archive_core::{ContractPools, InstrumentArena, MarketDataSource, RequestIds, RequestRegistry};
use archive_data::Catalog;

use crate::config::ArchiverConfig;
use crate::error::Result;
use crate::modules::{discovery, fetch, persist, scheduler};

/// 파이프라인 공유 상태.
pub struct PipelineContext {
    pub config: ArchiverConfig,
    pub arena: Arc<InstrumentArena>,
    pub pools: Arc<ContractPools>,
    pub ids: Arc<RequestIds>,
    pub registry: Arc<RequestRegistry>,
    pub source: Arc<dyn MarketDataSource>,
    pub catalog: Arc<dyn Catalog>,
}

impl PipelineContext {
    pub fn new(
        config: ArchiverConfig,
        arena: Arc<InstrumentArena>,
        registry: Arc<RequestRegistry>,
        source: Arc<dyn MarketDataSource>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            config,
            arena,
            pools: Arc::new(ContractPools::new()),
            ids: Arc::new(RequestIds::new()),
            registry,
            source,
            catalog,
        }
    }
}

/// 발굴 후 수집 파이프라인을 종료 신호까지 실행.
pub async fn run(ctx: Arc<PipelineContext>, shutdown: CancellationToken) -> Result<()> {
    discovery::run(&ctx).await?;

    if ctx.pools.all_empty().await {
        tracing::warn!("발굴된 계약이 없어 파이프라인을 종료합니다");
        return Ok(());
    }

    let (ready_tx, ready_rx) = mpsc::channel(ctx.config.ready_capacity);
    let (write_tx, write_rx) = mpsc::unbounded_channel();

    let scheduler_task = tokio::spawn(scheduler::run(
        Arc::clone(&ctx),
        ready_tx,
        shutdown.clone(),
    ));
    let fetch_task = tokio::spawn(fetch::run(
        Arc::clone(&ctx),
        ready_rx,
        write_tx,
        shutdown.clone(),
    ));
    let persist_task = tokio::spawn(persist::run(Arc::clone(&ctx), write_rx, shutdown.clone()));

    let (scheduler_out, fetch_out, persist_out) =
        tokio::join!(scheduler_task, fetch_task, persist_task);

    for out in [scheduler_out, fetch_out, persist_out] {
        match out {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(e) => return Err(crate::error::ArchiverError::Other(Box::new(e))),
        }
    }

    tracing::info!("수집 파이프라인 종료 완료");
    Ok(())
}
