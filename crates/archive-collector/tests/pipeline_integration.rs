//! 아카이빙 파이프라인 통합 테스트.
//!
//! 시뮬레이션 소스와 인메모리 카탈로그로 발굴 → 스케줄 → 수집 →
//! 영속화 전체 경로를 구동한다:
//! 1. 기초자산 해소와 옵션 체인 전개로 풀 적재
//! 2. 일일 타이머가 주식 갱신 패스를 트리거
//! 3. 캔들이 중복 없이 카탈로그에 기록되는지 확인

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveTime};
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use archive_collector::config::{ArchiverConfig, ScheduleConfig, UpstreamConfig};
use archive_collector::modules::discovery;
use archive_collector::modules::scheduler::EXPIRED_REFRESH_WORKFLOW;
use archive_collector::{pipeline, PipelineContext, SimSource};
use archive_core::{
    BarRequestOptions, Identity, InstrumentArena, MarketDataSource, OptionRight, RequestRegistry,
    TimeoutTable,
};
use archive_data::{Catalog, MemoryCatalog};

fn test_config(underlyings: &[&str]) -> ArchiverConfig {
    ArchiverConfig {
        database_url: None,
        upstream: UpstreamConfig {
            host: "127.0.0.1".to_string(),
            port: 7496,
            client_id: 1,
        },
        underlyings: underlyings.iter().map(|s| s.to_string()).collect(),
        bars: BarRequestOptions::default(),
        schedule: ScheduleConfig {
            // 자정은 항상 이미 지난 시각이라 첫 평가에서 타이머가 발화한다
            stock_refresh_time: NaiveTime::MIN,
            expired_refresh_time: NaiveTime::MIN,
            excluded_weekdays: Vec::new(),
            expired_grace_days: 2,
        },
        ready_capacity: 4,
        insert_max_rows: 995,
        randomize_options: false,
        chain_wait_secs: 1,
        reconnect_backoff_secs: 1,
        timeouts: TimeoutTable::default(),
    }
}

fn build_context(
    config: ArchiverConfig,
    catalog: Arc<MemoryCatalog>,
) -> (Arc<PipelineContext>, Arc<SimSource>) {
    let arena = Arc::new(InstrumentArena::new());
    let registry = Arc::new(RequestRegistry::new(Arc::clone(&arena)));
    let source = Arc::new(SimSource::new(Arc::clone(&registry)));
    let ctx = PipelineContext::new(
        config,
        arena,
        registry,
        Arc::clone(&source) as Arc<dyn MarketDataSource>,
        catalog as Arc<dyn Catalog>,
    );
    (Arc::new(ctx), source)
}

#[tokio::test]
async fn test_discovery_populates_pools() {
    let catalog = Arc::new(MemoryCatalog::new());
    let (ctx, _source) = build_context(test_config(&["SPY", "QQQ"]), Arc::clone(&catalog));

    discovery::run(&ctx).await.unwrap();

    let (stocks, options, _expired) = ctx.pools.sizes().await;
    assert_eq!(stocks, 2);
    // 기초자산당 만기 2 x 행사가 5 x 콜/풋
    assert_eq!(options, 2 * 2 * 5 * 2);

    // 주식 테이블은 발굴 중에 생성된다
    assert!(catalog
        .table_exists(&Identity::stock("SPY"))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_unresolvable_symbol_is_skipped() {
    let catalog = Arc::new(MemoryCatalog::new());
    let (ctx, _source) = build_context(test_config(&["NODATA", "SPY"]), Arc::clone(&catalog));

    discovery::run(&ctx).await.unwrap();

    let (stocks, _, _) = ctx.pools.sizes().await;
    assert_eq!(stocks, 1);
    assert!(!catalog
        .table_exists(&Identity::stock("NODATA"))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_chain_wait_exits_early() {
    let catalog = Arc::new(MemoryCatalog::new());
    let mut config = test_config(&["SPY", "QQQ"]);
    config.chain_wait_secs = 5;
    let (ctx, _source) = build_context(config, Arc::clone(&catalog));

    let started = Instant::now();
    discovery::run(&ctx).await.unwrap();

    // 체인 응답이 도착하는 즉시 대기를 끝내므로 한도(종목당 5초)보다
    // 훨씬 먼저 발굴이 끝나야 한다
    assert!(started.elapsed() < Duration::from_secs(5));
    let (_, options, _) = ctx.pools.sizes().await;
    assert!(options > 0);
}

/// 어제 만기된 SPY 옵션 테이블을 카탈로그에 심는다.
async fn seed_expired_spy_table(catalog: &MemoryCatalog) {
    let yesterday = Local::now().date_naive() - chrono::Duration::days(1);
    let seeded = Identity::option("SPY", dec!(100), OptionRight::Call, yesterday);
    catalog.seed_table(&seeded).await.unwrap();
}

#[tokio::test]
async fn test_startup_sweep_skipped_when_checkpoint_recent() {
    let catalog = Arc::new(MemoryCatalog::new());
    seed_expired_spy_table(&catalog).await;
    // 방금 수행한 기록이 있으면 시작 재스캔은 생략된다
    catalog
        .save_checkpoint(EXPIRED_REFRESH_WORKFLOW, Local::now().naive_local())
        .await
        .unwrap();

    let (ctx, _source) = build_context(test_config(&["SPY"]), Arc::clone(&catalog));
    discovery::run(&ctx).await.unwrap();

    let (_, _, expired) = ctx.pools.sizes().await;
    assert_eq!(expired, 0);
}

#[tokio::test]
async fn test_startup_sweep_runs_when_checkpoint_stale() {
    let catalog = Arc::new(MemoryCatalog::new());
    seed_expired_spy_table(&catalog).await;
    // 마지막 수행이 이틀 전이면 기한이 지나 재스캔이 수행된다
    catalog
        .save_checkpoint(
            EXPIRED_REFRESH_WORKFLOW,
            Local::now().naive_local() - chrono::Duration::days(2),
        )
        .await
        .unwrap();

    let (ctx, _source) = build_context(test_config(&["SPY"]), Arc::clone(&catalog));
    discovery::run(&ctx).await.unwrap();

    // 풀에 없던 계약은 모체 체인에서 재합성된다 (행사가 5 x 콜/풋)
    let (_, _, expired) = ctx.pools.sizes().await;
    assert_eq!(expired, 10);
}

#[tokio::test]
async fn test_pipeline_archives_stock_candles() {
    let catalog = Arc::new(MemoryCatalog::new());
    let (ctx, _source) = build_context(test_config(&["SPY"]), Arc::clone(&catalog));

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(pipeline::run(Arc::clone(&ctx), shutdown.clone()));

    // 주식 패스가 수집과 영속화를 마칠 때까지 대기
    let spy = Identity::stock("SPY");
    for _ in 0..100 {
        if catalog.row_count(&spy).await.unwrap() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let first_count = catalog.row_count(&spy).await.unwrap();
    assert!(first_count > 0, "주식 테이블에 캔들이 있어야 한다");

    shutdown.cancel();
    task.await.unwrap().unwrap();

    // 체크포인트는 패스 완료 / 풀 소진 시점에 기록된다
    assert!(catalog
        .load_checkpoint("stock_refresh")
        .await
        .unwrap()
        .is_some());
    assert!(catalog
        .load_checkpoint(EXPIRED_REFRESH_WORKFLOW)
        .await
        .unwrap()
        .is_some());

    // 같은 카탈로그로 한 번 더 돌려도 행이 중복되지 않아야 한다
    let (ctx2, _source2) = build_context(test_config(&["SPY"]), Arc::clone(&catalog));
    let shutdown2 = CancellationToken::new();
    let task2 = tokio::spawn(pipeline::run(Arc::clone(&ctx2), shutdown2.clone()));
    tokio::time::sleep(Duration::from_secs(3)).await;
    shutdown2.cancel();
    task2.await.unwrap().unwrap();

    assert_eq!(catalog.row_count(&spy).await.unwrap(), first_count);
}
