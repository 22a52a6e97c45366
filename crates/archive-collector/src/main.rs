//! Standalone price history archiver CLI.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archive_collector::{modules, pipeline, ArchiverConfig, ArchiverError, PipelineContext, SimSource};
use archive_core::{InstrumentArena, MarketDataSource, RequestRegistry};
use archive_data::{Catalog, MemoryCatalog, PgCatalog};

#[derive(Parser)]
#[command(name = "archive-collector")]
#[command(about = "Price History Archiver", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// 발굴 + 일일 수집 루프 실행 (종료 신호까지 상주)
    Run {
        /// 시뮬레이션 소스로 실행 (실제 업스트림 연결 없음)
        #[arg(long)]
        simulate: bool,

        /// 인메모리 카탈로그 사용 (DB 기록 없음)
        #[arg(long)]
        dry_run: bool,
    },

    /// 발굴만 수행하고 풀 크기를 보고
    Discover {
        /// 시뮬레이션 소스로 실행
        #[arg(long)]
        simulate: bool,

        /// 인메모리 카탈로그 사용
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("archive_collector={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Price History Archiver 시작");

    let config = ArchiverConfig::from_env()?;
    tracing::debug!(underlyings = config.underlyings.len(), "설정 로드 완료");

    let (simulate, dry_run, discover_only) = match cli.command {
        Commands::Run { simulate, dry_run } => (simulate, dry_run, false),
        Commands::Discover { simulate, dry_run } => (simulate, dry_run, true),
    };

    let catalog: Arc<dyn Catalog> = if dry_run {
        tracing::info!("인메모리 카탈로그 사용 (dry-run)");
        Arc::new(MemoryCatalog::new())
    } else {
        let database_url = config.require_database_url()?;
        let pool = sqlx::PgPool::connect(database_url).await?;
        tracing::info!("데이터베이스 연결 성공");
        Arc::new(PgCatalog::new(pool))
    };

    let arena = Arc::new(InstrumentArena::new());
    let registry = Arc::new(RequestRegistry::new(Arc::clone(&arena)));

    let source: Arc<dyn MarketDataSource> = if simulate {
        tracing::info!("시뮬레이션 소스 사용");
        Arc::new(SimSource::new(Arc::clone(&registry)))
    } else {
        return Err(ArchiverError::Config(
            "no upstream transport configured; run with --simulate".to_string(),
        )
        .into());
    };

    let ctx = Arc::new(PipelineContext::new(
        config, arena, registry, source, catalog,
    ));

    // Ctrl+C → 종료 신호 전파
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("종료 신호 수신");
            signal_token.cancel();
        }
    });

    if discover_only {
        modules::discovery::run(&ctx).await?;
        let (stocks, options, expired) = ctx.pools.sizes().await;
        tracing::info!(stocks, options, expired, "발굴 완료");
        return Ok(());
    }

    pipeline::run(ctx, shutdown).await?;
    Ok(())
}
