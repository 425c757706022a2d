//! 일봉 수집 CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stock_collector::{BatchService, CollectionStats, StockService, WorkerPool};
use stock_core::{init_logging, AppConfig};
use stock_data::Database;
use tokio_util::sync::CancellationToken;

/// 배치 진행 상황 확인 주기.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "stock-collector")]
#[command(about = "Daily stock price collector", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 설정 파일 경로
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// 단일 종목 수집 및 저장
    Fetch {
        /// 종목 코드 (예: 2330)
        symbol: String,

        /// 선호 Provider (참고용)
        #[arg(long)]
        broker: Option<String>,
    },

    /// 모든 Provider 응답 비교 (저장하지 않음)
    Compare {
        /// 종목 코드
        symbol: String,
    },

    /// Provider 및 데이터베이스 상태 확인
    Health,

    /// 워커 풀로 여러 종목 수집
    Batch {
        /// 종목 목록 (쉼표로 구분, 예: "2330,2317"). 생략하면 설정의 종목 사용
        #[arg(long)]
        symbols: Option<String>,

        /// 선호 Provider (참고용)
        #[arg(long)]
        broker: Option<String>,
    },

    /// 데몬 모드: 설정된 종목을 주기적으로 수집
    Daemon,

    /// 스키마 마이그레이션 실행
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_logging(config.log_config()).map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!("일봉 수집기 시작");

    let database = Database::connect(&config.database).await?;

    let result = run(cli.command, &config, &database).await;

    database.close().await;
    tracing::info!("일봉 수집기 종료");

    result
}

async fn run(command: Commands, config: &AppConfig, database: &Database) -> anyhow::Result<()> {
    match command {
        Commands::Migrate => {
            database.migrate().await?;
        }
        Commands::Fetch { symbol, broker } => {
            let service = StockService::from_config(config, database.pool().clone())?;
            let outcome = service
                .fetch(&symbol, broker.as_deref(), &CancellationToken::new())
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome.without_records())?);
            if let Some(e) = outcome.save_error {
                anyhow::bail!("저장 실패: {e}");
            }
        }
        Commands::Compare { symbol } => {
            let service = StockService::from_config(config, database.pool().clone())?;
            let results = service.compare(&symbol, &CancellationToken::new()).await?;
            for result in &results {
                println!(
                    "{:<20} {:<5} {:>6} records {:>6}ms {}",
                    result.provider_name,
                    if result.succeeded { "ok" } else { "fail" },
                    result.record_count,
                    result.elapsed.as_millis(),
                    result.error.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Health => {
            let service = StockService::from_config(config, database.pool().clone())?;
            let providers = service.provider_health().await;
            let db = database.health_check().await;

            let report = serde_json::json!({
                "database": {
                    "healthy": db.is_ok(),
                    "error": db.err().map(|e| e.to_string()),
                    "pool": database.pool_stats(),
                },
                "providers": providers,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Batch { symbols, broker } => {
            let symbols = match symbols {
                Some(list) => parse_symbols(&list),
                None => config.crawler.symbols.clone(),
            };
            if symbols.is_empty() {
                anyhow::bail!("수집할 종목이 없습니다 (--symbols 또는 crawler.symbols 설정 필요)");
            }

            let batch = start_batch_service(config, database)?;
            let shutdown = shutdown_on_ctrl_c();

            let stats = run_batch(&batch, &symbols, broker, &shutdown).await;
            batch.pool().stop().await;
            stats?.log_summary("배치 수집");
        }
        Commands::Daemon => {
            let symbols = config.crawler.symbols.clone();
            if symbols.is_empty() {
                anyhow::bail!("데몬 모드에는 crawler.symbols 설정이 필요합니다");
            }

            tracing::info!(
                "=== 데몬 모드 시작 (주기: {}분, 종목: {}개) ===",
                config.crawler.daemon_interval_minutes,
                symbols.len()
            );

            let batch = start_batch_service(config, database)?;
            let shutdown = shutdown_on_ctrl_c();

            let mut interval = tokio::time::interval(config.crawler.daemon_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("종료 신호 수신, 데몬 종료 중...");
                        break;
                    }
                    _ = interval.tick() => {
                        tracing::info!("=== 주기 수집 시작 ===");
                        match run_batch(&batch, &symbols, None, &shutdown).await {
                            Ok(stats) => stats.log_summary("주기 수집"),
                            Err(e) => tracing::error!("주기 수집 실패: {}", e),
                        }
                        batch.pool().evict_expired();
                        tracing::info!(
                            "=== 주기 수집 완료, 다음 실행: {}분 후 ===",
                            config.crawler.daemon_interval_minutes
                        );
                    }
                }
            }

            batch.pool().stop().await;
        }
    }

    Ok(())
}

/// Ctrl-C 수신 시 취소되는 토큰.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

fn start_batch_service(config: &AppConfig, database: &Database) -> anyhow::Result<BatchService> {
    let service = StockService::from_config(config, database.pool().clone())?;
    let pool = WorkerPool::new(config.crawler.max_workers, Arc::new(service))
        .with_retention(config.crawler.job_retention());
    pool.start();
    Ok(BatchService::new(Arc::new(pool)))
}

/// 종목을 큐 용량 단위로 나눠 제출하고 각 묶음이 끝날 때까지 기다립니다.
async fn run_batch(
    batch: &BatchService,
    symbols: &[String],
    broker: Option<String>,
    shutdown: &CancellationToken,
) -> anyhow::Result<CollectionStats> {
    let started = Instant::now();
    let wave_size = batch.worker_stats().queue_capacity.max(1);
    let mut stats = CollectionStats::new();

    for wave in symbols.chunks(wave_size) {
        if shutdown.is_cancelled() {
            break;
        }

        let submission = batch.submit_batch(wave, broker.clone())?;
        tracing::info!(
            batch_id = %submission.batch_id,
            submitted = submission.total_symbols,
            rejected = submission.rejected.len(),
            "배치 제출"
        );

        if submission.total_symbols > 0 {
            wait_for_batch(batch, &submission.batch_id, shutdown).await?;
        }

        for job in batch.batch_jobs(&submission.batch_id) {
            stats.record(&job);
        }
        stats.total += submission.rejected.len();
        stats.rejected += submission.rejected.len();
    }

    stats.elapsed = started.elapsed();
    Ok(stats)
}

async fn wait_for_batch(
    batch: &BatchService,
    batch_id: &str,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let status = batch.batch_status(batch_id)?;
        if status.finished {
            return Ok(());
        }
        tracing::debug!(
            batch_id = batch_id,
            completed = status.completed_tasks,
            failed = status.failed_tasks,
            remaining = status.pending_tasks + status.running_tasks,
            "배치 진행 중"
        );

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::warn!(batch_id = batch_id, "배치 대기 중단");
                return Ok(());
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

fn parse_symbols(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
