use std::sync::Arc;

use collector::cache::{LatestPointCache, MemoryLatestCache};
use collector::config::CollectorConfig;
use collector::pipeline::{CycleOutcome, CycleReport};
use collector::record::TimeSeriesStore;
use collector::returns::ReturnOutcome;
use collector::scheduler::Scheduler;
use color_eyre::eyre;
use interface::{ExchangeId, Metric};
use structopt::StructOpt;
use tokio::sync::watch;
use tracing::{error, info};

// lib.rs에서 자동으로 dotenv가 로드됨

#[derive(Debug, StructOpt)]
#[structopt(name = "collector", about = "스테이블코인 자산 수집기 (Binance, HTX)")]
enum Command {
    /// 주기 수집 + 조회 API 실행
    Run,
    /// 사이클 한 번 실행 후 결과 출력
    CollectOnce,
    /// 저장된 최신 포인트 조회
    Latest {
        /// binance 또는 htx (생략 시 전체)
        #[structopt(long)]
        exchange: Option<ExchangeId>,
        #[structopt(long, default_value = "5")]
        limit: u64,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // init error reporting
    color_eyre::install()?;

    // init logging
    let _guards = collector::logger::init_tracing(&collector::config::log_dir());

    let cmd = Command::from_args();

    match cmd {
        Command::Run => run().await,
        Command::CollectOnce => collect_once().await,
        Command::Latest { exchange, limit } => print_latest(exchange, limit).await,
    }
}

fn load_config() -> eyre::Result<CollectorConfig> {
    CollectorConfig::from_env().map_err(|e| eyre::eyre!("설정 로드 실패: {}", e))
}

async fn open_store(db_path: &str) -> eyre::Result<Arc<dyn TimeSeriesStore>> {
    collector::record::open_store(db_path)
        .await
        .map_err(|e| eyre::eyre!("시계열 저장소 초기화 실패: {}", e))
}

async fn run() -> eyre::Result<()> {
    let config = load_config()?;
    let store = open_store(&config.db_path).await?;
    let cache: Arc<dyn LatestPointCache> = Arc::new(MemoryLatestCache::new());

    let scheduler = Scheduler::from_config(&config, store, Some(cache.clone()))
        .map_err(|e| eyre::eyre!("거래소 클라이언트 생성 실패: {}", e))?;
    let status = scheduler.status_board();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("종료 신호 수신");
        let _ = shutdown_tx.send(true);
    });

    // API 서버를 백그라운드로 시작
    let server_port = config.api_port;
    let server_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        let shutdown = shutdown_signal(server_shutdown);
        if let Err(e) = collector::server::start_server(server_port, cache, status, shutdown).await
        {
            error!("API 서버 실행 중 오류 발생: {}", e);
        }
    });

    scheduler.run(shutdown_signal(shutdown_rx)).await;

    if let Err(e) = server_handle.await {
        error!("서버 태스크 오류: {:?}", e);
    }

    Ok(())
}

async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => error!("SIGTERM 핸들러 등록 실패: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Ctrl-C 대기 실패: {}", e);
    }
}

async fn collect_once() -> eyre::Result<()> {
    let config = load_config()?;
    let store = open_store(&config.db_path).await?;

    let mut scheduler = Scheduler::from_config(&config, store, None)
        .map_err(|e| eyre::eyre!("거래소 클라이언트 생성 실패: {}", e))?;

    let reports = scheduler.run_cycle_once().await;
    print_reports(&reports);

    Ok(())
}

fn print_reports(reports: &[CycleReport]) {
    println!("\n{:<10} {:>18} {:>14}  STATUS", "EXCHANGE", "EQUITY (USDT)", "24H RETURN");
    println!("{}", "-".repeat(60));

    for report in reports {
        match &report.outcome {
            CycleOutcome::Persisted { equity, ret } => {
                let ret = match ret {
                    ReturnOutcome::Available(metric) => format!("{}%", metric.display_value()),
                    ReturnOutcome::Unavailable(_) => "n/a".to_string(),
                };
                let status = if equity.stale { "stale" } else { "ok" };
                println!(
                    "{:<10} {:>18} {:>14}  {}",
                    report.exchange,
                    equity.display_value(),
                    ret,
                    status
                );
                if !equity.dropped.is_empty() {
                    let dropped: Vec<_> = equity.dropped.iter().map(|a| a.as_str()).collect();
                    println!("{:<10} excluded: {}", "", dropped.join(", "));
                }
            }
            CycleOutcome::Dropped { equity, error } => println!(
                "{:<10} {:>18} {:>14}  not persisted: {}",
                report.exchange,
                equity.display_value(),
                "-",
                error
            ),
            CycleOutcome::Failed { stage, error } => println!(
                "{:<10} {:>18} {:>14}  failed while {}: {}",
                report.exchange, "-", "-", stage, error
            ),
            other => println!("{:<10} {:>18} {:>14}  {:?}", report.exchange, "-", "-", other),
        }
    }
}

async fn print_latest(exchange: Option<ExchangeId>, limit: u64) -> eyre::Result<()> {
    let db_path =
        std::env::var("DB_PATH").unwrap_or_else(|_| CollectorConfig::default().db_path);
    let store = open_store(&db_path).await?;

    let exchanges: Vec<ExchangeId> = match exchange {
        Some(id) => vec![id],
        None => ExchangeId::ALL.to_vec(),
    };

    for id in exchanges {
        println!("\n=== {} ===", id);
        for metric in [Metric::EquityUsdt, Metric::ReturnPct24h] {
            let points = store
                .latest(id, metric, limit)
                .await
                .map_err(|e| eyre::eyre!("{} {} 조회 실패: {}", id, metric, e))?;

            if points.is_empty() {
                println!("  {}: (no data)", metric);
                continue;
            }

            for point in points {
                println!(
                    "  {:<15} {}  {:>18}{}",
                    metric.as_str(),
                    point.timestamp.to_rfc3339(),
                    point.value.round_dp(2),
                    if point.stale { "  (stale)" } else { "" }
                );
            }
        }
    }

    Ok(())
}
