use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use exchanges::{BinanceClient, HtxClient, SnapshotExchange};
use interface::{ExchangeError, ExchangeId};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, info_span, warn, Instrument};

use crate::cache::LatestPointCache;
use crate::config::CollectorConfig;
use crate::pipeline::{CycleOutcome, CycleReport, ExchangePipeline, PipelineMonitor};
use crate::record::TimeSeriesStore;
use crate::status::StatusBoard;
use crate::writer::{PersistenceWriter, WritePolicy};

struct ExchangeSlot {
    id: ExchangeId,
    pipeline: Arc<Mutex<ExchangePipeline>>,
    monitor: PipelineMonitor,
}

/// 틱마다 시작된 (또는 건너뛴) 거래소 파이프라인
enum Dispatched {
    Ready(CycleReport),
    Running {
        cycle: u64,
        exchange: ExchangeId,
        handle: JoinHandle<CycleOutcome>,
    },
}

impl Dispatched {
    async fn into_report(self) -> CycleReport {
        match self {
            Dispatched::Ready(report) => report,
            Dispatched::Running {
                cycle,
                exchange,
                handle,
            } => {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("[{}] cycle {} task failed: {}", exchange, cycle, e);
                        CycleOutcome::Abandoned
                    }
                };
                CycleReport {
                    cycle,
                    exchange,
                    outcome,
                }
            }
        }
    }
}

/// 고정 주기로 거래소별 파이프라인을 독립적으로 실행
pub struct Scheduler {
    interval: Duration,
    slots: Vec<ExchangeSlot>,
    status: Arc<StatusBoard>,
    cycle: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

/// 다음 틱 전에 중단된 사이클이 잠금을 돌려줄 여유
fn abandon_margin(interval: Duration) -> Duration {
    (interval / 10).min(Duration::from_millis(500))
}

impl Scheduler {
    pub fn new(interval: Duration, pipelines: Vec<ExchangePipeline>) -> Self {
        let slots: Vec<ExchangeSlot> = pipelines
            .into_iter()
            .map(|pipeline| ExchangeSlot {
                id: pipeline.id(),
                monitor: pipeline.monitor(),
                pipeline: Arc::new(Mutex::new(pipeline)),
            })
            .collect();
        let status = Arc::new(StatusBoard::new(
            slots.iter().map(|s| (s.id, s.monitor.clone())).collect(),
        ));

        Self {
            interval,
            slots,
            status,
            cycle: 0,
            last_timestamp: None,
        }
    }

    /// 설정된 거래소마다 어댑터와 파이프라인 생성
    pub fn from_config(
        config: &CollectorConfig,
        store: Arc<dyn TimeSeriesStore>,
        cache: Option<Arc<dyn LatestPointCache>>,
    ) -> Result<Self, ExchangeError> {
        let writer = Arc::new(PersistenceWriter::new(
            store,
            cache,
            WritePolicy::from_config(config),
        ));

        let mut pipelines = Vec::with_capacity(config.exchanges.len());
        for exchange in &config.exchanges {
            let options = exchange.client_options(config.fetch_timeout);
            let client: Arc<dyn SnapshotExchange> = match exchange.id {
                ExchangeId::Binance => Arc::new(BinanceClient::new(options)?),
                ExchangeId::Htx => Arc::new(HtxClient::new(options)?),
            };
            info!(
                "[{}] tracking {}",
                exchange.id,
                exchange
                    .tracked
                    .iter()
                    .map(|t| t.asset.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            pipelines.push(ExchangePipeline::new(client, writer.clone(), config));
        }

        Ok(Self::new(config.interval, pipelines))
    }

    pub fn exchanges(&self) -> Vec<ExchangeId> {
        self.slots.iter().map(|s| s.id).collect()
    }

    /// 조회 API와 공유하는 상태판
    pub fn status_board(&self) -> Arc<StatusBoard> {
        self.status.clone()
    }

    /// `started`에 시작한 사이클을 중단할 시각 (다음 틱보다 조금 앞선다)
    fn cycle_deadline(&self, started: Instant) -> Instant {
        started + self.interval.saturating_sub(abandon_margin(self.interval))
    }

    /// 다음 사이클 ID와 모든 거래소가 공유하는 타임스탬프 (ms 단위, 항상 증가)
    fn next_cycle(&mut self) -> (u64, DateTime<Utc>) {
        self.cycle += 1;

        let now = Utc::now();
        let mut timestamp =
            DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        if let Some(last) = self.last_timestamp {
            if timestamp <= last {
                timestamp = last + chrono::Duration::milliseconds(1);
            }
        }
        self.last_timestamp = Some(timestamp);

        (self.cycle, timestamp)
    }

    /// 한 틱: 실행 중이 아닌 거래소마다 파이프라인 태스크를 띄운다
    /// `deadline`까지 끝나지 않은 사이클은 중단되어 다음 틱 전에 잠금을 푼다.
    fn dispatch(&mut self, deadline: Instant) -> Vec<Dispatched> {
        let (cycle, timestamp) = self.next_cycle();

        self.slots
            .iter()
            .map(|slot| {
                let exchange = slot.id;
                let guard = match slot.pipeline.clone().try_lock_owned() {
                    Ok(guard) => guard,
                    Err(_) => {
                        warn!(
                            "[{}] tick {} skipped: previous cycle still {}",
                            exchange,
                            cycle,
                            slot.monitor.stage()
                        );
                        return Dispatched::Ready(CycleReport {
                            cycle,
                            exchange,
                            outcome: CycleOutcome::SkippedInFlight,
                        });
                    }
                };

                let span = info_span!("cycle", id = cycle, exchange = %exchange);
                let monitor = slot.monitor.clone();
                let handle = tokio::spawn(
                    async move {
                        let mut pipeline = guard;
                        let started = Instant::now();
                        match tokio::time::timeout_at(
                            deadline,
                            pipeline.run_cycle(cycle, timestamp),
                        )
                        .await
                        {
                            Ok(outcome) => outcome,
                            Err(_) => {
                                warn!(
                                    "[{}] cycle {} abandoned after {:?} while {}",
                                    exchange,
                                    cycle,
                                    started.elapsed(),
                                    monitor.stage()
                                );
                                CycleOutcome::Abandoned
                            }
                        }
                    }
                    .instrument(span),
                );

                Dispatched::Running {
                    cycle,
                    exchange,
                    handle,
                }
            })
            .collect()
    }

    /// 사이클 하나를 실행하고 모든 거래소 결과를 기다린다
    pub async fn run_cycle_once(&mut self) -> Vec<CycleReport> {
        let deadline = self.cycle_deadline(Instant::now());
        let dispatched = self.dispatch(deadline);
        let mut reports = Vec::with_capacity(dispatched.len());
        for d in dispatched {
            let report = d.into_report().await;
            self.status.record(&report);
            reports.push(report);
        }
        reports
    }

    /// shutdown이 완료될 때까지 주기 실행
    /// 종료 시 새 틱은 멈추고 실행 중인 사이클은 한 주기 안에서 마무리를 기다린다.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Scheduler started: interval {:?}, exchanges [{}]",
            self.interval,
            self.exchanges()
                .iter()
                .map(|e| e.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping ticks");
                    break;
                }
                tick = ticker.tick() => {
                    let deadline = self.cycle_deadline(tick);
                    let dispatched = self.dispatch(deadline);
                    let status = self.status.clone();
                    tokio::spawn(async move {
                        for d in dispatched {
                            let report = d.into_report().await;
                            log_report(&report);
                            status.record(&report);
                        }
                    });
                }
            }
        }

        self.drain().await;
        info!("Scheduler stopped");
    }

    /// 실행 중인 파이프라인이 끝나기를 최대 한 주기 기다린다
    async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + self.interval;
        for slot in &self.slots {
            match tokio::time::timeout_at(deadline, slot.pipeline.lock()).await {
                Ok(_) => {}
                Err(_) => warn!(
                    "[{}] in-flight cycle did not finish before shutdown ({})",
                    slot.id,
                    slot.monitor.stage()
                ),
            }
        }
    }
}

pub fn log_report(report: &CycleReport) {
    match &report.outcome {
        CycleOutcome::Persisted { .. }
        | CycleOutcome::SkippedDegraded
        | CycleOutcome::SkippedInFlight => {}
        CycleOutcome::Dropped { equity, error } => warn!(
            "[{}] cycle {} equity {} USDT not persisted: {}",
            report.exchange,
            report.cycle,
            equity.display_value(),
            error
        ),
        CycleOutcome::Failed { stage, error } => warn!(
            "[{}] cycle {} failed while {}: {}",
            report.exchange, report.cycle, stage, error
        ),
        CycleOutcome::Abandoned => warn!(
            "[{}] cycle {} abandoned",
            report.exchange, report.cycle
        ),
    }
}
