use std::fmt::{self, Display};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use exchanges::SnapshotExchange;
use interface::{EquityPoint, ExchangeError, ExchangeId, Snapshot};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::aggregator::{return_window, EquityAggregator, OutOfOrder};
use crate::config::CollectorConfig;
use crate::normalizer::{Normalized, RateNormalizer};
use crate::returns::{ReturnCalculator, ReturnOutcome, UnavailableReason};
use crate::writer::{PersistenceWriter, WriteOutcome};

/// 거래소별 파이프라인 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Idle,
    Collecting,
    Normalizing,
    Aggregating,
    Persisting,
}

impl Stage {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Stage::Collecting,
            2 => Stage::Normalizing,
            3 => Stage::Aggregating,
            4 => Stage::Persisting,
            _ => Stage::Idle,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Idle => "idle",
            Stage::Collecting => "collecting",
            Stage::Normalizing => "normalizing",
            Stage::Aggregating => "aggregating",
            Stage::Persisting => "persisting",
        };
        f.write_str(label)
    }
}

/// 파이프라인 잠금 없이 현재 단계와 인증 상태를 읽기 위한 공유 값
#[derive(Debug, Clone, Default)]
pub struct PipelineMonitor {
    stage: Arc<AtomicU8>,
    degraded: Arc<AtomicBool>,
}

impl PipelineMonitor {
    pub fn stage(&self) -> Stage {
        Stage::from_u8(self.stage.load(Ordering::Relaxed))
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u8, Ordering::Relaxed);
    }

    fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::Relaxed);
    }
}

/// 사이클이 어떤 이유로 끝나든 (중단 포함) Idle로 되돌린다
struct IdleOnDrop(PipelineMonitor);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        self.0.set_stage(Stage::Idle);
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient exchange failure: {0}")]
    TransientNetwork(ExchangeError),

    #[error("authentication failure: {0}")]
    Auth(ExchangeError),

    #[error("exchange request rejected: {0}")]
    Exchange(ExchangeError),

    #[error(transparent)]
    OutOfOrder(#[from] OutOfOrder),

    #[error("store write dropped: {0}")]
    StoreWrite(String),
}

impl From<ExchangeError> for PipelineError {
    fn from(e: ExchangeError) -> Self {
        if e.is_fatal() {
            PipelineError::Auth(e)
        } else if e.is_transient() {
            PipelineError::TransientNetwork(e)
        } else {
            PipelineError::Exchange(e)
        }
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    Persisted {
        equity: EquityPoint,
        ret: ReturnOutcome,
    },
    /// 계산은 됐지만 저장 재시도를 모두 실패
    Dropped {
        equity: EquityPoint,
        error: PipelineError,
    },
    Failed {
        stage: Stage,
        error: PipelineError,
    },
    /// 이전 사이클이 아직 실행 중
    SkippedInFlight,
    /// 인증 실패 후 재시도 대기 중
    SkippedDegraded,
    /// 주기 안에 끝나지 않아 중단
    Abandoned,
}

impl CycleOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, CycleOutcome::Persisted { .. })
    }
}

#[derive(Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub exchange: ExchangeId,
    pub outcome: CycleOutcome,
}

/// 인증 실패로 일시 중단된 상태
#[derive(Debug, Clone)]
struct Degraded {
    since: Instant,
    reason: String,
}

/// 거래소 하나의 수집 -> 정규화 -> 합산 -> 저장 파이프라인
/// 사이클 간 상태 (환율 테이블, 이력, 인증 상태)를 소유한다.
pub struct ExchangePipeline {
    exchange: Arc<dyn SnapshotExchange>,
    normalizer: RateNormalizer,
    aggregator: EquityAggregator,
    writer: Arc<PersistenceWriter>,
    monitor: PipelineMonitor,
    fetch_timeout: Duration,
    fetch_attempts: u32,
    fetch_retry_pause: Duration,
    auth_retry_after: Duration,
    degraded: Option<Degraded>,
}

impl ExchangePipeline {
    pub fn new(
        exchange: Arc<dyn SnapshotExchange>,
        writer: Arc<PersistenceWriter>,
        config: &CollectorConfig,
    ) -> Self {
        let id = exchange.id();
        Self {
            normalizer: RateNormalizer::new(id, config.staleness_window()),
            aggregator: EquityAggregator::new(id, config.interval),
            exchange,
            writer,
            monitor: PipelineMonitor::default(),
            fetch_timeout: config.fetch_timeout,
            fetch_attempts: config.fetch_attempts.max(1),
            fetch_retry_pause: (config.interval / 20).min(Duration::from_secs(1)),
            auth_retry_after: config.auth_retry_after,
            degraded: None,
        }
    }

    pub fn id(&self) -> ExchangeId {
        self.exchange.id()
    }

    pub fn monitor(&self) -> PipelineMonitor {
        self.monitor.clone()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    pub async fn run_cycle(&mut self, cycle: u64, timestamp: DateTime<Utc>) -> CycleOutcome {
        let _idle = IdleOnDrop(self.monitor.clone());
        let id = self.id();

        if let Some(degraded) = &self.degraded {
            if degraded.since.elapsed() < self.auth_retry_after {
                debug!("[{}] degraded ({}), skipping cycle {}", id, degraded.reason, cycle);
                return CycleOutcome::SkippedDegraded;
            }
            info!("[{}] re-attempting after auth failure: {}", id, degraded.reason);
        }

        self.monitor.set_stage(Stage::Collecting);
        let snapshot = match self.collect().await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                if let PipelineError::Auth(_) = &error {
                    error!("[{}] marking exchange degraded: {}", id, error);
                    self.degraded = Some(Degraded {
                        since: Instant::now(),
                        reason: error.to_string(),
                    });
                    self.monitor.set_degraded(true);
                } else {
                    warn!("[{}] cycle {} collection failed: {}", id, cycle, error);
                }
                return CycleOutcome::Failed {
                    stage: Stage::Collecting,
                    error,
                };
            }
        };

        if self.degraded.take().is_some() {
            self.monitor.set_degraded(false);
            info!("[{}] credentials accepted again, exchange healthy", id);
        }

        self.monitor.set_stage(Stage::Normalizing);
        let normalized = self
            .normalizer
            .normalize(&snapshot.balances, &snapshot.rates, timestamp);
        log_breakdown(id, &normalized);

        self.monitor.set_stage(Stage::Aggregating);
        let equity = match self.aggregator.aggregate(&normalized, timestamp) {
            Ok(point) => point,
            Err(e) => {
                warn!("[{}] cycle {} rejected: {}", id, cycle, e);
                return CycleOutcome::Failed {
                    stage: Stage::Aggregating,
                    error: e.into(),
                };
            }
        };
        let ret = self.compute_return(&equity).await;

        self.monitor.set_stage(Stage::Persisting);
        match self.writer.write(&equity, &ret).await {
            WriteOutcome::Persisted { .. } => {
                info!(
                    "[{}] cycle {} equity {} USDT{} | 24h return {}",
                    id,
                    cycle,
                    equity.display_value(),
                    if equity.stale { " (stale)" } else { "" },
                    describe_return(&ret)
                );
                CycleOutcome::Persisted { equity, ret }
            }
            WriteOutcome::Dropped { last_error, .. } => CycleOutcome::Dropped {
                equity,
                error: PipelineError::StoreWrite(last_error),
            },
        }
    }

    /// 일시적 실패는 같은 사이클 안에서 재시도
    async fn collect(&self) -> Result<Snapshot, PipelineError> {
        let id = self.id();
        let mut attempt = 1;
        loop {
            let fetched =
                match tokio::time::timeout(self.fetch_timeout, self.exchange.fetch_snapshot()).await {
                    Ok(result) => result,
                    Err(_) => Err(ExchangeError::Timeout(self.fetch_timeout)),
                };
            match fetched {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) if e.is_transient() && attempt < self.fetch_attempts => {
                    warn!(
                        "[{}] fetch attempt {}/{} failed: {}",
                        id, attempt, self.fetch_attempts, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.fetch_retry_pause).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 메모리 이력에 기준점이 없으면 저장소에서 찾는다 (재시작 직후 등)
    async fn compute_return(&self, equity: &EquityPoint) -> ReturnOutcome {
        let outcome = ReturnCalculator::compute(equity, self.aggregator.history());
        if outcome != ReturnOutcome::Unavailable(UnavailableReason::NoReference) {
            return outcome;
        }

        let boundary = equity.timestamp - return_window();
        match self.writer.reference_point(equity.exchange, boundary).await {
            Ok(reference) => ReturnCalculator::compute_against(equity, reference.as_ref()),
            Err(e) => {
                warn!("[{}] reference lookup failed: {}", equity.exchange, e);
                outcome
            }
        }
    }
}

fn describe_return(ret: &ReturnOutcome) -> String {
    match ret {
        ReturnOutcome::Available(metric) => format!(
            "{}%{}",
            metric.display_value(),
            if metric.stale { " (stale)" } else { "" }
        ),
        ReturnOutcome::Unavailable(reason) => format!("unavailable ({})", reason),
    }
}

/// 자산별 환산 내역 (amount x rate = value)
fn log_breakdown(id: ExchangeId, normalized: &Normalized) {
    for amount in &normalized.amounts {
        info!(
            "[{}]   {} {} x {} = {} USDT{}",
            id,
            amount.amount.round_dp(2),
            amount.asset,
            amount.rate,
            amount.value_usdt.round_dp(2),
            if amount.stale { " (stale rate)" } else { "" }
        );
    }
    for dropped in &normalized.dropped {
        info!(
            "[{}]   {} {} excluded: {}",
            id,
            dropped.amount.round_dp(2),
            dropped.asset,
            dropped.reason
        );
    }
}
