use std::sync::Mutex;

use chrono::{DateTime, Utc};
use interface::ExchangeId;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::pipeline::{CycleOutcome, CycleReport, PipelineMonitor, Stage};

/// 거래소별 누적 사이클 결과
#[derive(Debug, Clone, Default)]
struct Counters {
    persisted: u64,
    dropped: u64,
    failed: u64,
    skipped: u64,
    abandoned: u64,
    last_persisted_at: Option<DateTime<Utc>>,
    last_equity_usdt: Option<Decimal>,
    last_error: Option<String>,
}

struct Entry {
    exchange: ExchangeId,
    monitor: PipelineMonitor,
    counters: Mutex<Counters>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExchangeStatus {
    pub exchange: ExchangeId,
    pub stage: Stage,
    pub degraded: bool,
    pub cycles_persisted: u64,
    pub cycles_dropped: u64,
    pub cycles_failed: u64,
    pub cycles_skipped: u64,
    pub cycles_abandoned: u64,
    pub last_persisted_at: Option<DateTime<Utc>>,
    pub last_equity_usdt: Option<Decimal>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatus {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub exchanges_active: usize,
    pub collections_completed: u64,
    pub collections_failed: u64,
    pub exchanges: Vec<ExchangeStatus>,
}

/// 수집기 상태판
/// 사이클 결과는 스케줄러가 기록하고, 단계/인증 상태는 파이프라인 모니터에서 바로 읽는다.
pub struct StatusBoard {
    started_at: DateTime<Utc>,
    entries: Vec<Entry>,
}

impl StatusBoard {
    pub fn new(monitors: Vec<(ExchangeId, PipelineMonitor)>) -> Self {
        Self {
            started_at: Utc::now(),
            entries: monitors
                .into_iter()
                .map(|(exchange, monitor)| Entry {
                    exchange,
                    monitor,
                    counters: Mutex::new(Counters::default()),
                })
                .collect(),
        }
    }

    pub fn record(&self, report: &CycleReport) {
        let Some(entry) = self.entries.iter().find(|e| e.exchange == report.exchange) else {
            return;
        };
        let mut c = entry
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match &report.outcome {
            CycleOutcome::Persisted { equity, .. } => {
                c.persisted += 1;
                c.last_persisted_at = Some(equity.timestamp);
                c.last_equity_usdt = Some(equity.total_usdt);
            }
            CycleOutcome::Dropped { error, .. } => {
                c.dropped += 1;
                c.last_error = Some(error.to_string());
            }
            CycleOutcome::Failed { error, .. } => {
                c.failed += 1;
                c.last_error = Some(error.to_string());
            }
            CycleOutcome::SkippedInFlight | CycleOutcome::SkippedDegraded => c.skipped += 1,
            CycleOutcome::Abandoned => {
                c.abandoned += 1;
                c.last_error = Some(format!("cycle {} abandoned", report.cycle));
            }
        }
    }

    pub fn exchange(&self, id: ExchangeId) -> Option<ExchangeStatus> {
        self.entries
            .iter()
            .find(|e| e.exchange == id)
            .map(Self::entry_status)
    }

    fn entry_status(entry: &Entry) -> ExchangeStatus {
        let c = entry
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        ExchangeStatus {
            exchange: entry.exchange,
            stage: entry.monitor.stage(),
            degraded: entry.monitor.is_degraded(),
            cycles_persisted: c.persisted,
            cycles_dropped: c.dropped,
            cycles_failed: c.failed,
            cycles_skipped: c.skipped,
            cycles_abandoned: c.abandoned,
            last_persisted_at: c.last_persisted_at,
            last_equity_usdt: c.last_equity_usdt,
            last_error: c.last_error,
        }
    }

    pub fn snapshot(&self) -> CollectorStatus {
        let exchanges: Vec<ExchangeStatus> = self.entries.iter().map(Self::entry_status).collect();
        let now = Utc::now();

        CollectorStatus {
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds(),
            exchanges_active: exchanges.iter().filter(|e| !e.degraded).count(),
            collections_completed: exchanges.iter().map(|e| e.cycles_persisted).sum(),
            collections_failed: exchanges
                .iter()
                .map(|e| e.cycles_failed + e.cycles_dropped + e.cycles_abandoned)
                .sum(),
            exchanges,
        }
    }
}
