use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use interface::{EquityPoint, ExchangeId, Metric};
use tracing::{error, warn};

use crate::cache::{LatestPointCache, LatestSnapshot};
use crate::config::CollectorConfig;
use crate::record::{RecordError, SeriesPoint, TimeSeriesStore};
use crate::returns::{ReferencePoint, ReturnOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Persisted { attempts: u32 },
    /// 재시도를 모두 소진해 이번 사이클 데이터를 버림
    Dropped { attempts: u32, last_error: String },
}

#[derive(Debug, Clone, Copy)]
pub struct WritePolicy {
    pub max_attempts: u32,
    /// 첫 재시도 대기, 이후 2배씩
    pub backoff: Duration,
    pub call_timeout: Duration,
}

impl WritePolicy {
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            max_attempts: config.write_attempts.max(1),
            backoff: config.write_backoff,
            call_timeout: config.store_timeout,
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// 사이클 결과를 시계열 저장소에 기록하고 최신값을 캐시에 반영
pub struct PersistenceWriter {
    store: Arc<dyn TimeSeriesStore>,
    cache: Option<Arc<dyn LatestPointCache>>,
    policy: WritePolicy,
}

impl PersistenceWriter {
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        cache: Option<Arc<dyn LatestPointCache>>,
        policy: WritePolicy,
    ) -> Self {
        Self {
            store,
            cache,
            policy,
        }
    }

    async fn append_once(&self, points: &[SeriesPoint]) -> Result<(), RecordError> {
        match tokio::time::timeout(self.policy.call_timeout, self.store.append(points)).await {
            Ok(result) => result,
            Err(_) => Err(RecordError::Timeout(self.policy.call_timeout)),
        }
    }

    pub async fn write(&self, equity: &EquityPoint, ret: &ReturnOutcome) -> WriteOutcome {
        let mut points = vec![SeriesPoint::equity(equity)];
        if let Some(metric) = ret.metric() {
            points.push(SeriesPoint::return_pct(metric));
        }

        let mut last_error = String::new();
        for attempt in 1..=self.policy.max_attempts {
            match self.append_once(&points).await {
                Ok(()) => {
                    self.write_through(equity, ret).await;
                    return WriteOutcome::Persisted { attempts: attempt };
                }
                Err(e) => {
                    warn!(
                        "[{}] store write attempt {}/{} failed: {}",
                        equity.exchange, attempt, self.policy.max_attempts, e
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.backoff_for(attempt)).await;
            }
        }

        error!(
            "[{}] dropping {} point(s) at {} after {} attempts: {}",
            equity.exchange,
            points.len(),
            equity.timestamp.to_rfc3339(),
            self.policy.max_attempts,
            last_error
        );

        WriteOutcome::Dropped {
            attempts: self.policy.max_attempts,
            last_error,
        }
    }

    async fn write_through(&self, equity: &EquityPoint, ret: &ReturnOutcome) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.put(LatestSnapshot::new(equity, ret)).await {
            warn!("[{}] cache write-through failed: {}", equity.exchange, e);
        }
    }

    /// 메모리 이력이 부족할 때 저장소에서 기준 자산 포인트 조회
    pub async fn reference_point(
        &self,
        exchange: ExchangeId,
        at_or_before: DateTime<Utc>,
    ) -> Result<Option<ReferencePoint>, RecordError> {
        let lookup = self
            .store
            .latest_at_or_before(exchange, Metric::EquityUsdt, at_or_before);

        let point = match tokio::time::timeout(self.policy.call_timeout, lookup).await {
            Ok(result) => result?,
            Err(_) => return Err(RecordError::Timeout(self.policy.call_timeout)),
        };

        Ok(point.map(|p| ReferencePoint {
            timestamp: p.timestamp,
            value: p.value,
            stale: p.stale,
        }))
    }
}
