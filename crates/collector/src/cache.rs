use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use interface::{Asset, EquityPoint, ExchangeId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::returns::ReturnOutcome;

/// 거래소별 최신 자산/수익률 (대시보드 조회용, 원본은 저장소)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestSnapshot {
    pub exchange: ExchangeId,
    pub timestamp: DateTime<Utc>,
    pub equity_usdt: Decimal,
    /// 기준 포인트가 없으면 None
    pub return_pct_24h: Option<Decimal>,
    pub stale: bool,
    pub dropped: Vec<Asset>,
}

impl LatestSnapshot {
    pub fn new(equity: &EquityPoint, ret: &ReturnOutcome) -> Self {
        let metric = ret.metric();
        Self {
            exchange: equity.exchange,
            timestamp: equity.timestamp,
            equity_usdt: equity.total_usdt,
            return_pct_24h: metric.map(|m| m.pct_change_24h),
            stale: equity.stale || metric.is_some_and(|m| m.stale),
            dropped: equity.dropped.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait LatestPointCache: Send + Sync {
    async fn put(&self, snapshot: LatestSnapshot) -> Result<(), CacheError>;

    async fn get(&self, exchange: ExchangeId) -> Option<LatestSnapshot>;

    /// 거래소 순으로 정렬
    async fn all(&self) -> Vec<LatestSnapshot>;
}

/// 프로세스 내 캐시
#[derive(Default)]
pub struct MemoryLatestCache {
    inner: RwLock<HashMap<ExchangeId, LatestSnapshot>>,
}

impl MemoryLatestCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LatestPointCache for MemoryLatestCache {
    async fn put(&self, snapshot: LatestSnapshot) -> Result<(), CacheError> {
        let mut inner = self.inner.write().await;
        match inner.get(&snapshot.exchange) {
            // 늦게 도착한 이전 사이클 값은 무시
            Some(existing) if existing.timestamp >= snapshot.timestamp => {}
            _ => {
                inner.insert(snapshot.exchange, snapshot);
            }
        }
        Ok(())
    }

    async fn get(&self, exchange: ExchangeId) -> Option<LatestSnapshot> {
        self.inner.read().await.get(&exchange).cloned()
    }

    async fn all(&self) -> Vec<LatestSnapshot> {
        let mut snapshots: Vec<_> = self.inner.read().await.values().cloned().collect();
        snapshots.sort_by_key(|s| s.exchange);
        snapshots
    }
}
