use async_trait::async_trait;
use chrono::{DateTime, Utc};
use interface::{EquityPoint, ExchangeId, Metric, ReturnMetric};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::str::FromStr;
use std::time::Duration;

/// 시계열 저장소의 한 점 (exchange, metric, timestamp가 키)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub exchange: ExchangeId,
    pub metric: Metric,
    pub timestamp: DateTime<Utc>,
    /// 전체 정밀도 유지 (표시용 반올림 없음)
    pub value: Decimal,
    pub stale: bool,
}

impl SeriesPoint {
    pub fn equity(point: &EquityPoint) -> Self {
        Self {
            exchange: point.exchange,
            metric: Metric::EquityUsdt,
            timestamp: point.timestamp,
            value: point.total_usdt,
            stale: point.stale,
        }
    }

    pub fn return_pct(metric: &ReturnMetric) -> Self {
        Self {
            exchange: metric.exchange,
            metric: Metric::ReturnPct24h,
            timestamp: metric.timestamp,
            value: metric.pct_change_24h,
            stale: metric.stale,
        }
    }
}

/// 시계열 저장소 인터페이스
/// 같은 (exchange, metric, timestamp)는 덮어쓴다 (중복 없음)
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// 포인트 여러 개를 한 번에 저장 (전부 성공 또는 전부 실패)
    async fn append(&self, points: &[SeriesPoint]) -> Result<(), RecordError>;

    /// `at` 이하에서 가장 최근 포인트
    async fn latest_at_or_before(
        &self,
        exchange: ExchangeId,
        metric: Metric,
        at: DateTime<Utc>,
    ) -> Result<Option<SeriesPoint>, RecordError>;

    /// 최신순 포인트 목록
    async fn latest(
        &self,
        exchange: ExchangeId,
        metric: Metric,
        limit: u64,
    ) -> Result<Vec<SeriesPoint>, RecordError>;
}

/// SeaORM equity_series::Model을 SeriesPoint로 변환
impl TryFrom<super::entities::equity_series::Model> for SeriesPoint {
    type Error = RecordError;

    fn try_from(model: super::entities::equity_series::Model) -> Result<Self, Self::Error> {
        let exchange = ExchangeId::from_str(&model.exchange).map_err(RecordError::Corrupt)?;
        let metric = Metric::from_str(&model.metric).map_err(RecordError::Corrupt)?;

        let timestamp = DateTime::<Utc>::from_timestamp_millis(model.ts_ms).ok_or_else(|| {
            RecordError::Corrupt(format!("timestamp out of range: {}", model.ts_ms))
        })?;

        let value = Decimal::from_str(&model.value).map_err(|e| {
            RecordError::Corrupt(format!("Failed to parse value {:?}: {}", model.value, e))
        })?;

        Ok(SeriesPoint {
            exchange,
            metric,
            timestamp,
            value,
            stale: model.stale,
        })
    }
}

/// 기록 저장소 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Other error: {0}")]
    Other(String),
}
