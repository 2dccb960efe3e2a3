use async_trait::async_trait;
use chrono::{DateTime, Utc};
use interface::{ExchangeId, Metric};
use sea_orm::sea_query::{Index, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Schema, Set,
};
use std::convert::TryInto;
use std::env;
use std::path::PathBuf;
use tracing::info;

use super::entities::equity_series;
use super::{RecordError, SeriesPoint, TimeSeriesStore};

/// SQLite 기반 시계열 저장소
pub struct SqliteTimeSeriesStore {
    db: DatabaseConnection,
}

impl SqliteTimeSeriesStore {
    /// DB 파일 경로로 저장소 생성 (없으면 생성)
    pub async fn new(db_path: &str) -> Result<Self, RecordError> {
        // 상대 경로는 현재 디렉토리 기준
        let mut path = PathBuf::from(db_path);
        if !path.is_absolute() {
            if let Ok(current_dir) = env::current_dir() {
                path = current_dir.join(db_path);
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RecordError::Other(format!("Failed to create DB directory: {}", e)))?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", path.to_string_lossy());
        info!("Connecting to SQLite database: {}", db_url);

        let db = Database::connect(&db_url).await?;
        Self::with_connection(db).await
    }

    /// 메모리 DB (연결 하나를 유지해야 데이터가 남는다)
    pub async fn in_memory() -> Result<Self, RecordError> {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
        let db = Database::connect(options).await?;
        Self::with_connection(db).await
    }

    pub async fn with_connection(db: DatabaseConnection) -> Result<Self, RecordError> {
        let backend = db.get_database_backend();
        let schema = Schema::new(backend);

        // 테이블 생성 (IF NOT EXISTS)
        let mut create_table_stmt = schema.create_table_from_entity(equity_series::Entity);
        create_table_stmt.if_not_exists();
        db.execute(backend.build(&create_table_stmt)).await?;

        // upsert 대상 키라서 생성 실패는 무시하지 않는다
        let mut point_key_idx = Index::create()
            .name("idx_equity_series_point_key")
            .table(equity_series::Entity)
            .col(equity_series::Column::Exchange)
            .col(equity_series::Column::Metric)
            .col(equity_series::Column::TsMs)
            .unique()
            .to_owned();
        point_key_idx.if_not_exists();
        db.execute(backend.build(&point_key_idx)).await?;

        info!("Equity series table initialized");

        Ok(Self { db })
    }
}

fn to_active_model(point: &SeriesPoint) -> equity_series::ActiveModel {
    equity_series::ActiveModel {
        exchange: Set(point.exchange.to_string()),
        metric: Set(point.metric.to_string()),
        ts_ms: Set(point.timestamp.timestamp_millis()),
        recorded_at: Set(point.timestamp.to_rfc3339()),
        value: Set(point.value.to_string()),
        stale: Set(point.stale),
        ..Default::default()
    }
}

#[async_trait]
impl TimeSeriesStore for SqliteTimeSeriesStore {
    async fn append(&self, points: &[SeriesPoint]) -> Result<(), RecordError> {
        if points.is_empty() {
            return Ok(());
        }

        let models: Vec<equity_series::ActiveModel> = points.iter().map(to_active_model).collect();

        equity_series::Entity::insert_many(models)
            .on_conflict(
                OnConflict::columns([
                    equity_series::Column::Exchange,
                    equity_series::Column::Metric,
                    equity_series::Column::TsMs,
                ])
                .update_columns([
                    equity_series::Column::Value,
                    equity_series::Column::Stale,
                    equity_series::Column::RecordedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        Ok(())
    }

    async fn latest_at_or_before(
        &self,
        exchange: ExchangeId,
        metric: Metric,
        at: DateTime<Utc>,
    ) -> Result<Option<SeriesPoint>, RecordError> {
        let model = equity_series::Entity::find()
            .filter(equity_series::Column::Exchange.eq(exchange.as_str()))
            .filter(equity_series::Column::Metric.eq(metric.as_str()))
            .filter(equity_series::Column::TsMs.lte(at.timestamp_millis()))
            .order_by_desc(equity_series::Column::TsMs)
            .one(&self.db)
            .await?;

        match model {
            Some(m) => Ok(Some(m.try_into()?)),
            None => Ok(None),
        }
    }

    async fn latest(
        &self,
        exchange: ExchangeId,
        metric: Metric,
        limit: u64,
    ) -> Result<Vec<SeriesPoint>, RecordError> {
        let models = equity_series::Entity::find()
            .filter(equity_series::Column::Exchange.eq(exchange.as_str()))
            .filter(equity_series::Column::Metric.eq(metric.as_str()))
            .order_by_desc(equity_series::Column::TsMs)
            .limit(limit)
            .all(&self.db)
            .await?;

        models.into_iter().map(|m| m.try_into()).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn point(exchange: ExchangeId, metric: Metric, at: DateTime<Utc>, value: &str) -> SeriesPoint {
        SeriesPoint {
            exchange,
            metric,
            timestamp: at,
            value: value.parse().unwrap(),
            stale: false,
        }
    }

    #[tokio::test]
    async fn append_keeps_full_precision() {
        let store = SqliteTimeSeriesStore::in_memory().await.unwrap();
        let p = point(
            ExchangeId::Binance,
            Metric::EquityUsdt,
            t0(),
            "1499.000000000123456789",
        );
        store.append(&[p.clone()]).await.unwrap();

        let latest = store
            .latest(ExchangeId::Binance, Metric::EquityUsdt, 10)
            .await
            .unwrap();
        assert_eq!(latest, vec![p]);
    }

    #[tokio::test]
    async fn same_key_upserts_instead_of_duplicating() {
        let store = SqliteTimeSeriesStore::in_memory().await.unwrap();
        store
            .append(&[point(ExchangeId::Htx, Metric::EquityUsdt, t0(), "100")])
            .await
            .unwrap();

        let mut replacement = point(ExchangeId::Htx, Metric::EquityUsdt, t0(), "101.5");
        replacement.stale = true;
        store.append(&[replacement.clone()]).await.unwrap();

        let latest = store
            .latest(ExchangeId::Htx, Metric::EquityUsdt, 10)
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].value, Decimal::new(1015, 1));
        assert!(latest[0].stale);
    }

    #[tokio::test]
    async fn latest_at_or_before_filters_by_key_and_time() {
        let store = SqliteTimeSeriesStore::in_memory().await.unwrap();
        store
            .append(&[
                point(ExchangeId::Binance, Metric::EquityUsdt, t0(), "1000"),
                point(ExchangeId::Binance, Metric::ReturnPct24h, t0(), "9"),
                point(
                    ExchangeId::Binance,
                    Metric::EquityUsdt,
                    t0() + Duration::hours(1),
                    "1010",
                ),
                point(
                    ExchangeId::Htx,
                    Metric::EquityUsdt,
                    t0() + Duration::minutes(30),
                    "7",
                ),
            ])
            .await
            .unwrap();

        let found = store
            .latest_at_or_before(
                ExchangeId::Binance,
                Metric::EquityUsdt,
                t0() + Duration::minutes(59),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.value, Decimal::from(1000));

        let exact = store
            .latest_at_or_before(
                ExchangeId::Binance,
                Metric::EquityUsdt,
                t0() + Duration::hours(1),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exact.value, Decimal::from(1010));

        let none = store
            .latest_at_or_before(
                ExchangeId::Htx,
                Metric::EquityUsdt,
                t0() + Duration::minutes(29),
            )
            .await
            .unwrap();
        assert!(none.is_none());

        let newest_first = store
            .latest(ExchangeId::Binance, Metric::EquityUsdt, 1)
            .await
            .unwrap();
        assert_eq!(newest_first[0].timestamp, t0() + Duration::hours(1));
    }
}
