pub mod entities;
pub mod interfaces;
pub mod sqlite;

use std::sync::Arc;

pub use interfaces::{RecordError, SeriesPoint, TimeSeriesStore};
pub use sqlite::SqliteTimeSeriesStore;

/// DB 경로로 공유 저장소 생성 (스케줄러, 조회 명령이 같은 핸들을 나눠 쓴다)
pub async fn open_store(db_path: &str) -> Result<Arc<dyn TimeSeriesStore>, RecordError> {
    let store: Arc<dyn TimeSeriesStore> = Arc::new(SqliteTimeSeriesStore::new(db_path).await?);
    Ok(store)
}
