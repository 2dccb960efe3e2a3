use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use interface::{Asset, ExchangeId};
use rust_decimal::Decimal;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::cache::{LatestPointCache, LatestSnapshot};
use crate::status::{CollectorStatus, StatusBoard};

#[derive(Clone)]
pub struct ApiState {
    pub cache: Arc<dyn LatestPointCache>,
    pub status: Arc<StatusBoard>,
}

/// 대시보드 응답 (원본 정밀도 값 + 소수점 2자리 표시값)
#[derive(Debug, Serialize)]
pub struct LatestView {
    pub exchange: ExchangeId,
    pub timestamp: DateTime<Utc>,
    pub equity_usdt: Decimal,
    pub display: Decimal,
    pub return_pct_24h: Option<Decimal>,
    pub return_display: Option<Decimal>,
    pub stale: bool,
    pub dropped: Vec<Asset>,
}

impl From<LatestSnapshot> for LatestView {
    fn from(s: LatestSnapshot) -> Self {
        Self {
            exchange: s.exchange,
            timestamp: s.timestamp,
            display: s.equity_usdt.round_dp(2),
            equity_usdt: s.equity_usdt,
            return_display: s.return_pct_24h.map(|r| r.round_dp(2)),
            return_pct_24h: s.return_pct_24h,
            stale: s.stale,
            dropped: s.dropped,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/latest", get(latest_all))
        .route("/latest/:exchange", get(latest_one))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// 거래소별 단계, 인증 상태, 사이클 누적 결과
async fn status(State(state): State<ApiState>) -> Json<CollectorStatus> {
    Json(state.status.snapshot())
}

async fn latest_all(State(state): State<ApiState>) -> Json<Vec<LatestView>> {
    let views = state
        .cache
        .all()
        .await
        .into_iter()
        .map(LatestView::from)
        .collect();
    Json(views)
}

async fn latest_one(State(state): State<ApiState>, Path(exchange): Path<String>) -> Response {
    let id: ExchangeId = match exchange.parse() {
        Ok(id) => id,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": e })))
                .into_response()
        }
    };

    match state.cache.get(id).await {
        Some(snapshot) => Json(LatestView::from(snapshot)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("no data for {} yet", id) })),
        )
            .into_response(),
    }
}

/// 조회 API 서버 실행 (shutdown 완료 시 종료)
pub async fn start_server<F>(
    port: u16,
    cache: Arc<dyn LatestPointCache>,
    status: Arc<StatusBoard>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(ApiState { cache, status });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Read API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::cache::MemoryLatestCache;
    use crate::pipeline::{CycleOutcome, CycleReport, PipelineMonitor};

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn app_with_binance() -> Router {
        let cache = Arc::new(MemoryLatestCache::new());
        cache
            .put(LatestSnapshot {
                exchange: ExchangeId::Binance,
                timestamp: Utc::now(),
                equity_usdt: "1499.004999".parse().unwrap(),
                return_pct_24h: None,
                stale: true,
                dropped: vec![Asset::new("FDUSD")],
            })
            .await
            .unwrap();
        let status = Arc::new(StatusBoard::new(vec![
            (ExchangeId::Binance, PipelineMonitor::default()),
            (ExchangeId::Htx, PipelineMonitor::default()),
        ]));
        status.record(&CycleReport {
            cycle: 4,
            exchange: ExchangeId::Htx,
            outcome: CycleOutcome::Abandoned,
        });
        router(ApiState { cache, status })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, body) = get_json(app_with_binance().await, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn status_lists_every_exchange() {
        let (status, body) = get_json(app_with_binance().await, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["exchanges_active"], 2);
        assert_eq!(body["collections_failed"], 1);

        let exchanges = body["exchanges"].as_array().unwrap();
        assert_eq!(exchanges.len(), 2);
        assert_eq!(exchanges[0]["exchange"], "binance");
        assert_eq!(exchanges[0]["stage"], "idle");
        assert_eq!(exchanges[0]["degraded"], false);
        assert!(exchanges[0]["last_persisted_at"].is_null());
        assert_eq!(exchanges[1]["exchange"], "htx");
        assert_eq!(exchanges[1]["cycles_abandoned"], 1);
        assert_eq!(exchanges[1]["last_error"], "cycle 4 abandoned");
    }

    #[tokio::test]
    async fn latest_serves_display_value_and_null_return() {
        let (status, body) = get_json(app_with_binance().await, "/latest/binance").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["exchange"], "binance");
        assert_eq!(body["equity_usdt"], "1499.004999");
        assert_eq!(body["display"], "1499.00");
        assert!(body["return_pct_24h"].is_null());
        assert_eq!(body["stale"], true);
        assert_eq!(body["dropped"][0], "FDUSD");

        let (status, body) = get_json(app_with_binance().await, "/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_or_empty_exchange() {
        let (status, _) = get_json(app_with_binance().await, "/latest/htx").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get_json(app_with_binance().await, "/latest/okx").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
