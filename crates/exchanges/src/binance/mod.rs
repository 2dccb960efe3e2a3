use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use interface::{ExchangeError, ExchangeId, Snapshot};

use crate::response::truncate;
use crate::{ClientOptions, SnapshotExchange};

pub mod asset;
pub mod ticker;

pub const BASE_URL: &str = "https://api.binance.com";

/// Binance 요청 서명 (HMAC-SHA256, hex)
pub fn generate_signature(query_string: &str, secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(query_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// 현재 시각 (ms)
pub fn get_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

/// 인증 실패로 취급하는 Binance 에러 코드
/// -1022 서명 불일치, -2008 잘못된 API key id, -2014 key 형식 오류, -2015 key/IP/권한 오류
const AUTH_ERROR_CODES: &[i64] = &[-1022, -2008, -2014, -2015];

#[derive(Debug, Deserialize)]
struct BinanceErrorBody {
    code: i64,
    msg: String,
}

/// 실패 응답을 에러 분류 체계로 변환
pub(crate) fn classify_error(status: StatusCode, body: &str) -> ExchangeError {
    let parsed = serde_json::from_str::<BinanceErrorBody>(body).ok();

    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return ExchangeError::RateLimited(format!("status {}: {}", status, truncate(body)));
    }

    if status == StatusCode::UNAUTHORIZED
        || parsed
            .as_ref()
            .is_some_and(|e| AUTH_ERROR_CODES.contains(&e.code))
    {
        let msg = parsed
            .map(|e| format!("{} ({})", e.msg, e.code))
            .unwrap_or_else(|| truncate(body));
        return ExchangeError::Auth(msg);
    }

    // -1021: recvWindow 밖의 timestamp (시계 오차), 다음 시도에서 회복 가능
    if let Some(e) = parsed.as_ref().filter(|e| e.code == -1021) {
        return ExchangeError::Other(format!("clock skew: {} ({})", e.msg, e.code));
    }

    ExchangeError::Api {
        status: status.as_u16(),
        message: truncate(body),
    }
}

/// Binance Spot REST 클라이언트
pub struct BinanceClient {
    pub http: reqwest::Client,
    pub options: ClientOptions,
}

impl BinanceClient {
    pub fn new(options: ClientOptions) -> Result<Self, ExchangeError> {
        let http = options.http_client()?;
        Ok(Self { http, options })
    }

    pub(crate) fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.options.base_url.trim_end_matches('/'), endpoint)
    }
}

#[async_trait]
impl SnapshotExchange for BinanceClient {
    fn id(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    async fn fetch_snapshot(&self) -> Result<Snapshot, ExchangeError> {
        // 잔고와 티커를 동시에 조회해서 시점 차이를 줄인다
        let (balances, rates) = tokio::join!(self.fetch_balances(), self.fetch_rates());
        let balances = balances?;

        debug!(
            "binance snapshot: {} balances, {} rates",
            balances.len(),
            rates.len()
        );

        Ok(Snapshot {
            exchange: ExchangeId::Binance,
            balances,
            rates,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use interface::TrackedAsset;
    use rust_decimal::Decimal;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn options(base_url: String) -> ClientOptions {
        ClientOptions {
            base_url,
            api_key: Some("test-key".to_string()),
            api_secret: Some("test-secret".to_string()),
            tracked: vec![
                TrackedAsset::usdt(),
                TrackedAsset::direct("USDC", "USDCUSDT"),
                TrackedAsset::direct("FDUSD", "FDUSDUSDT"),
            ],
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn signature_matches_documented_example() {
        // Binance API 문서의 예제 값
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            generate_signature(query, secret),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn classifies_error_responses() {
        let auth = classify_error(
            StatusCode::UNAUTHORIZED,
            r#"{"code":-2015,"msg":"Invalid API-key, IP, or permissions for action."}"#,
        );
        assert!(matches!(auth, ExchangeError::Auth(_)));

        let auth = classify_error(
            StatusCode::BAD_REQUEST,
            r#"{"code":-1022,"msg":"Signature for this request is not valid."}"#,
        );
        assert!(auth.is_fatal());

        let limited = classify_error(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(limited, ExchangeError::RateLimited(_)));

        let skew = classify_error(
            StatusCode::BAD_REQUEST,
            r#"{"code":-1021,"msg":"Timestamp for this request is outside of the recvWindow."}"#,
        );
        assert!(skew.is_transient());

        let server = classify_error(StatusCode::BAD_GATEWAY, "<html>");
        assert!(server.is_transient());
    }

    #[tokio::test]
    async fn snapshot_combines_balances_and_rates() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v3/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "balances": [
                    { "asset": "USDT", "free": "400.00000000", "locked": "100.00000000" },
                    { "asset": "USDC", "free": "1000.00000000", "locked": "0.00000000" },
                    { "asset": "BNB", "free": "0.01000000", "locked": "0.00000000" },
                    { "asset": "FDUSD", "free": "0.00000000", "locked": "0.00000000" }
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "USDCUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "USDCUSDT", "price": "0.99900000"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "FDUSDUSDT"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = BinanceClient::new(options(server.uri())).unwrap();
        let snapshot = client.fetch_snapshot().await.unwrap();

        assert_eq!(snapshot.exchange, ExchangeId::Binance);
        // 추적 대상이 아니거나 잔고가 0인 자산은 제외
        assert_eq!(snapshot.balances.len(), 2);
        let usdt = snapshot
            .balances
            .iter()
            .find(|b| b.asset.is_usdt())
            .unwrap();
        assert_eq!(usdt.amount, Decimal::new(500, 0));

        // FDUSD 티커 실패는 스냅샷 실패가 아니라 환율 누락
        assert_eq!(snapshot.rates.len(), 1);
        assert_eq!(snapshot.rates[0].base.as_str(), "USDC");
        assert_eq!(snapshot.rates[0].rate, Decimal::new(999, 3));
    }

    #[tokio::test]
    async fn invalid_key_surfaces_as_auth_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v3/account"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "code": -2015, "msg": "Invalid API-key, IP, or permissions for action."
            })))
            .mount(&server)
            .await;

        let client = BinanceClient::new(options(server.uri())).unwrap();
        let err = client.fetch_snapshot().await.unwrap_err();
        assert!(err.is_fatal(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn missing_credentials_are_fatal() {
        let mut opts = options("http://127.0.0.1:9".to_string());
        opts.api_secret = None;

        let client = BinanceClient::new(opts).unwrap();
        let err = client.fetch_balances().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Credentials(_)));
    }
}
