use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use interface::{ExchangeError, ExchangeId, Snapshot};

use crate::response::{map_send_error, truncate};
use crate::{ClientOptions, SnapshotExchange};

pub mod asset;
pub mod ticker;

pub const BASE_URL: &str = "https://api.huobi.pro";

/// HTX 서명 v2 (HMAC-SHA256, base64)
pub fn generate_signature(payload: &str, secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// 서명용 타임스탬프 (UTC, 초 단위, 타임존 표기 없음)
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// HTX 공통 응답 봉투
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    status: String,
    #[serde(rename = "err-code")]
    err_code: Option<String>,
    #[serde(rename = "err-msg")]
    err_msg: Option<String>,
    data: Option<T>,
    tick: Option<T>,
}

impl<T> Envelope<T> {
    /// status가 ok가 아니면 에러 코드로 분류
    pub(crate) fn into_result(self) -> Result<(Option<T>, Option<T>), ExchangeError> {
        if self.status == "ok" {
            return Ok((self.data, self.tick));
        }

        let code = self.err_code.unwrap_or_default();
        let msg = self.err_msg.unwrap_or_default();
        Err(classify_err_code(&code, &msg))
    }
}

pub(crate) fn classify_err_code(code: &str, msg: &str) -> ExchangeError {
    let detail = format!("{}: {}", code, msg);

    if code.contains("signature")
        || code.contains("access-key")
        || code.contains("login-required")
        || code == "forbidden"
    {
        ExchangeError::Auth(detail)
    } else if code.contains("too-many") || code.contains("limit") {
        ExchangeError::RateLimited(detail)
    } else {
        ExchangeError::Other(detail)
    }
}

fn classify_status(status: StatusCode, body: &str) -> ExchangeError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExchangeError::Auth(truncate(body)),
        StatusCode::TOO_MANY_REQUESTS => ExchangeError::RateLimited(truncate(body)),
        _ => ExchangeError::Api {
            status: status.as_u16(),
            message: truncate(body),
        },
    }
}

/// HTX Spot REST 클라이언트
pub struct HtxClient {
    pub http: reqwest::Client,
    pub options: ClientOptions,
    /// spot 계정 ID (최초 조회 후 재사용)
    account_id: OnceCell<u64>,
}

impl HtxClient {
    pub fn new(options: ClientOptions) -> Result<Self, ExchangeError> {
        let http = options.http_client()?;
        Ok(Self {
            http,
            options,
            account_id: OnceCell::new(),
        })
    }

    fn base_url(&self) -> &str {
        self.options.base_url.trim_end_matches('/')
    }

    pub(crate) fn public_url(&self, path: &str) -> Result<Url, ExchangeError> {
        Url::parse(&format!("{}{}", self.base_url(), path))
            .map_err(|e| ExchangeError::Other(format!("invalid url: {}", e)))
    }

    /// 인증 파라미터를 정렬/인코딩해 서명한 URL을 만든다
    pub(crate) fn signed_url(
        &self,
        method: &str,
        path: &str,
        at: DateTime<Utc>,
    ) -> Result<Url, ExchangeError> {
        let (api_key, api_secret) = self.options.credentials()?;

        let mut params = BTreeMap::new();
        params.insert("AccessKeyId", api_key.to_string());
        params.insert("SignatureMethod", "HmacSHA256".to_string());
        params.insert("SignatureVersion", "2".to_string());
        params.insert("Timestamp", format_timestamp(at));

        let mut url = self.public_url(path)?;
        url.query_pairs_mut().extend_pairs(params.iter());

        let host = url
            .host_str()
            .ok_or_else(|| ExchangeError::Other("url without host".to_string()))?
            .to_ascii_lowercase();
        let payload = format!(
            "{}\n{}\n{}\n{}",
            method,
            host,
            path,
            url.query().unwrap_or_default()
        );
        let signature = generate_signature(&payload, api_secret);
        url.query_pairs_mut().append_pair("Signature", &signature);

        Ok(url)
    }

    /// 서명된 GET 요청을 보내고 응답 봉투를 파싱
    pub(crate) async fn signed_get<T>(&self, path: &str) -> Result<Envelope<T>, ExchangeError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = self.signed_url("GET", path, Utc::now())?;
        self.get_envelope(url).await
    }

    pub(crate) async fn get_envelope<T>(&self, url: Url) -> Result<Envelope<T>, ExchangeError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.options.timeout))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| map_send_error(e, self.options.timeout))?;

        if !status.is_success() {
            return Err(classify_status(status, &response_text));
        }

        serde_json::from_str(&response_text).map_err(|e| {
            ExchangeError::Decode(format!(
                "Failed to parse HTX response: {}, response: {}",
                e,
                truncate(&response_text)
            ))
        })
    }

    /// spot 계정 ID 조회 (GET /v1/account/accounts)
    pub async fn spot_account_id(&self) -> Result<u64, ExchangeError> {
        self.account_id
            .get_or_try_init(|| async {
                #[derive(Debug, Deserialize)]
                struct Account {
                    id: u64,
                    #[serde(rename = "type")]
                    kind: String,
                }

                let (data, _) = self
                    .signed_get::<Vec<Account>>("/v1/account/accounts")
                    .await?
                    .into_result()?;

                let id = data
                    .unwrap_or_default()
                    .into_iter()
                    .find(|a| a.kind == "spot")
                    .map(|a| a.id)
                    .ok_or_else(|| ExchangeError::Other("HTX spot account not found".to_string()))?;

                info!("HTX spot account id: {}", id);
                Ok::<u64, ExchangeError>(id)
            })
            .await
            .copied()
    }
}

#[async_trait]
impl SnapshotExchange for HtxClient {
    fn id(&self) -> ExchangeId {
        ExchangeId::Htx
    }

    async fn fetch_snapshot(&self) -> Result<Snapshot, ExchangeError> {
        let (balances, rates) = tokio::join!(self.fetch_balances(), self.fetch_rates());
        let balances = balances?;

        debug!(
            "htx snapshot: {} balances, {} rates",
            balances.len(),
            rates.len()
        );

        Ok(Snapshot {
            exchange: ExchangeId::Htx,
            balances,
            rates,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use interface::TrackedAsset;
    use rust_decimal::Decimal;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn options(base_url: String) -> ClientOptions {
        ClientOptions {
            base_url,
            api_key: Some("e2xxxxxx-99xxxxxx-84xxxxxx-7xxxx".to_string()),
            api_secret: Some("b0xxxxxx-c6xxxxxx-94xxxxxx-dxxxx".to_string()),
            tracked: vec![
                TrackedAsset::usdt(),
                TrackedAsset::direct("USDC", "usdcusdt"),
                TrackedAsset::direct("FDUSD", "fdusdusdt"),
            ],
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn signed_url_orders_and_encodes_params() {
        let client = HtxClient::new(options(BASE_URL.to_string())).unwrap();
        let at = Utc.with_ymd_and_hms(2017, 5, 11, 15, 19, 30).unwrap();
        let url = client.signed_url("GET", "/v1/order/orders", at).unwrap();

        let query = url.query().unwrap();
        assert!(query.starts_with(
            "AccessKeyId=e2xxxxxx-99xxxxxx-84xxxxxx-7xxxx&SignatureMethod=HmacSHA256&SignatureVersion=2&Timestamp=2017-05-11T15%3A19%3A30&Signature="
        ));

        let expected = generate_signature(
            "GET\napi.huobi.pro\n/v1/order/orders\nAccessKeyId=e2xxxxxx-99xxxxxx-84xxxxxx-7xxxx&SignatureMethod=HmacSHA256&SignatureVersion=2&Timestamp=2017-05-11T15%3A19%3A30",
            "b0xxxxxx-c6xxxxxx-94xxxxxx-dxxxx",
        );
        let signature = url
            .query_pairs()
            .find(|(k, _)| k == "Signature")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(signature, expected);
        // SHA-256 digest의 base64 길이
        assert_eq!(signature.len(), 44);
    }

    #[test]
    fn classifies_err_codes() {
        assert!(classify_err_code("api-signature-not-valid", "").is_fatal());
        assert!(classify_err_code("login-required", "").is_fatal());
        assert!(matches!(
            classify_err_code("too-many-request", ""),
            ExchangeError::RateLimited(_)
        ));
        assert!(classify_err_code("base-system-error", "").is_transient());
    }

    #[tokio::test]
    async fn snapshot_sums_trade_and_frozen() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/account/accounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "data": [
                    { "id": 1001, "type": "margin", "state": "working" },
                    { "id": 2002, "type": "spot", "state": "working" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/account/accounts/2002/balance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "data": {
                    "id": 2002,
                    "type": "spot",
                    "state": "working",
                    "list": [
                        { "currency": "usdt", "type": "trade", "balance": "450.5" },
                        { "currency": "usdt", "type": "frozen", "balance": "49.5" },
                        { "currency": "usdc", "type": "trade", "balance": "1000" },
                        { "currency": "usdc", "type": "loan", "balance": "-5" },
                        { "currency": "btc", "type": "trade", "balance": "0.1" },
                        { "currency": "fdusd", "type": "trade", "balance": "0" }
                    ]
                }
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/market/detail/merged"))
            .and(query_param("symbol", "usdcusdt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "tick": { "close": 0.9995, "open": 0.9991 }
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/market/detail/merged"))
            .and(query_param("symbol", "fdusdusdt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "error",
                "err-code": "invalid-parameter",
                "err-msg": "invalid symbol"
            })))
            .mount(&server)
            .await;

        let client = HtxClient::new(options(server.uri())).unwrap();

        for _ in 0..2 {
            let snapshot = client.fetch_snapshot().await.unwrap();
            assert_eq!(snapshot.exchange, ExchangeId::Htx);
            assert_eq!(snapshot.balances.len(), 2);

            let usdt = snapshot
                .balances
                .iter()
                .find(|b| b.asset.is_usdt())
                .unwrap();
            assert_eq!(usdt.amount, Decimal::new(500, 0));

            let usdc = snapshot
                .balances
                .iter()
                .find(|b| b.asset.as_str() == "USDC")
                .unwrap();
            assert_eq!(usdc.amount, Decimal::new(1000, 0));

            assert_eq!(snapshot.rates.len(), 1);
            assert_eq!(snapshot.rates[0].rate, Decimal::new(9995, 4));
        }
    }

    #[tokio::test]
    async fn signature_rejection_is_auth_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/account/accounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "error",
                "err-code": "api-signature-not-valid",
                "err-msg": "Signature not valid"
            })))
            .mount(&server)
            .await;

        let client = HtxClient::new(options(server.uri())).unwrap();
        let err = client.fetch_balances().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Auth(_)), "unexpected: {err}");
    }
}
