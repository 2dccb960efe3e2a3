use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use interface::{Asset, Balance, ExchangeError, ExchangeId};

use super::{classify_error, generate_signature, get_timestamp, BinanceClient};
use crate::response::{map_send_error, parse_decimal, truncate};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceAccountResponse {
    balances: Vec<BinanceBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceBalance {
    asset: String,
    free: String,   // 사용 가능한 잔액
    locked: String, // 주문에 사용 중인 잔액
}

impl BinanceClient {
    /// 현물 계정의 추적 자산 잔고 조회 (GET /api/v3/account)
    pub async fn fetch_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        let (api_key, api_secret) = self.options.credentials()?;

        let endpoint = "/api/v3/account";
        let timestamp = get_timestamp();
        let query_string = format!(
            "omitZeroBalances=true&timestamp={}&recvWindow=5000",
            timestamp
        );
        let signature = generate_signature(&query_string, api_secret);
        let url = format!(
            "{}?{}&signature={}",
            self.url(endpoint),
            query_string,
            signature
        );

        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.options.timeout))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| map_send_error(e, self.options.timeout))?;

        if !status.is_success() {
            return Err(classify_error(status, &response_text));
        }

        let account: BinanceAccountResponse =
            serde_json::from_str(&response_text).map_err(|e| {
                ExchangeError::Decode(format!(
                    "Failed to parse Binance account: {}, response: {}",
                    e,
                    truncate(&response_text)
                ))
            })?;

        let now = Utc::now();
        let mut balances = Vec::new();

        for balance in account.balances {
            if !self.options.is_tracked(&balance.asset) {
                continue;
            }

            let amount = parse_decimal(&balance.free)? + parse_decimal(&balance.locked)?;
            if amount <= Decimal::ZERO {
                continue;
            }

            debug!("binance {}: {}", balance.asset, amount);
            balances.push(Balance {
                exchange: ExchangeId::Binance,
                asset: Asset::new(&balance.asset),
                amount,
                as_of: now,
            });
        }

        Ok(balances)
    }
}
