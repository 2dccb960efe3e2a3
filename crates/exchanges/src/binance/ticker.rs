use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use interface::{ConversionRate, ExchangeError};

use super::{classify_error, BinanceClient};
use crate::response::{map_send_error, parse_decimal, rate_from_price};

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: String,
}

impl BinanceClient {
    /// 심볼 현재가 조회 (GET /api/v3/ticker/price, 인증 불필요)
    pub async fn fetch_ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let response = self
            .http
            .get(self.url("/api/v3/ticker/price"))
            .query(&[("symbol", symbol)])
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

        let parsed: PriceResponse = serde_json::from_str(&response_text)
            .map_err(|e| ExchangeError::Decode(format!("Failed to parse price: {}", e)))?;

        parse_decimal(&parsed.price)
    }

    /// 추적 자산의 USDT 환율을 모두 조회. 실패한 페어는 경고만 남기고 제외한다.
    pub async fn fetch_rates(&self) -> Vec<ConversionRate> {
        let pairs: Vec<_> = self
            .options
            .tracked
            .iter()
            .filter_map(|t| t.pair.as_deref().map(|pair| (t, pair)))
            .collect();

        let prices = join_all(
            pairs
                .iter()
                .map(|(_, pair)| self.fetch_ticker_price(pair)),
        )
        .await;

        let now = Utc::now();
        let mut rates = Vec::with_capacity(pairs.len());

        for ((tracked, pair), price) in pairs.into_iter().zip(prices) {
            match price.and_then(|p| rate_from_price(tracked, p, now)) {
                Ok(rate) => rates.push(rate),
                Err(e) => warn!("binance ticker {} unavailable: {}", pair, e),
            }
        }

        rates
    }
}
