use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::warn;

use interface::{ConversionRate, ExchangeError};

use super::HtxClient;
use crate::response::{decimal_from_json, rate_from_price};

impl HtxClient {
    /// 병합 시세의 종가 조회 (GET /market/detail/merged, 심볼은 소문자)
    pub async fn fetch_ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let mut url = self.public_url("/market/detail/merged")?;
        url.query_pairs_mut()
            .append_pair("symbol", &symbol.to_ascii_lowercase());

        let (_, tick) = self
            .get_envelope::<serde_json::Value>(url)
            .await?
            .into_result()?;

        let close = tick
            .as_ref()
            .and_then(|t| t.get("close"))
            .ok_or_else(|| ExchangeError::Decode(format!("HTX ticker {} without close", symbol)))?;

        decimal_from_json(close)
    }

    /// 추적 자산의 USDT 환율 조회. 실패한 페어는 제외된다.
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
                Err(e) => warn!("htx ticker {} unavailable: {}", pair, e),
            }
        }

        rates
    }
}
