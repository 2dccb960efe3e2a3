use std::collections::BTreeMap;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use interface::{Asset, Balance, ExchangeError, ExchangeId};

use super::HtxClient;
use crate::response::parse_decimal;

#[derive(Debug, Deserialize)]
struct HtxBalanceData {
    list: Vec<HtxBalanceItem>,
}

#[derive(Debug, Deserialize)]
struct HtxBalanceItem {
    currency: String,
    /// trade(사용 가능), frozen(주문 중), 그 외 loan/interest 등
    #[serde(rename = "type")]
    kind: String,
    balance: String,
}

impl HtxClient {
    /// spot 계정의 추적 자산 잔고 조회 (trade + frozen)
    pub async fn fetch_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        let account_id = self.spot_account_id().await?;
        let path = format!("/v1/account/accounts/{}/balance", account_id);

        let (data, _) = self
            .signed_get::<HtxBalanceData>(&path)
            .await?
            .into_result()?;
        let data = data
            .ok_or_else(|| ExchangeError::Decode("HTX balance without data".to_string()))?;

        let mut totals: BTreeMap<Asset, Decimal> = BTreeMap::new();
        for item in data.list {
            if !matches!(item.kind.as_str(), "trade" | "frozen") {
                continue;
            }
            if !self.options.is_tracked(&item.currency) {
                continue;
            }
            *totals.entry(Asset::new(&item.currency)).or_default() += parse_decimal(&item.balance)?;
        }

        let now = Utc::now();
        let balances = totals
            .into_iter()
            .filter(|(_, amount)| *amount > Decimal::ZERO)
            .map(|(asset, amount)| {
                debug!("htx {}: {}", asset, amount);
                Balance {
                    exchange: ExchangeId::Htx,
                    asset,
                    amount,
                    as_of: now,
                }
            })
            .collect();

        Ok(balances)
    }
}
