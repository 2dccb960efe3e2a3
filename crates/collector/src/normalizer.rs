use std::collections::HashMap;
use std::fmt::{self, Display};

use chrono::{DateTime, Duration, Utc};
use interface::{Asset, Balance, ConversionRate, ExchangeId};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

/// 환율을 구하지 못해 합계에서 제외된 이유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// 한 번도 환율을 받은 적 없음
    NeverObserved,
    /// 마지막 환율이 staleness 창을 넘김
    StaleExpired,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NeverObserved => write!(f, "no rate ever observed"),
            DropReason::StaleExpired => write!(f, "last known rate expired"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAmount {
    pub asset: Asset,
    pub amount: Decimal,
    pub rate: Decimal,
    pub rate_as_of: DateTime<Utc>,
    pub value_usdt: Decimal,
    /// 이전 사이클 환율을 재사용함
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DroppedAsset {
    pub asset: Asset,
    pub amount: Decimal,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub amounts: Vec<NormalizedAmount>,
    pub dropped: Vec<DroppedAsset>,
}

impl Normalized {
    pub fn total_usdt(&self) -> Decimal {
        self.amounts.iter().map(|a| a.value_usdt).sum()
    }

    pub fn is_stale(&self) -> bool {
        self.amounts.iter().any(|a| a.stale)
    }

    pub fn dropped_assets(&self) -> Vec<Asset> {
        self.dropped.iter().map(|d| d.asset.clone()).collect()
    }
}

/// 잔고를 USDT 기준으로 환산. 거래소마다 하나씩, 마지막 환율 테이블을 직접 소유한다.
pub struct RateNormalizer {
    exchange: ExchangeId,
    max_staleness: Duration,
    last_known: HashMap<Asset, ConversionRate>,
}

impl RateNormalizer {
    pub fn new(exchange: ExchangeId, max_staleness: Duration) -> Self {
        Self {
            exchange,
            max_staleness,
            last_known: HashMap::new(),
        }
    }

    pub fn last_known(&self, asset: &Asset) -> Option<&ConversionRate> {
        self.last_known.get(asset)
    }

    pub fn normalize(
        &mut self,
        balances: &[Balance],
        rates: &[ConversionRate],
        now: DateTime<Utc>,
    ) -> Normalized {
        let mut fresh: HashMap<&Asset, &ConversionRate> = HashMap::new();
        for rate in rates {
            if !rate.quote.is_usdt() {
                warn!(
                    "[{}] ignoring {}/{} rate: quote is not USDT",
                    self.exchange, rate.base, rate.quote
                );
                continue;
            }
            if rate.rate <= Decimal::ZERO {
                warn!(
                    "[{}] rejecting non-positive {} rate {}",
                    self.exchange, rate.base, rate.rate
                );
                continue;
            }
            fresh.insert(&rate.base, rate);
            self.last_known.insert(rate.base.clone(), rate.clone());
        }

        let mut normalized = Normalized::default();

        for balance in balances {
            if balance.asset.is_usdt() {
                normalized.amounts.push(NormalizedAmount {
                    asset: balance.asset.clone(),
                    amount: balance.amount,
                    rate: Decimal::ONE,
                    rate_as_of: now,
                    value_usdt: balance.amount,
                    stale: false,
                });
                continue;
            }

            if let Some(rate) = fresh.get(&balance.asset) {
                normalized.amounts.push(NormalizedAmount {
                    asset: balance.asset.clone(),
                    amount: balance.amount,
                    rate: rate.rate,
                    rate_as_of: rate.as_of,
                    value_usdt: balance.amount * rate.rate,
                    stale: false,
                });
                continue;
            }

            match self.last_known.get(&balance.asset) {
                Some(rate) if now - rate.as_of <= self.max_staleness => {
                    warn!(
                        "[{}] {} rate unavailable, reusing {} from {}",
                        self.exchange,
                        balance.asset,
                        rate.rate,
                        rate.as_of.to_rfc3339()
                    );
                    normalized.amounts.push(NormalizedAmount {
                        asset: balance.asset.clone(),
                        amount: balance.amount,
                        rate: rate.rate,
                        rate_as_of: rate.as_of,
                        value_usdt: balance.amount * rate.rate,
                        stale: true,
                    });
                }
                last => {
                    let reason = if last.is_some() {
                        DropReason::StaleExpired
                    } else {
                        DropReason::NeverObserved
                    };
                    warn!(
                        "[{}] dropping {} {} from equity: {}",
                        self.exchange, balance.amount, balance.asset, reason
                    );
                    normalized.dropped.push(DroppedAsset {
                        asset: balance.asset.clone(),
                        amount: balance.amount,
                        reason,
                    });
                }
            }
        }

        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn balance(asset: &str, amount: &str, at: DateTime<Utc>) -> Balance {
        Balance {
            exchange: ExchangeId::Binance,
            asset: Asset::new(asset),
            amount: dec(amount),
            as_of: at,
        }
    }

    fn rate(asset: &str, value: &str, at: DateTime<Utc>) -> ConversionRate {
        ConversionRate::to_usdt(Asset::new(asset), dec(value), at)
    }

    fn normalizer() -> RateNormalizer {
        RateNormalizer::new(ExchangeId::Binance, Duration::minutes(15))
    }

    #[test]
    fn converts_usdc_and_keeps_usdt() {
        let now = Utc::now();
        let mut n = normalizer();
        let out = n.normalize(
            &[balance("USDC", "1000", now), balance("USDT", "500", now)],
            &[rate("USDC", "0.999", now)],
            now,
        );

        assert_eq!(out.total_usdt(), dec("1499.0"));
        assert!(!out.is_stale());
        assert!(out.dropped.is_empty());

        let usdt = out.amounts.iter().find(|a| a.asset.is_usdt()).unwrap();
        assert_eq!(usdt.value_usdt, dec("500"));
        assert_eq!(usdt.rate, Decimal::ONE);
    }

    #[test]
    fn usdt_identity_ignores_any_quoted_usdt_rate() {
        let now = Utc::now();
        let mut n = normalizer();
        let out = n.normalize(
            &[balance("USDT", "123.456789", now)],
            &[rate("USDT", "1.02", now)],
            now,
        );
        assert_eq!(out.total_usdt(), dec("123.456789"));
    }

    #[test]
    fn missing_rate_reuses_last_known_and_marks_stale() {
        let t0 = Utc::now();
        let mut n = normalizer();
        n.normalize(&[balance("USDC", "1000", t0)], &[rate("USDC", "0.998", t0)], t0);

        let t1 = t0 + Duration::minutes(10);
        let out = n.normalize(&[balance("USDC", "1000", t1)], &[], t1);

        assert_eq!(out.total_usdt(), dec("998"));
        assert!(out.is_stale());
        assert!(out.dropped.is_empty());
    }

    #[test]
    fn expired_rate_drops_the_asset() {
        let t0 = Utc::now();
        let mut n = normalizer();
        n.normalize(&[], &[rate("USDC", "0.998", t0)], t0);

        let t1 = t0 + Duration::minutes(16);
        let out = n.normalize(
            &[balance("USDC", "1000", t1), balance("USDT", "5", t1)],
            &[],
            t1,
        );

        assert_eq!(out.total_usdt(), dec("5"));
        assert_eq!(out.dropped.len(), 1);
        assert_eq!(out.dropped[0].reason, DropReason::StaleExpired);
        assert_eq!(out.dropped_assets(), vec![Asset::new("USDC")]);
    }

    #[test]
    fn never_observed_rate_drops_the_asset() {
        let now = Utc::now();
        let mut n = normalizer();
        let out = n.normalize(&[balance("FDUSD", "42", now)], &[], now);

        assert_eq!(out.total_usdt(), Decimal::ZERO);
        assert_eq!(out.dropped[0].reason, DropReason::NeverObserved);
        assert!(!out.is_stale());
    }

    #[test]
    fn non_positive_rate_is_treated_as_missing() {
        let t0 = Utc::now();
        let mut n = normalizer();
        n.normalize(&[], &[rate("USDC", "0.9997", t0)], t0);

        let out = n.normalize(
            &[balance("USDC", "100", t0)],
            &[rate("USDC", "0", t0)],
            t0,
        );
        assert_eq!(out.total_usdt(), dec("99.97"));
        assert!(out.is_stale());
        assert_eq!(n.last_known(&Asset::new("USDC")).unwrap().rate, dec("0.9997"));
    }

    #[test]
    fn no_drift_over_many_cycles() {
        let start = Utc::now();
        let mut n = normalizer();
        let mut running = Decimal::ZERO;

        for i in 0..10_000i64 {
            let at = start + Duration::seconds(30 * i);
            let usdc_rate = if i % 2 == 0 { "0.9991" } else { "1.0003" };
            let out = n.normalize(
                &[
                    balance("USDC", "1000.123456", at),
                    balance("FDUSD", "333.333333", at),
                    balance("USDT", "0.000001", at),
                ],
                &[rate("USDC", usdc_rate, at), rate("FDUSD", "0.9999", at)],
                at,
            );

            let expected = dec("1000.123456") * dec(usdc_rate)
                + dec("333.333333") * dec("0.9999")
                + dec("0.000001");
            assert_eq!(out.total_usdt(), expected);
            running += out.total_usdt();
        }

        let even = dec("1000.123456") * dec("0.9991");
        let odd = dec("1000.123456") * dec("1.0003");
        let rest = dec("333.333333") * dec("0.9999") + dec("0.000001");
        assert_eq!(running, (even + odd) * Decimal::from(5_000) + rest * Decimal::from(10_000));
    }
}
