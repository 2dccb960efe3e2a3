use std::fmt::{self, Display};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
    Htx,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 2] = [ExchangeId::Binance, ExchangeId::Htx];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Htx => "htx",
        }
    }
}

impl Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(ExchangeId::Binance),
            "htx" | "huobi" => Ok(ExchangeId::Htx),
            _ => Err(format!("Invalid ExchangeId: {}", s)),
        }
    }
}

/// 통화 코드 (항상 대문자로 정규화)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asset(String);

impl Asset {
    pub const USDT: &'static str = "USDT";

    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    pub fn usdt() -> Self {
        Self(Self::USDT.to_string())
    }

    pub fn is_usdt(&self) -> bool {
        self.0 == Self::USDT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Asset {
    fn from(code: &str) -> Self {
        Asset::new(code)
    }
}

/// 추적 대상 자산과 USDT 환산에 사용할 티커 심볼
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAsset {
    pub asset: Asset,
    /// 거래소 티커 심볼 (USDT 자신은 None)
    pub pair: Option<String>,
    /// true면 USDT가 base인 페어 (rate = 1 / price)
    pub inverse: bool,
}

impl TrackedAsset {
    pub fn usdt() -> Self {
        Self {
            asset: Asset::usdt(),
            pair: None,
            inverse: false,
        }
    }

    /// `{ASSET}USDT` 형태의 직접 페어
    pub fn direct(asset: impl AsRef<str>, pair: impl Into<String>) -> Self {
        Self {
            asset: Asset::new(asset),
            pair: Some(pair.into()),
            inverse: false,
        }
    }

    /// `USDT{ASSET}` 형태의 역방향 페어
    pub fn inverse(asset: impl AsRef<str>, pair: impl Into<String>) -> Self {
        Self {
            asset: Asset::new(asset),
            pair: Some(pair.into()),
            inverse: true,
        }
    }
}

/// 한 사이클에서 거래소 어댑터가 만든 잔고 (저장하지 않음)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub exchange: ExchangeId,
    pub asset: Asset,
    /// free + locked
    pub amount: Decimal,
    pub as_of: DateTime<Utc>,
}

/// base -> USDT 환율
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRate {
    pub base: Asset,
    pub quote: Asset,
    pub rate: Decimal,
    pub as_of: DateTime<Utc>,
}

impl ConversionRate {
    pub fn to_usdt(base: Asset, rate: Decimal, as_of: DateTime<Utc>) -> Self {
        Self {
            base,
            quote: Asset::usdt(),
            rate,
            as_of,
        }
    }

    pub fn identity(as_of: DateTime<Utc>) -> Self {
        Self::to_usdt(Asset::usdt(), Decimal::ONE, as_of)
    }
}

/// 잔고와 환율을 같은 시점 근처에서 함께 조회한 결과
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub exchange: ExchangeId,
    pub balances: Vec<Balance>,
    pub rates: Vec<ConversionRate>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub exchange: ExchangeId,
    pub timestamp: DateTime<Utc>,
    pub total_usdt: Decimal,
    /// 이전 사이클의 환율을 재사용한 경우
    pub stale: bool,
    /// 환율이 없어 합계에서 제외된 자산
    pub dropped: Vec<Asset>,
}

impl EquityPoint {
    /// 표시용 (소수점 2자리), 저장 정밀도는 건드리지 않는다
    pub fn display_value(&self) -> Decimal {
        self.total_usdt.round_dp(2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnMetric {
    pub exchange: ExchangeId,
    pub timestamp: DateTime<Utc>,
    pub pct_change_24h: Decimal,
    pub reference_timestamp: DateTime<Utc>,
    pub stale: bool,
}

impl ReturnMetric {
    pub fn display_value(&self) -> Decimal {
        self.pct_change_24h.round_dp(2)
    }
}

/// 시계열 저장소의 메트릭 이름
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "equity_usdt")]
    EquityUsdt,
    #[serde(rename = "return_pct_24h")]
    ReturnPct24h,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::EquityUsdt => "equity_usdt",
            Metric::ReturnPct24h => "return_pct_24h",
        }
    }
}

impl Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equity_usdt" => Ok(Metric::EquityUsdt),
            "return_pct_24h" => Ok(Metric::ReturnPct24h),
            _ => Err(format!("Invalid Metric: {}", s)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("missing credentials: {0}")]
    Credentials(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("api error: status {status}, response: {message}")]
    Api { status: u16, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("other error: {0}")]
    Other(String),
}

impl ExchangeError {
    /// 같은 사이클 안에서 재시도할 수 있는 오류인지
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::Http(_) | ExchangeError::Timeout(_) | ExchangeError::RateLimited(_) => {
                true
            }
            ExchangeError::Api { status, .. } => *status >= 500 || *status == 408,
            ExchangeError::Decode(_) | ExchangeError::Other(_) => true,
            ExchangeError::Auth(_) | ExchangeError::Credentials(_) => false,
        }
    }

    /// 설정이 바뀌기 전까지 다시 시도해도 소용없는 오류
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExchangeError::Auth(_) | ExchangeError::Credentials(_))
    }
}
