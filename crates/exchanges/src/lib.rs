use std::time::Duration;

use async_trait::async_trait;

use interface::{ExchangeError, ExchangeId, Snapshot, TrackedAsset};

pub mod binance;
pub mod htx;
mod response;

/// 거래소별 잔고/환율 스냅샷 조회 인터페이스.
#[async_trait]
pub trait SnapshotExchange: Send + Sync {
    fn id(&self) -> ExchangeId;

    /// 추적 자산의 잔고와 USDT 환산 환율을 함께 가져온다.
    /// 환율 조회 실패는 해당 환율만 빠지고, 잔고 조회 실패는 전체 에러가 된다.
    async fn fetch_snapshot(&self) -> Result<Snapshot, ExchangeError>;
}

/// 어댑터 생성 옵션
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub tracked: Vec<TrackedAsset>,
    /// 요청 하나당 타임아웃
    pub timeout: Duration,
}

impl ClientOptions {
    pub(crate) fn credentials(&self) -> Result<(&str, &str), ExchangeError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ExchangeError::Credentials("API key not set".to_string()))?;
        let api_secret = self
            .api_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ExchangeError::Credentials("API secret not set".to_string()))?;
        Ok((api_key, api_secret))
    }

    pub(crate) fn is_tracked(&self, currency: &str) -> bool {
        self.tracked
            .iter()
            .any(|t| t.asset.as_str().eq_ignore_ascii_case(currency))
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client, ExchangeError> {
        Ok(reqwest::Client::builder().timeout(self.timeout).build()?)
    }
}

// Convenience re-exports
pub use binance::BinanceClient;
pub use htx::HtxClient;
