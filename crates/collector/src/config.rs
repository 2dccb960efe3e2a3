use std::env;
use std::time::Duration;

use exchanges::ClientOptions;
use interface::{Asset, ExchangeId, TrackedAsset};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("no exchange has credentials configured")]
    NoExchange,
}

/// 거래소 하나의 접속 정보와 추적 자산
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub id: ExchangeId,
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub tracked: Vec<TrackedAsset>,
}

impl ExchangeConfig {
    pub fn client_options(&self, timeout: Duration) -> ClientOptions {
        ClientOptions {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            api_secret: self.api_secret.clone(),
            tracked: self.tracked.clone(),
            timeout,
        }
    }

    fn has_credentials(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.api_key) && present(&self.api_secret)
    }
}

/// 수집기 전체 설정 (환경 변수에서 해석 후 검증된 값)
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// 사이클 주기
    pub interval: Duration,
    /// 거래소 요청 하나당 타임아웃
    pub fetch_timeout: Duration,
    /// 사이클 안에서 일시적 조회 실패 시 시도 횟수
    pub fetch_attempts: u32,
    /// 저장소 호출 하나당 타임아웃
    pub store_timeout: Duration,
    pub write_attempts: u32,
    /// 저장 재시도 기본 대기 (지수 증가)
    pub write_backoff: Duration,
    /// 마지막 환율 재사용 허용 시간
    pub rate_max_staleness: Duration,
    /// 인증 실패 후 재시도까지 대기
    pub auth_retry_after: Duration,
    /// 자격 증명이 있는 거래소만 포함
    pub exchanges: Vec<ExchangeConfig>,
    pub db_path: String,
    pub api_port: u16,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
            fetch_attempts: 2,
            store_timeout: Duration::from_secs(5),
            write_attempts: 3,
            write_backoff: Duration::from_millis(250),
            rate_max_staleness: Duration::from_secs(15 * 60),
            auth_retry_after: Duration::from_secs(10 * 60),
            exchanges: Vec::new(),
            db_path: "equity_series.db".to_string(),
            api_port: 12092,
        }
    }
}

const DEFAULT_TRACKED_ASSETS: &str = "USDT,USDC,FDUSD";
const DEFAULT_LOG_DIR: &str = "logs";
const MAX_RATE_STALENESS: Duration = Duration::from_secs(24 * 60 * 60);

impl CollectorConfig {
    /// 프로세스 환경 변수에서 설정 로드 (.env는 lib 로드 시 이미 반영됨)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let secs = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(key) {
                Some(v) => v
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::Invalid { key, value: v }),
                None => Ok(default),
            }
        };
        let millis = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(key) {
                Some(v) => v
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| ConfigError::Invalid { key, value: v }),
                None => Ok(default),
            }
        };
        let count = |key: &'static str, default: u32| -> Result<u32, ConfigError> {
            match get(key) {
                Some(v) => v
                    .parse::<u32>()
                    .map_err(|_| ConfigError::Invalid { key, value: v }),
                None => Ok(default),
            }
        };

        let tracked_raw =
            get("TRACKED_ASSETS").unwrap_or_else(|| DEFAULT_TRACKED_ASSETS.to_string());
        let inverse_raw = get("INVERSE_ASSETS").unwrap_or_default();
        let tracked = parse_asset_list(&tracked_raw);
        let inverse = parse_asset_list(&inverse_raw);

        let mut enabled = Vec::new();
        for id in ExchangeId::ALL {
            let (key_var, secret_var, url_var, default_url) = match id {
                ExchangeId::Binance => (
                    "BINANCE_API_KEY",
                    "BINANCE_API_SECRET",
                    "BINANCE_BASE_URL",
                    exchanges::binance::BASE_URL,
                ),
                ExchangeId::Htx => (
                    "HTX_API_KEY",
                    "HTX_API_SECRET",
                    "HTX_BASE_URL",
                    exchanges::htx::BASE_URL,
                ),
            };

            let exchange = ExchangeConfig {
                id,
                base_url: get(url_var).unwrap_or_else(|| default_url.to_string()),
                api_key: get(key_var),
                api_secret: get(secret_var),
                tracked: tracked_assets_for(id, &tracked, &inverse),
            };

            if exchange.has_credentials() {
                enabled.push(exchange);
            } else {
                warn!(
                    "{} disabled: {} / {} not set",
                    id, key_var, secret_var
                );
            }
        }

        let api_port = match get("COLLECTOR_API_PORT") {
            Some(v) => v.parse::<u16>().map_err(|_| ConfigError::Invalid {
                key: "COLLECTOR_API_PORT",
                value: v,
            })?,
            None => defaults.api_port,
        };

        let config = Self {
            interval: secs("COLLECT_INTERVAL_SECS", defaults.interval)?,
            fetch_timeout: secs("FETCH_TIMEOUT_SECS", defaults.fetch_timeout)?,
            fetch_attempts: count("FETCH_ATTEMPTS", defaults.fetch_attempts)?,
            store_timeout: secs("STORE_TIMEOUT_SECS", defaults.store_timeout)?,
            write_attempts: count("WRITE_ATTEMPTS", defaults.write_attempts)?,
            write_backoff: millis("WRITE_BACKOFF_MS", defaults.write_backoff)?,
            rate_max_staleness: secs("RATE_MAX_STALENESS_SECS", defaults.rate_max_staleness)?,
            auth_retry_after: secs("AUTH_RETRY_AFTER_SECS", defaults.auth_retry_after)?,
            exchanges: enabled,
            db_path: get("DB_PATH").unwrap_or(defaults.db_path),
            api_port,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Validation(
                "collect interval must be positive".to_string(),
            ));
        }
        if self.fetch_timeout.is_zero() || self.fetch_timeout >= self.interval {
            return Err(ConfigError::Validation(format!(
                "fetch timeout {:?} must be positive and shorter than the interval {:?}",
                self.fetch_timeout, self.interval
            )));
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "store timeout must be positive".to_string(),
            ));
        }
        if self.fetch_attempts == 0 || self.write_attempts == 0 {
            return Err(ConfigError::Validation(
                "attempt counts must be at least 1".to_string(),
            ));
        }
        if self.rate_max_staleness.is_zero() || self.rate_max_staleness > MAX_RATE_STALENESS {
            return Err(ConfigError::Validation(format!(
                "rate staleness window {:?} must be within (0, {:?}]",
                self.rate_max_staleness, MAX_RATE_STALENESS
            )));
        }
        if self.exchanges.is_empty() {
            return Err(ConfigError::NoExchange);
        }
        for exchange in &self.exchanges {
            if exchange.tracked.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{} has no tracked assets",
                    exchange.id
                )));
            }
        }
        Ok(())
    }

    /// 환율 staleness 창 (chrono 기준)
    pub fn staleness_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.rate_max_staleness).unwrap_or_else(|_| chrono::Duration::hours(24))
    }
}

/// 로그 디렉토리 (LOG_DIR)
/// 설정 로드 중 경고도 남기도록 로깅은 설정보다 먼저 초기화되므로 따로 읽는다.
pub fn log_dir() -> String {
    resolve_log_dir(env::var("LOG_DIR").ok())
}

fn resolve_log_dir(value: Option<String>) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string())
}

fn parse_asset_list(raw: &str) -> Vec<Asset> {
    let mut assets: Vec<Asset> = Vec::new();
    for code in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let asset = Asset::new(code);
        if !assets.contains(&asset) {
            assets.push(asset);
        }
    }
    assets
}

/// 거래소별 티커 심볼 규칙 (Binance: USDCUSDT, HTX: usdcusdt)
pub fn pair_symbol(exchange: ExchangeId, base: &str, quote: &str) -> String {
    let symbol = format!("{}{}", base, quote);
    match exchange {
        ExchangeId::Binance => symbol.to_ascii_uppercase(),
        ExchangeId::Htx => symbol.to_ascii_lowercase(),
    }
}

fn tracked_assets_for(
    exchange: ExchangeId,
    tracked: &[Asset],
    inverse: &[Asset],
) -> Vec<TrackedAsset> {
    tracked
        .iter()
        .map(|asset| {
            if asset.is_usdt() {
                TrackedAsset::usdt()
            } else if inverse.contains(asset) {
                TrackedAsset::inverse(
                    asset.as_str(),
                    pair_symbol(exchange, Asset::USDT, asset.as_str()),
                )
            } else {
                TrackedAsset::direct(
                    asset.as_str(),
                    pair_symbol(exchange, asset.as_str(), Asset::USDT),
                )
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_and_missing_credentials_disable_exchange() {
        let config = CollectorConfig::from_lookup(lookup(&[
            ("BINANCE_API_KEY", "key"),
            ("BINANCE_API_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.write_attempts, 3);
        assert_eq!(config.rate_max_staleness, Duration::from_secs(900));
        assert_eq!(config.exchanges.len(), 1);

        let binance = &config.exchanges[0];
        assert_eq!(binance.id, ExchangeId::Binance);
        assert_eq!(binance.base_url, exchanges::binance::BASE_URL);
        let pairs: Vec<_> = binance.tracked.iter().map(|t| t.pair.clone()).collect();
        assert_eq!(
            pairs,
            vec![
                None,
                Some("USDCUSDT".to_string()),
                Some("FDUSDUSDT".to_string())
            ]
        );
    }

    #[test]
    fn htx_pairs_are_lowercase_and_inverse_pairs_flip() {
        let config = CollectorConfig::from_lookup(lookup(&[
            ("HTX_API_KEY", "key"),
            ("HTX_API_SECRET", "secret"),
            ("TRACKED_ASSETS", "usdt, usdc, try"),
            ("INVERSE_ASSETS", "TRY"),
        ]))
        .unwrap();

        let htx = &config.exchanges[0];
        assert_eq!(htx.id, ExchangeId::Htx);
        assert_eq!(htx.tracked[1].pair.as_deref(), Some("usdcusdt"));
        assert!(htx.tracked[2].inverse);
        assert_eq!(htx.tracked[2].pair.as_deref(), Some("usdttry"));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = CollectorConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::NoExchange));

        let err = CollectorConfig::from_lookup(lookup(&[
            ("BINANCE_API_KEY", "key"),
            ("BINANCE_API_SECRET", "secret"),
            ("COLLECT_INTERVAL_SECS", "thirty"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "COLLECT_INTERVAL_SECS",
                ..
            }
        ));

        let err = CollectorConfig::from_lookup(lookup(&[
            ("BINANCE_API_KEY", "key"),
            ("BINANCE_API_SECRET", "secret"),
            ("COLLECT_INTERVAL_SECS", "10"),
            ("FETCH_TIMEOUT_SECS", "10"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = CollectorConfig::from_lookup(lookup(&[
            ("BINANCE_API_KEY", "key"),
            ("BINANCE_API_SECRET", "secret"),
            ("WRITE_ATTEMPTS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn log_dir_defaults_when_unset_or_blank() {
        assert_eq!(resolve_log_dir(None), "logs");
        assert_eq!(resolve_log_dir(Some("  ".to_string())), "logs");
        assert_eq!(resolve_log_dir(Some("/var/log/collector".to_string())), "/var/log/collector");
    }
}
