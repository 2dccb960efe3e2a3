use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use interface::{ConversionRate, ExchangeError, TrackedAsset};

/// 에러 메시지에 넣을 응답 본문 (앞 200자)
pub(crate) fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

/// 전송 단계 에러를 타임아웃과 그 외로 구분
pub(crate) fn map_send_error(e: reqwest::Error, timeout: Duration) -> ExchangeError {
    if e.is_timeout() {
        ExchangeError::Timeout(timeout)
    } else {
        ExchangeError::Http(e)
    }
}

/// 거래소가 문자열로 주는 수량/가격 파싱
pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal, ExchangeError> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| ExchangeError::Decode(format!("invalid decimal {:?}: {}", raw, e)))
}

/// JSON 숫자 또는 문자열을 Decimal로
pub(crate) fn decimal_from_json(value: &serde_json::Value) -> Result<Decimal, ExchangeError> {
    match value {
        serde_json::Value::String(s) => parse_decimal(s),
        serde_json::Value::Number(n) => parse_decimal(&n.to_string()),
        other => Err(ExchangeError::Decode(format!(
            "expected decimal, got {}",
            other
        ))),
    }
}

/// 티커 가격을 USDT 환율로 변환. 0 이하 가격은 거부한다.
pub(crate) fn rate_from_price(
    tracked: &TrackedAsset,
    price: Decimal,
    as_of: DateTime<Utc>,
) -> Result<ConversionRate, ExchangeError> {
    if price <= Decimal::ZERO {
        return Err(ExchangeError::Decode(format!(
            "non-positive price {} for {}",
            price, tracked.asset
        )));
    }

    let rate = if tracked.inverse {
        Decimal::ONE
            .checked_div(price)
            .ok_or_else(|| ExchangeError::Decode(format!("cannot invert price {}", price)))?
    } else {
        price
    };

    Ok(ConversionRate::to_usdt(tracked.asset.clone(), rate, as_of))
}
