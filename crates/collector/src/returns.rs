use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use interface::{EquityPoint, ReturnMetric};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::aggregator::EquityHistory;

/// 수익률을 낼 수 없는 이유 (0이나 추정값으로 대체하지 않는다)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// 24시간 전 이하의 포인트가 없음
    NoReference,
    /// 기준 자산이 0
    ZeroReference,
    Overflow,
}

impl Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::NoReference => write!(f, "no reference point 24h back"),
            UnavailableReason::ZeroReference => write!(f, "reference equity is zero"),
            UnavailableReason::Overflow => write!(f, "decimal overflow"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnOutcome {
    Available(ReturnMetric),
    Unavailable(UnavailableReason),
}

impl ReturnOutcome {
    pub fn metric(&self) -> Option<&ReturnMetric> {
        match self {
            ReturnOutcome::Available(metric) => Some(metric),
            ReturnOutcome::Unavailable(_) => None,
        }
    }
}

/// 수익률 계산에 쓰는 기준 포인트 (메모리 이력 또는 저장소)
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePoint {
    pub timestamp: DateTime<Utc>,
    pub value: Decimal,
    pub stale: bool,
}

impl From<&EquityPoint> for ReferencePoint {
    fn from(point: &EquityPoint) -> Self {
        Self {
            timestamp: point.timestamp,
            value: point.total_usdt,
            stale: point.stale,
        }
    }
}

/// (current - reference) / reference * 100
pub fn pct_change(current: Decimal, reference: Decimal) -> Result<Decimal, UnavailableReason> {
    if reference.is_zero() {
        return Err(UnavailableReason::ZeroReference);
    }
    current
        .checked_sub(reference)
        .and_then(|diff| diff.checked_mul(Decimal::ONE_HUNDRED))
        .and_then(|scaled| scaled.checked_div(reference))
        .ok_or(UnavailableReason::Overflow)
}

pub struct ReturnCalculator;

impl ReturnCalculator {
    /// 메모리 이력만으로 24시간 수익률 계산
    pub fn compute(current: &EquityPoint, history: &EquityHistory) -> ReturnOutcome {
        let reference = history
            .reference_for(current.timestamp)
            .map(ReferencePoint::from);
        Self::compute_against(current, reference.as_ref())
    }

    pub fn compute_against(
        current: &EquityPoint,
        reference: Option<&ReferencePoint>,
    ) -> ReturnOutcome {
        let Some(reference) = reference else {
            return ReturnOutcome::Unavailable(UnavailableReason::NoReference);
        };

        match pct_change(current.total_usdt, reference.value) {
            Ok(pct) => ReturnOutcome::Available(ReturnMetric {
                exchange: current.exchange,
                timestamp: current.timestamp,
                pct_change_24h: pct,
                reference_timestamp: reference.timestamp,
                stale: current.stale || reference.stale,
            }),
            Err(reason) => ReturnOutcome::Unavailable(reason),
        }
    }
}
