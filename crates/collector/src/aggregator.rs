use std::collections::VecDeque;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use interface::{EquityPoint, ExchangeId};
use thiserror::Error;

use crate::normalizer::Normalized;

/// 24시간 수익률 기준 창
pub const RETURN_WINDOW_HOURS: i64 = 24;

/// 주기 계산 오차 등을 흡수하기 위한 여유분
const HISTORY_SLACK: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{exchange}] out-of-order equity point: {attempted} is not after {last}")]
pub struct OutOfOrder {
    pub exchange: ExchangeId,
    pub last: DateTime<Utc>,
    pub attempted: DateTime<Utc>,
}

pub fn return_window() -> Duration {
    Duration::hours(RETURN_WINDOW_HOURS)
}

/// 창 길이를 주기로 나눈 올림 + 여유분
pub fn history_capacity(window: Duration, interval: StdDuration) -> usize {
    let window_ms = window.num_milliseconds().max(0) as u128;
    let interval_ms = interval.as_millis().max(1);
    let slots = window_ms.div_ceil(interval_ms);
    usize::try_from(slots).unwrap_or(usize::MAX).saturating_add(HISTORY_SLACK)
}

/// 거래소 하나의 최근 자산 포인트 링 버퍼 (타임스탬프 오름차순)
#[derive(Debug, Clone)]
pub struct EquityHistory {
    window: Duration,
    capacity: usize,
    points: VecDeque<EquityPoint>,
}

impl EquityHistory {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(2),
            points: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn latest(&self) -> Option<&EquityPoint> {
        self.points.back()
    }

    pub fn oldest(&self) -> Option<&EquityPoint> {
        self.points.front()
    }

    pub fn push(&mut self, point: EquityPoint) -> Result<(), OutOfOrder> {
        if let Some(last) = self.points.back() {
            if point.timestamp <= last.timestamp {
                return Err(OutOfOrder {
                    exchange: point.exchange,
                    last: last.timestamp,
                    attempted: point.timestamp,
                });
            }
        }

        let boundary = point.timestamp - self.window;
        self.points.push_back(point);

        // 경계 이전 포인트는 가장 최근 하나만 남긴다
        while self.points.len() >= 2 && self.points[1].timestamp <= boundary {
            self.points.pop_front();
        }
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }

        Ok(())
    }

    /// `at - window` 이하인 포인트 중 가장 최근 것
    pub fn reference_for(&self, at: DateTime<Utc>) -> Option<&EquityPoint> {
        let target = at - self.window;
        let idx = self.points.partition_point(|p| p.timestamp <= target);
        if idx == 0 {
            None
        } else {
            self.points.get(idx - 1)
        }
    }
}

/// 정규화된 잔고를 거래소별 자산 포인트로 합산하고 이력을 관리
pub struct EquityAggregator {
    exchange: ExchangeId,
    history: EquityHistory,
}

impl EquityAggregator {
    pub fn new(exchange: ExchangeId, interval: StdDuration) -> Self {
        let window = return_window();
        Self {
            exchange,
            history: EquityHistory::new(window, history_capacity(window, interval)),
        }
    }

    pub fn history(&self) -> &EquityHistory {
        &self.history
    }

    pub fn aggregate(
        &mut self,
        normalized: &Normalized,
        timestamp: DateTime<Utc>,
    ) -> Result<EquityPoint, OutOfOrder> {
        if let Some(last) = self.history.latest() {
            if timestamp <= last.timestamp {
                return Err(OutOfOrder {
                    exchange: self.exchange,
                    last: last.timestamp,
                    attempted: timestamp,
                });
            }
        }

        let point = EquityPoint {
            exchange: self.exchange,
            timestamp,
            total_usdt: normalized.total_usdt(),
            stale: normalized.is_stale(),
            dropped: normalized.dropped_assets(),
        };

        self.history.push(point.clone())?;
        Ok(point)
    }
}
