//! Non-repainting signal derivation.
//!
//! The last bar of every series handed in here is treated as still forming.
//! Indicators are computed over the closed prefix only, so a status confirmed
//! on bar `n` cannot change when later bars arrive or the forming bar moves.

use super::indicators::{
    macd, supertrend, Direction, MacdParams, MacdPoint, Series, SupertrendParams, TrendPoint,
};
use super::models::{Bar, SignalEvent, SignalKind, SignalStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which indicator drives the signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    MacdZeroCross(MacdParams),
    SupertrendFlip(SupertrendParams),
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::MacdZeroCross(MacdParams::default())
    }
}

/// Indicator values for one bar, tagged by indicator.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(tag = "indicator", rename_all = "snake_case")]
pub enum Reading {
    Macd(MacdPoint),
    Supertrend(TrendPoint),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct IndicatorSnapshot {
    pub bar_index: usize,
    pub bar_start: DateTime<Utc>,
    #[serde(flatten)]
    pub reading: Reading,
}

/// Everything the presentation layer needs for one instrument.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Evaluation {
    pub status: SignalStatus,
    pub last_price: Option<f64>,
    pub tail: Vec<IndicatorSnapshot>,
    pub events: Vec<SignalEvent>,
}

enum Track {
    Macd(Series<MacdPoint>),
    Supertrend(Series<TrendPoint>),
}

impl Track {
    fn offset(&self) -> usize {
        match self {
            Track::Macd(s) => s.offset,
            Track::Supertrend(s) => s.offset,
        }
    }

    fn end(&self) -> usize {
        match self {
            Track::Macd(s) => s.end(),
            Track::Supertrend(s) => s.end(),
        }
    }

    fn reading(&self, bar_index: usize) -> Option<Reading> {
        match self {
            Track::Macd(s) => s.get(bar_index).copied().map(Reading::Macd),
            Track::Supertrend(s) => s.get(bar_index).copied().map(Reading::Supertrend),
        }
    }

    /// Status comparing bar `i` with bar `i - 1`.
    fn status_at(&self, i: usize) -> SignalStatus {
        let prev = i.checked_sub(1).and_then(|p| self.reading(p));
        match (prev, self.reading(i)) {
            (Some(Reading::Macd(prev)), Some(Reading::Macd(cur))) => {
                macd_zero_cross(prev.macd, cur.macd)
            }
            (Some(Reading::Supertrend(prev)), Some(Reading::Supertrend(cur))) => {
                supertrend_flip(&prev, &cur)
            }
            _ => SignalStatus::Wait,
        }
    }
}

fn macd_zero_cross(prev: f64, cur: f64) -> SignalStatus {
    if !prev.is_finite() || !cur.is_finite() {
        return SignalStatus::Neutral;
    }
    if prev <= 0.0 && cur > 0.0 {
        SignalStatus::Buy
    } else if prev >= 0.0 && cur < 0.0 {
        SignalStatus::Sell
    } else if cur > 0.0 {
        SignalStatus::HoldBuy
    } else {
        SignalStatus::HoldSell
    }
}

fn supertrend_flip(prev: &TrendPoint, cur: &TrendPoint) -> SignalStatus {
    if !prev.trend_value.is_finite() || !cur.trend_value.is_finite() {
        return SignalStatus::Neutral;
    }
    match (prev.direction, cur.direction) {
        (Direction::Down, Direction::Up) => SignalStatus::Buy,
        (Direction::Up, Direction::Down) => SignalStatus::Sell,
        (_, Direction::Up) => SignalStatus::HoldBuy,
        (_, Direction::Down) => SignalStatus::HoldSell,
    }
}

impl Strategy {
    /// Closed bars needed before a status other than `wait` is possible.
    pub fn warmup(&self) -> usize {
        match self {
            Strategy::MacdZeroCross(p) => p.slow,
            Strategy::SupertrendFlip(p) => p.period + 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::MacdZeroCross(_) => "macd_zero_cross",
            Strategy::SupertrendFlip(_) => "supertrend_flip",
        }
    }

    fn track(&self, closed: &[Bar]) -> Option<Track> {
        if closed.len() < self.warmup() {
            return None;
        }
        match self {
            Strategy::MacdZeroCross(p) => macd(closed, *p).ok().map(Track::Macd),
            Strategy::SupertrendFlip(p) => supertrend(closed, *p).ok().map(Track::Supertrend),
        }
    }

    /// Status treating `bars[closed_index]` as the last closed bar.
    ///
    /// Bars after `closed_index` are ignored entirely.
    pub fn status_as_of(&self, bars: &[Bar], closed_index: usize) -> SignalStatus {
        if closed_index >= bars.len() {
            return SignalStatus::Wait;
        }
        let closed = &bars[..=closed_index];
        match self.track(closed) {
            Some(track) => track.status_at(closed_index),
            None => SignalStatus::Wait,
        }
    }

    /// Status of the series as it stands now; the final bar is forming.
    pub fn current_status(&self, bars: &[Bar]) -> SignalStatus {
        match bars.len().checked_sub(2) {
            Some(closed_index) => self.status_as_of(bars, closed_index),
            None => SignalStatus::Wait,
        }
    }

    /// Every cross or flip on closed bars, oldest first.
    pub fn signal_events(&self, bars: &[Bar]) -> Vec<SignalEvent> {
        let closed = closed_prefix(bars);
        match self.track(closed) {
            Some(track) => collect_events(&track, closed),
            None => Vec::new(),
        }
    }

    /// Status, last price, the last `tail_len` closed readings and the event
    /// history in one pass.
    pub fn evaluate(&self, bars: &[Bar], tail_len: usize) -> Evaluation {
        let last_price = bars.last().map(|b| b.close);
        let closed = closed_prefix(bars);
        let Some(track) = self.track(closed) else {
            return Evaluation {
                status: SignalStatus::Wait,
                last_price,
                tail: Vec::new(),
                events: Vec::new(),
            };
        };

        let status = track.status_at(closed.len() - 1);
        let tail_start = track.end().saturating_sub(tail_len).max(track.offset());
        let tail = (tail_start..track.end())
            .filter_map(|i| {
                track.reading(i).map(|reading| IndicatorSnapshot {
                    bar_index: i,
                    bar_start: closed[i].bar_start,
                    reading,
                })
            })
            .collect();

        Evaluation {
            status,
            last_price,
            tail,
            events: collect_events(&track, closed),
        }
    }
}

fn closed_prefix(bars: &[Bar]) -> &[Bar] {
    &bars[..bars.len().saturating_sub(1)]
}

fn collect_events(track: &Track, closed: &[Bar]) -> Vec<SignalEvent> {
    (track.offset() + 1..track.end())
        .filter_map(|i| {
            let kind = match track.status_at(i) {
                SignalStatus::Buy => SignalKind::Buy,
                SignalStatus::Sell => SignalKind::Sell,
                _ => return None,
            };
            Some(SignalEvent {
                bar_index: i,
                bar_start: closed[i].bar_start,
                kind,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                bar_start: DateTime::<Utc>::from_timestamp(900 * i as i64, 0).unwrap(),
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
            })
            .collect()
    }

    #[test]
    fn test_macd_zero_cross_table() {
        assert_eq!(macd_zero_cross(-0.5, 0.2), SignalStatus::Buy);
        assert_eq!(macd_zero_cross(0.0, 0.2), SignalStatus::Buy);
        assert_eq!(macd_zero_cross(0.5, -0.2), SignalStatus::Sell);
        assert_eq!(macd_zero_cross(0.0, -0.2), SignalStatus::Sell);
        assert_eq!(macd_zero_cross(0.5, 0.7), SignalStatus::HoldBuy);
        assert_eq!(macd_zero_cross(-0.5, -0.7), SignalStatus::HoldSell);
        assert_eq!(macd_zero_cross(f64::NAN, 1.0), SignalStatus::Neutral);
    }

    #[test]
    fn test_short_series_waits_without_events() {
        let strategy = Strategy::default();
        // 26 bars means only 25 closed
        let bars = bars_from_closes(&[100.0; 26]);
        assert_eq!(strategy.current_status(&bars), SignalStatus::Wait);
        assert!(strategy.signal_events(&bars).is_empty());
        assert_eq!(strategy.current_status(&[]), SignalStatus::Wait);
        assert_eq!(strategy.evaluate(&bars, 5).status, SignalStatus::Wait);
    }

    #[test]
    fn test_forming_bar_is_ignored() {
        let strategy = Strategy::default();
        let mut closes: Vec<f64> = (0..40).map(|i| 200.0 - i as f64).collect();
        closes.push(200.0);
        let calm = bars_from_closes(&closes);
        let before = strategy.current_status(&calm);

        *closes.last_mut().unwrap() = 10_000.0;
        let spiked = bars_from_closes(&closes);
        assert_eq!(strategy.current_status(&spiked), before);
        assert_eq!(before, SignalStatus::HoldSell);
    }

    #[test]
    fn test_supertrend_flip_status() {
        let strategy = Strategy::SupertrendFlip(SupertrendParams { period: 2, multiplier: 1.0 });
        // closed bars end with the flip at index 5, index 6 is forming
        let bars = bars_from_closes(&[100.0, 101.0, 102.0, 103.0, 104.0, 90.0, 95.0]);
        assert_eq!(strategy.current_status(&bars), SignalStatus::Sell);

        let events = strategy.signal_events(&bars);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bar_index, 5);
        assert_eq!(events[0].kind, SignalKind::Sell);
    }

    #[test]
    fn test_supertrend_flip_table() {
        let point = |trend_value: f64, direction: Direction| TrendPoint {
            trend_value,
            direction,
            upper: trend_value + 1.0,
            lower: trend_value - 1.0,
        };
        let (up, down) = (point(98.0, Direction::Up), point(96.5, Direction::Down));
        assert_eq!(supertrend_flip(&down, &up), SignalStatus::Buy);
        assert_eq!(supertrend_flip(&up, &down), SignalStatus::Sell);
        assert_eq!(supertrend_flip(&up, &up), SignalStatus::HoldBuy);
        assert_eq!(supertrend_flip(&down, &down), SignalStatus::HoldSell);

        let blank = point(f64::NAN, Direction::Up);
        assert_eq!(supertrend_flip(&down, &blank), SignalStatus::Neutral);
        assert_eq!(supertrend_flip(&blank, &up), SignalStatus::Neutral);
    }

    #[test]
    fn test_supertrend_buy_flip_status() {
        let strategy = Strategy::SupertrendFlip(SupertrendParams { period: 2, multiplier: 1.0 });
        // turns down at index 2, back up at index 5, index 6 is forming
        let bars = bars_from_closes(&[100.0, 100.0, 90.0, 85.0, 80.0, 95.0, 90.0]);
        assert_eq!(strategy.current_status(&bars), SignalStatus::Buy);
        assert_eq!(strategy.status_as_of(&bars, 4), SignalStatus::HoldSell);

        let events: Vec<(usize, SignalKind)> = strategy
            .signal_events(&bars)
            .iter()
            .map(|e| (e.bar_index, e.kind))
            .collect();
        assert_eq!(events, vec![(2, SignalKind::Sell), (5, SignalKind::Buy)]);
    }

    #[test]
    fn test_supertrend_unusable_band_is_neutral() {
        let strategy = Strategy::SupertrendFlip(SupertrendParams { period: 2, multiplier: 1.0 });
        let mut bars = bars_from_closes(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0]);
        // NaN in the ATR seed leaves every band NaN
        bars[0].high = f64::NAN;

        assert_eq!(strategy.status_as_of(&bars, 2), SignalStatus::Neutral);
        assert_eq!(strategy.status_as_of(&bars, 4), SignalStatus::Neutral);
        assert_eq!(strategy.current_status(&bars), SignalStatus::Neutral);
        assert!(strategy.signal_events(&bars).is_empty());
    }

    #[test]
    fn test_evaluate_tail_is_closed_bars_only() {
        let strategy = Strategy::default();
        let closes: Vec<f64> = (0..35).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let bars = bars_from_closes(&closes);
        let eval = strategy.evaluate(&bars, 5);

        let indices: Vec<usize> = eval.tail.iter().map(|s| s.bar_index).collect();
        assert_eq!(indices, vec![29, 30, 31, 32, 33]);
        assert_eq!(eval.last_price, Some(closes[34]));
        assert_eq!(eval.status, strategy.current_status(&bars));
        assert_eq!(eval.events, strategy.signal_events(&bars));
    }
}
