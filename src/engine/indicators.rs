use super::models::Bar;
use crate::error::{SignalError, SignalResult};
use serde::{Deserialize, Serialize};

/// Indicator values aligned to bar indices.
///
/// `points[k]` belongs to bar `offset + k`; bars before `offset` are still
/// inside the warm-up and have no value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series<T> {
    pub offset: usize,
    pub points: Vec<T>,
}

impl<T> Series<T> {
    pub fn get(&self, bar_index: usize) -> Option<&T> {
        bar_index
            .checked_sub(self.offset)
            .and_then(|k| self.points.get(k))
    }

    /// One past the last bar index covered.
    pub fn end(&self) -> usize {
        self.offset + self.points.len()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// -----------------------------------------------
// MACD
// -----------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MacdParams {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for MacdParams {
    fn default() -> Self {
        Self { fast: 12, slow: 26, signal: 9 }
    }
}

impl MacdParams {
    pub fn validate(&self) -> SignalResult<()> {
        if self.fast == 0 || self.slow == 0 || self.signal == 0 {
            return Err(SignalError::invalid(format!(
                "MACD periods must be positive: {:?}",
                self
            )));
        }
        if self.fast >= self.slow {
            return Err(SignalError::invalid(format!(
                "MACD fast period {} must be shorter than slow period {}",
                self.fast, self.slow
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Non-adjusted EMA: `ema[0] = v[0]`, then `v[i]*k + ema[i-1]*(1-k)`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            Some(p) => v * k + p * (1.0 - k),
            None => v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// MACD line, signal line and histogram for every bar.
pub fn macd(bars: &[Bar], params: MacdParams) -> SignalResult<Series<MacdPoint>> {
    params.validate()?;
    if bars.len() < params.slow {
        return Err(SignalError::InsufficientData {
            required: params.slow,
            available: bars.len(),
        });
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let fast = ema(&closes, params.fast);
    let slow = ema(&closes, params.slow);
    let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal = ema(&line, params.signal);

    let points = line
        .iter()
        .zip(&signal)
        .map(|(&m, &s)| MacdPoint { macd: m, signal: s, histogram: m - s })
        .collect();

    Ok(Series { offset: 0, points })
}

// -----------------------------------------------
// SUPERTREND
// -----------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SupertrendParams {
    pub period: usize,
    pub multiplier: f64,
}

impl Default for SupertrendParams {
    fn default() -> Self {
        Self { period: 10, multiplier: 3.0 }
    }
}

impl SupertrendParams {
    pub fn validate(&self) -> SignalResult<()> {
        if self.period == 0 {
            return Err(SignalError::invalid("Supertrend period must be positive"));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(SignalError::invalid(format!(
                "Supertrend multiplier must be positive, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrendPoint {
    pub trend_value: f64,
    pub direction: Direction,
    pub upper: f64,
    pub lower: f64,
}

/// True range; the first bar has no previous close and uses `high - low`.
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let span = bar.high - bar.low;
            match i.checked_sub(1).map(|p| bars[p].close) {
                Some(prev_close) => span
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs()),
                None => span,
            }
        })
        .collect()
}

/// Supertrend with ratcheted bands. The first value sits at bar
/// `period - 1`, where the ATR window fills, and starts in `up`.
pub fn supertrend(bars: &[Bar], params: SupertrendParams) -> SignalResult<Series<TrendPoint>> {
    params.validate()?;
    let period = params.period;
    if bars.len() <= period {
        return Err(SignalError::InsufficientData {
            required: period + 1,
            available: bars.len(),
        });
    }

    let tr = true_range(bars);
    let offset = period - 1;
    let mut window: f64 = tr[..period].iter().sum();
    let mut points: Vec<TrendPoint> = Vec::with_capacity(bars.len() - offset);

    for i in offset..bars.len() {
        if i > offset {
            window += tr[i] - tr[i - period];
        }
        let atr = window / period as f64;
        let mid = bars[i].hl2();
        let mut upper = mid + params.multiplier * atr;
        let mut lower = mid - params.multiplier * atr;

        let direction = match points.last() {
            None => Direction::Up,
            Some(prev) => {
                let close = bars[i].close;
                let direction = if close > prev.upper {
                    Direction::Up
                } else if close < prev.lower {
                    Direction::Down
                } else {
                    prev.direction
                };
                match (prev.direction, direction) {
                    (Direction::Up, Direction::Up) => lower = lower.max(prev.lower),
                    (Direction::Down, Direction::Down) => upper = upper.min(prev.upper),
                    _ => {}
                }
                direction
            }
        };

        let trend_value = match direction {
            Direction::Up => lower,
            Direction::Down => upper,
        };
        points.push(TrendPoint { trend_value, direction, upper, lower });
    }

    Ok(Series { offset, points })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn bar(i: usize, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            bar_start: DateTime::<Utc>::from_timestamp(900 * i as i64, 0).unwrap(),
            open: close,
            high,
            low,
            close,
        }
    }

    fn flat_bars(n: usize, price: f64) -> Vec<Bar> {
        (0..n).map(|i| bar(i, price, price, price)).collect()
    }

    #[test]
    fn test_ema_constant_series() {
        let values = vec![250.0; 40];
        for period in [1, 9, 12, 26] {
            assert!(ema(&values, period).iter().all(|&v| v == 250.0));
        }
    }

    #[test]
    fn test_ema_recurrence() {
        let out = ema(&[10.0, 20.0, 30.0], 3);
        // k = 0.5
        assert_eq!(out, vec![10.0, 15.0, 22.5]);
    }

    #[test]
    fn test_macd_needs_slow_bars() {
        let err = macd(&flat_bars(25, 100.0), MacdParams::default()).unwrap_err();
        assert_eq!(err, SignalError::InsufficientData { required: 26, available: 25 });
        assert!(macd(&flat_bars(26, 100.0), MacdParams::default()).is_ok());
    }

    #[test]
    fn test_macd_flat_prices_is_zero() {
        let series = macd(&flat_bars(30, 100.0), MacdParams::default()).unwrap();
        assert_eq!(series.offset, 0);
        assert_eq!(series.len(), 30);
        assert!(series.points.iter().all(|p| p.macd == 0.0 && p.histogram == 0.0));
    }

    #[test]
    fn test_macd_rejects_bad_params() {
        let params = MacdParams { fast: 26, slow: 12, signal: 9 };
        assert!(matches!(
            macd(&flat_bars(40, 1.0), params),
            Err(SignalError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_supertrend_warmup() {
        let params = SupertrendParams { period: 3, multiplier: 2.0 };
        assert!(matches!(
            supertrend(&flat_bars(3, 10.0), params),
            Err(SignalError::InsufficientData { required: 4, available: 3 })
        ));
        let series = supertrend(&flat_bars(4, 10.0), params).unwrap();
        assert_eq!(series.offset, 2);
        assert_eq!(series.len(), 2);
        assert!(series.get(1).is_none());
        assert!(series.get(2).is_some());
    }

    #[test]
    fn test_supertrend_lower_band_ratchets_in_uptrend() {
        // rising closes, then a dip that stays above the band
        let closes = [100.0, 102.0, 104.0, 106.0, 108.0, 110.0, 109.0, 111.0];
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| bar(i, c + 1.0, c - 1.0, c))
            .collect();
        let series = supertrend(&bars, SupertrendParams { period: 3, multiplier: 1.0 }).unwrap();

        assert!(series.points.iter().all(|p| p.direction == Direction::Up));
        for pair in series.points.windows(2) {
            assert!(pair[1].lower >= pair[0].lower);
            assert_eq!(pair[1].trend_value, pair[1].lower);
        }
    }

    #[test]
    fn test_supertrend_flips_down_below_lower_band() {
        let closes = [100.0, 101.0, 102.0, 103.0, 104.0, 90.0, 85.0];
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| bar(i, c + 0.5, c - 0.5, c))
            .collect();
        let series = supertrend(&bars, SupertrendParams { period: 2, multiplier: 1.0 }).unwrap();

        assert_eq!(series.get(4).unwrap().direction, Direction::Up);
        let flipped = series.get(5).unwrap();
        assert_eq!(flipped.direction, Direction::Down);
        assert_eq!(flipped.trend_value, flipped.upper);
        let next = series.get(6).unwrap();
        assert_eq!(next.direction, Direction::Down);
        assert!(next.upper <= flipped.upper);
    }
}
