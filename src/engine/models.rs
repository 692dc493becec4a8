use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// -----------------------------------------------
// SAMPLES AND BARS
// -----------------------------------------------

/// Raw OHLC row as delivered by the market data gateway.
///
/// Prices may arrive as JSON numbers or numeric strings; anything else is
/// treated as unparsable when the row is aggregated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawSample {
    pub datetime: String,
    #[serde(default)]
    pub open: Value,
    #[serde(default)]
    pub high: Value,
    #[serde(default)]
    pub low: Value,
    #[serde(default)]
    pub close: Value,
}

impl RawSample {
    pub fn new(datetime: impl Into<String>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            datetime: datetime.into(),
            open: Value::from(open),
            high: Value::from(high),
            low: Value::from(low),
            close: Value::from(close),
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.datetime)
    }

    /// Parsed sample, or `None` when any price field is unparsable.
    pub fn prices(&self) -> Option<(f64, f64, f64, f64)> {
        Some((
            parse_price(&self.open)?,
            parse_price(&self.high)?,
            parse_price(&self.low)?,
            parse_price(&self.close)?,
        ))
    }
}

/// One parsed, finite OHLC sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self { timestamp, open, high, low, close }
    }

    pub fn is_finite(&self) -> bool {
        [self.open, self.high, self.low, self.close].iter().all(|v| v.is_finite())
    }
}

/// OHLC value for one fixed time bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub bar_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    pub(crate) fn opened_by(bar_start: DateTime<Utc>, sample: &Sample) -> Self {
        Self {
            bar_start,
            open: sample.open,
            high: sample.high,
            low: sample.low,
            close: sample.close,
        }
    }

    pub(crate) fn absorb(&mut self, sample: &Sample) {
        if sample.high > self.high {
            self.high = sample.high;
        }
        if sample.low < self.low {
            self.low = sample.low;
        }
        self.close = sample.close;
    }

    pub fn hl2(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

/// Ordered bars of a single width. `bar_start` is strictly increasing; a
/// missing bucket simply has no bar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BarSeries {
    pub bucket_secs: i64,
    pub bars: Vec<Bar>,
}

impl BarSeries {
    pub fn bucket_width(&self) -> TimeDelta {
        TimeDelta::seconds(self.bucket_secs)
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }
}

// -----------------------------------------------
// SIGNALS
// -----------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Wait,
    Neutral,
    Buy,
    Sell,
    HoldBuy,
    HoldSell,
}

impl SignalStatus {
    /// Only fresh crosses are alert-worthy.
    pub fn is_actionable(self) -> bool {
        matches!(self, SignalStatus::Buy | SignalStatus::Sell)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalStatus::Wait => "wait",
            SignalStatus::Neutral => "neutral",
            SignalStatus::Buy => "buy",
            SignalStatus::Sell => "sell",
            SignalStatus::HoldBuy => "hold_buy",
            SignalStatus::HoldSell => "hold_sell",
        }
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Buy,
    Sell,
}

/// A cross or flip detected on a closed bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SignalEvent {
    pub bar_index: usize,
    pub bar_start: DateTime<Utc>,
    pub kind: SignalKind,
}

// -----------------------------------------------
// OPTION CHAIN
// -----------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    /// Exchange suffix, "CE" / "PE".
    pub fn code(self) -> &'static str {
        match self {
            OptionRight::Call => "CE",
            OptionRight::Put => "PE",
        }
    }
}

impl fmt::Display for OptionRight {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OptionRight::Call => f.write_str("Call"),
            OptionRight::Put => f.write_str("Put"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OptionQuote {
    pub strike: f64,
    pub right: OptionRight,
    /// `None` when the upstream premium could not be parsed.
    pub premium: Option<f64>,
}

impl OptionQuote {
    pub fn new(strike: f64, right: OptionRight, premium: f64) -> Self {
        Self { strike, right, premium: Some(premium) }
    }

    pub fn unpriced(strike: f64, right: OptionRight) -> Self {
        Self { strike, right, premium: None }
    }
}

/// Quotes for one underlying, expiry and right, fetched fresh each cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainSnapshot {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub right: OptionRight,
    pub quotes: Vec<OptionQuote>,
}

impl ChainSnapshot {
    /// Keep strikes within `atm ± width * step`, preserving chain order.
    pub fn around(&self, atm: f64, step: f64, width: u32) -> ChainSnapshot {
        let reach = step * width as f64;
        ChainSnapshot {
            underlying: self.underlying.clone(),
            expiry: self.expiry,
            right: self.right,
            quotes: self
                .quotes
                .iter()
                .filter(|q| (q.strike - atm).abs() <= reach)
                .copied()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StrikeSelection {
    pub strike: f64,
    pub premium: f64,
    pub abs_diff_from_target: f64,
}

// -----------------------------------------------
// INSTRUMENT KEYS
// -----------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Spot,
    Call,
    Put,
}

impl Leg {
    pub fn right(self) -> Option<OptionRight> {
        match self {
            Leg::Spot => None,
            Leg::Call => Some(OptionRight::Call),
            Leg::Put => Some(OptionRight::Put),
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Leg::Spot => "SPOT",
            Leg::Call => "CE",
            Leg::Put => "PE",
        }
    }
}

/// Stable identity of a tracked instrument, e.g. `NIFTY-CE`.
///
/// The call leg keeps its key across cycles even when the selected strike
/// changes, so alert de-duplication follows the leg, not the contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct InstrumentKey {
    pub underlying: String,
    pub leg: Leg,
}

impl InstrumentKey {
    pub fn new(underlying: impl Into<String>, leg: Leg) -> Self {
        Self { underlying: underlying.into(), leg }
    }

    pub fn spot(underlying: impl Into<String>) -> Self {
        Self::new(underlying, Leg::Spot)
    }

    pub fn call(underlying: impl Into<String>) -> Self {
        Self::new(underlying, Leg::Call)
    }

    pub fn put(underlying: impl Into<String>) -> Self {
        Self::new(underlying, Leg::Put)
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.underlying, self.leg.suffix())
    }
}

impl FromStr for InstrumentKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (underlying, suffix) = s
            .rsplit_once('-')
            .ok_or_else(|| format!("instrument key '{}' has no leg suffix", s))?;
        let leg = match suffix.to_ascii_uppercase().as_str() {
            "SPOT" => Leg::Spot,
            "CE" => Leg::Call,
            "PE" => Leg::Put,
            other => return Err(format!("unknown leg '{}'", other)),
        };
        if underlying.is_empty() {
            return Err(format!("instrument key '{}' has no underlying", s));
        }
        Ok(Self::new(underlying.to_ascii_uppercase(), leg))
    }
}

impl From<InstrumentKey> for String {
    fn from(key: InstrumentKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for InstrumentKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// -----------------------------------------------
// LENIENT PARSERS
// -----------------------------------------------

/// Number or numeric string; non-finite values count as unparsable.
pub fn parse_price(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// RFC 3339, or a naive date-time taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 3] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
    ];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
