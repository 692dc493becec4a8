use crate::engine::models::{ChainSnapshot, OptionRight, RawSample};
use crate::error::SignalResult;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A tradable thing the gateway can quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instrument {
    Index {
        symbol: String,
    },
    Option {
        underlying: String,
        expiry: NaiveDate,
        right: OptionRight,
        strike: f64,
    },
}

impl Instrument {
    pub fn index(symbol: impl Into<String>) -> Self {
        Instrument::Index { symbol: symbol.into() }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Instrument::Index { symbol } => symbol,
            Instrument::Option { underlying, .. } => underlying,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instrument::Index { symbol } => f.write_str(symbol),
            Instrument::Option { underlying, expiry, right, strike } => write!(
                f,
                "{} {} {}{}",
                underlying,
                expiry.format("%d-%b-%Y"),
                strike,
                right.code()
            ),
        }
    }
}

/// Quotes, history and chains. Every call either returns complete data or
/// `SignalError::UpstreamUnavailable`.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn quote(&self, instrument: &Instrument) -> SignalResult<f64>;

    /// Samples in `[from, to]`, oldest first.
    async fn history(
        &self,
        instrument: &Instrument,
        interval: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SignalResult<Vec<RawSample>>;

    async fn chain(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        right: OptionRight,
    ) -> SignalResult<ChainSnapshot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryKind {
    Weekly,
    Monthly,
}

/// Contract expiry dates; opaque to the engine.
pub trait ExpiryCalendar: Send + Sync {
    fn next_expiry(&self, kind: ExpiryKind) -> NaiveDate;
}
