pub mod candles;
pub mod dedup;
pub mod indicators;
pub mod models;
pub mod strategy;
pub mod strikes;

// Re-exports (public API)
pub use candles::{aggregate, aggregate_raw, bucket_start};
pub use dedup::{AlertDeduplicator, Decision};
pub use indicators::{
    ema, macd, supertrend, true_range, Direction, MacdParams, MacdPoint, Series, SupertrendParams,
    TrendPoint,
};
pub use models::{
    Bar, BarSeries, ChainSnapshot, InstrumentKey, Leg, OptionQuote, OptionRight, RawSample,
    Sample, SignalEvent, SignalKind, SignalStatus, StrikeSelection,
};
pub use strategy::{Evaluation, IndicatorSnapshot, Reading, Strategy};
pub use strikes::{atm_strike, select, PremiumBand, StrikeFilter};
