//! The refresh cycle: fetch, aggregate, evaluate, de-duplicate, notify.
//!
//! Instruments are evaluated concurrently and never fail each other. Every
//! upstream step of an instrument runs under its own time limit, so a hung
//! fetch degrades that instrument to `wait` while the cycle still publishes.
//! The de-duplicator is written by one task after all evaluations are joined.

use crate::config;
use crate::engine::candles::aggregate_raw;
use crate::engine::dedup::{AlertDeduplicator, Decision};
use crate::engine::models::{
    InstrumentKey, Leg, OptionRight, SignalEvent, SignalStatus, StrikeSelection,
};
use crate::engine::strategy::{Evaluation, IndicatorSnapshot, Strategy};
use crate::engine::strikes::{atm_strike, select, StrikeFilter};
use crate::error::{SignalError, SignalResult};
use crate::market::notifier::{Alert, Notifier};
use crate::market::source::{ExpiryCalendar, ExpiryKind, Instrument, MarketDataSource};
use crate::utility::timing::{timed_async, Timer};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use futures::future::{join_all, Either};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

// -----------------------------------------------
// CONFIGURATION
// -----------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    pub underlyings: Vec<String>,
    pub strike_step: f64,
    /// Strikes kept on each side of ATM before selection; `None` scans the
    /// whole chain.
    pub scan_width: Option<u32>,
    pub target_premium: f64,
    pub strike_filter: StrikeFilter,
    pub strategy: Strategy,
    pub expiry_kind: ExpiryKind,
    pub sample_interval: String,
    pub bucket_minutes: i64,
    pub history_days: i64,
    pub tail_len: usize,
    #[serde(skip)]
    pub refresh_interval: Duration,
    /// Limit on each upstream step of one instrument (quote, chain, history).
    #[serde(skip)]
    pub instrument_timeout: Option<Duration>,
    #[serde(skip)]
    pub notify_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            underlyings: config::DEFAULT_UNDERLYINGS.iter().map(|s| s.to_string()).collect(),
            strike_step: config::DEFAULT_STRIKE_STEP,
            scan_width: Some(config::DEFAULT_SCAN_WIDTH),
            target_premium: config::DEFAULT_TARGET_PREMIUM,
            strike_filter: StrikeFilter::default(),
            strategy: Strategy::default(),
            expiry_kind: ExpiryKind::Monthly,
            sample_interval: config::DEFAULT_SAMPLE_INTERVAL.to_string(),
            bucket_minutes: config::DEFAULT_BUCKET_MINUTES,
            history_days: config::DEFAULT_HISTORY_DAYS,
            tail_len: config::DEFAULT_TAIL_LEN,
            refresh_interval: Duration::from_secs(config::DEFAULT_REFRESH_SECS),
            instrument_timeout: Some(Duration::from_secs(config::DEFAULT_INSTRUMENT_TIMEOUT_SECS)),
            notify_timeout: Duration::from_secs(config::DEFAULT_NOTIFY_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    pub fn bucket_width(&self) -> TimeDelta {
        TimeDelta::minutes(self.bucket_minutes)
    }
}

// -----------------------------------------------
// CYCLE OUTPUT
// -----------------------------------------------

/// Per-instrument result of one cycle, as handed to presentation.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentPayload {
    pub instrument_key: InstrumentKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    pub status: SignalStatus,
    pub last_price: Option<f64>,
    pub indicator_snapshot_tail: Vec<IndicatorSnapshot>,
    pub signal_events: Vec<SignalEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<StrikeSelection>,
    /// Set when the instrument could not be evaluated this cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Expected degradations (warm-up, no strike match).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub alerted: bool,
}

impl InstrumentPayload {
    fn waiting(instrument_key: InstrumentKey) -> Self {
        Self {
            instrument_key,
            contract: None,
            status: SignalStatus::Wait,
            last_price: None,
            indicator_snapshot_tail: Vec::new(),
            signal_events: Vec::new(),
            selection: None,
            failure: None,
            note: None,
            alerted: false,
        }
    }

    fn degraded(mut self, err: SignalError) -> Self {
        self.status = SignalStatus::Wait;
        if err.is_steady_state() {
            self.note = Some(err.to_string());
        } else {
            warn!(instrument = %self.instrument_key, error = %err, "instrument unavailable");
            self.failure = Some(err.to_string());
        }
        self
    }

    fn with_evaluation(mut self, eval: Evaluation) -> Self {
        self.status = eval.status;
        self.last_price = eval.last_price;
        self.indicator_snapshot_tail = eval.tail;
        self.signal_events = eval.events;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub strategy: String,
    pub expiry: NaiveDate,
    pub instruments: Vec<InstrumentPayload>,
    pub alerts_sent: usize,
    pub failures: usize,
}

impl CycleReport {
    pub fn instrument(&self, key: &InstrumentKey) -> Option<&InstrumentPayload> {
        self.instruments.iter().find(|p| &p.instrument_key == key)
    }
}

struct HistoryWindow {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

/// An emitted alert plus the dedup entry it replaced.
struct PendingAlert {
    alert: Alert,
    previous: Option<SignalStatus>,
}

async fn within<T>(
    limit: Option<Duration>,
    step: &str,
    fut: impl Future<Output = SignalResult<T>>,
) -> SignalResult<T> {
    let Some(limit) = limit else {
        return fut.await;
    };
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SignalError::upstream(format!(
            "{} timed out after {}ms",
            step,
            limit.as_millis()
        ))),
    }
}

// -----------------------------------------------
// ORCHESTRATOR
// -----------------------------------------------

pub struct RefreshOrchestrator {
    source: Arc<dyn MarketDataSource>,
    calendar: Arc<dyn ExpiryCalendar>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    dedup: Mutex<AlertDeduplicator>,
    latest: RwLock<Option<Arc<CycleReport>>>,
    cycle_gate: Mutex<()>,
}

impl RefreshOrchestrator {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        calendar: Arc<dyn ExpiryCalendar>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            source,
            calendar,
            notifier,
            config,
            dedup: Mutex::new(AlertDeduplicator::new()),
            latest: RwLock::new(None),
            cycle_gate: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Report of the most recent finished cycle.
    pub async fn latest(&self) -> Option<Arc<CycleReport>> {
        self.latest.read().await.clone()
    }

    pub async fn last_emitted(&self, key: &InstrumentKey) -> Option<SignalStatus> {
        self.dedup.lock().await.last_emitted(key)
    }

    /// Run one full cycle. Concurrent callers queue up; cycles never overlap.
    ///
    /// Always completes: fetches are bounded per instrument and each alert
    /// send is bounded by `notify_timeout`.
    pub async fn run_cycle(&self) -> Arc<CycleReport> {
        let _gate = self.cycle_gate.lock().await;
        let timer =
            Timer::start_with_threshold("refresh_cycle", config::SLOW_CYCLE_THRESHOLD_MS);
        let started_at = Utc::now();
        let window = HistoryWindow {
            from: started_at - TimeDelta::days(self.config.history_days),
            to: started_at,
        };
        let expiry = self.calendar.next_expiry(self.config.expiry_kind);
        debug!(%expiry, underlyings = ?self.config.underlyings, "starting refresh cycle");

        let spots =
            join_all(self.config.underlyings.iter().map(|u| self.spot_for_scan(u))).await;

        let mut evaluations = Vec::new();
        for (underlying, spot) in self.config.underlyings.iter().zip(spots) {
            evaluations.push(Either::Left(self.evaluate_spot(underlying, &window)));
            for leg in [Leg::Call, Leg::Put] {
                evaluations.push(Either::Right(self.evaluate_leg(
                    underlying, leg, expiry, spot, &window,
                )));
            }
        }
        let mut instruments = join_all(evaluations).await;

        let pending = self.dedupe(&mut instruments, started_at).await;
        let alerts_sent = self.dispatch(pending, &mut instruments).await;
        let failures = instruments.iter().filter(|p| p.failure.is_some()).count();

        let report = Arc::new(CycleReport {
            started_at,
            duration_ms: timer.elapsed_ms(),
            strategy: self.config.strategy.name().to_string(),
            expiry,
            instruments,
            alerts_sent,
            failures,
        });
        timer.stop();

        info!(
            instruments = report.instruments.len(),
            alerts = alerts_sent,
            failures,
            duration_ms = report.duration_ms,
            "refresh cycle complete"
        );
        *self.latest.write().await = Some(Arc::clone(&report));
        report
    }

    /// Poll forever on the configured interval. A slow cycle delays the next
    /// tick instead of overlapping it.
    pub async fn run_forever(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.refresh_interval.as_secs(),
            "refresh loop started"
        );

        loop {
            ticker.tick().await;
            self.run_cycle().await;
        }
    }

    // -----------------------------------------------
    // PER-INSTRUMENT EVALUATION
    // -----------------------------------------------

    async fn spot_for_scan(&self, underlying: &str) -> Option<f64> {
        self.config.scan_width?;
        let instrument = Instrument::index(underlying);
        let quote = self.source.quote(&instrument);
        match within(self.config.instrument_timeout, "spot quote", quote).await {
            Ok(spot) => Some(spot),
            Err(e) => {
                warn!(underlying, error = %e, "spot quote failed, scanning full chain");
                None
            }
        }
    }

    async fn evaluate_spot(&self, underlying: &str, window: &HistoryWindow) -> InstrumentPayload {
        let payload = InstrumentPayload::waiting(InstrumentKey::spot(underlying));
        match self.evaluate_history(&Instrument::index(underlying), window).await {
            Ok(eval) => payload.with_evaluation(eval),
            Err(e) => payload.degraded(e),
        }
    }

    async fn evaluate_leg(
        &self,
        underlying: &str,
        leg: Leg,
        expiry: NaiveDate,
        spot: Option<f64>,
        window: &HistoryWindow,
    ) -> InstrumentPayload {
        let mut payload = InstrumentPayload::waiting(InstrumentKey::new(underlying, leg));
        let Some(right) = leg.right() else {
            return payload;
        };

        let selection = match self.pick_strike(underlying, expiry, right, spot).await {
            Ok(selection) => selection,
            Err(e) => return payload.degraded(e),
        };
        let contract = Instrument::Option {
            underlying: underlying.to_string(),
            expiry,
            right,
            strike: selection.strike,
        };
        payload.contract = Some(contract.to_string());
        payload.selection = Some(selection);

        match self.evaluate_history(&contract, window).await {
            Ok(eval) => payload.with_evaluation(eval),
            Err(e) => payload.degraded(e),
        }
    }

    async fn pick_strike(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        right: OptionRight,
        spot: Option<f64>,
    ) -> SignalResult<StrikeSelection> {
        let chain = self.source.chain(underlying, expiry, right);
        let mut chain = within(self.config.instrument_timeout, "option chain", chain).await?;
        if let (Some(width), Some(spot)) = (self.config.scan_width, spot) {
            let atm = atm_strike(spot, self.config.strike_step)?;
            chain = chain.around(atm, self.config.strike_step, width);
        }
        select(&chain, self.config.target_premium, &self.config.strike_filter)
    }

    async fn evaluate_history(
        &self,
        instrument: &Instrument,
        window: &HistoryWindow,
    ) -> SignalResult<Evaluation> {
        let fetch = timed_async(
            format!("history {}", instrument),
            config::SLOW_FETCH_THRESHOLD_MS,
            || {
                self.source
                    .history(instrument, &self.config.sample_interval, window.from, window.to)
            },
        );
        let rows = within(self.config.instrument_timeout, "history", async move {
            fetch.await.0
        })
        .await?;
        let series = aggregate_raw(&rows, self.config.bucket_width())?;
        debug!(%instrument, samples = rows.len(), bars = series.len(), "history aggregated");
        Ok(self.config.strategy.evaluate(&series.bars, self.config.tail_len))
    }

    // -----------------------------------------------
    // ALERTING
    // -----------------------------------------------

    async fn dedupe(
        &self,
        instruments: &mut [InstrumentPayload],
        now: DateTime<Utc>,
    ) -> Vec<PendingAlert> {
        let mut dedup = self.dedup.lock().await;
        instruments
            .iter_mut()
            .filter_map(|payload| {
                let previous = dedup.last_emitted(&payload.instrument_key);
                match dedup.notify_if_changed(&payload.instrument_key, payload.status) {
                    Decision::Emit => {
                        payload.alerted = true;
                        let alert = Alert {
                            instrument_key: payload.instrument_key.clone(),
                            status: payload.status,
                            price: payload.last_price,
                            timestamp: now,
                            contract: payload.contract.clone(),
                        };
                        Some(PendingAlert { alert, previous })
                    }
                    Decision::Suppress => None,
                }
            })
            .collect()
    }

    /// Send alerts one by one. An alert that fails or times out is rolled
    /// back in the de-duplicator so the next cycle with the same status
    /// tries again.
    async fn dispatch(
        &self,
        pending: Vec<PendingAlert>,
        instruments: &mut [InstrumentPayload],
    ) -> usize {
        let limit = self.config.notify_timeout;
        let mut sent = 0;
        let mut undelivered = Vec::new();

        for PendingAlert { alert, previous } in pending {
            let error = match tokio::time::timeout(limit, self.notifier.send(&alert)).await {
                Ok(Ok(())) => {
                    sent += 1;
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(_) => format!("timed out after {}ms", limit.as_millis()),
            };
            error!(
                instrument = %alert.instrument_key,
                status = %alert.status,
                error = %error,
                "alert delivery failed"
            );
            undelivered.push((alert.instrument_key, previous));
        }

        if !undelivered.is_empty() {
            let mut dedup = self.dedup.lock().await;
            for (key, previous) in undelivered {
                dedup.restore(&key, previous);
                if let Some(payload) = instruments.iter_mut().find(|p| p.instrument_key == key) {
                    payload.alerted = false;
                }
            }
        }
        sent
    }
}
