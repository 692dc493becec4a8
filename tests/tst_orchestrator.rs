use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use nifty_signals::api_server::router;
use nifty_signals::engine::{
    macd, Bar, ChainSnapshot, InstrumentKey, MacdParams, OptionQuote, OptionRight, RawSample,
    SignalStatus,
};
use nifty_signals::market::{
    Alert, ExpiryCalendar, ExpiryKind, Instrument, MarketDataSource, Notifier,
};
use nifty_signals::{CycleReport, EngineConfig, RefreshOrchestrator, SignalError, SignalResult};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

const BASE_TS: i64 = 1_764_580_500;
const FAILING: &str = "BANKNIFTY";
/// History for this underlying never answers in time.
const HANGING: &str = "FINNIFTY";
const STALL: Duration = Duration::from_secs(5);

// -----------------------------------------------
// FAKES
// -----------------------------------------------

/// Spot series ending on a fresh MACD buy: the bar after the cross is forming.
fn spot_rows_on_buy() -> Vec<RawSample> {
    let mut closes: Vec<f64> = (0..40).map(|i| 26_200.0 - 5.0 * i as f64).collect();
    let bottom = *closes.last().unwrap();
    closes.extend((1..=40).map(|i| bottom + 15.0 * i as f64));

    let bars: Vec<Bar> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar {
            bar_start: DateTime::from_timestamp(BASE_TS + 900 * i as i64, 0).unwrap(),
            open: c,
            high: c + 2.0,
            low: c - 2.0,
            close: c,
        })
        .collect();
    let line = macd(&bars, MacdParams::default()).unwrap();
    let k = (40..bars.len())
        .find(|&i| line.points[i - 1].macd <= 0.0 && line.points[i].macd > 0.0)
        .unwrap();

    bars[..=k + 1].iter().flat_map(bar_to_rows).collect()
}

fn bar_to_rows(bar: &Bar) -> Vec<RawSample> {
    (0..3)
        .map(|step| {
            let t = bar.bar_start + TimeDelta::minutes(5 * step);
            RawSample::new(
                t.format("%Y-%m-%d %H:%M:%S").to_string(),
                bar.open,
                bar.high,
                bar.low,
                bar.close,
            )
        })
        .collect()
}

/// A handful of option samples, well short of the MACD warm-up.
fn option_rows() -> Vec<RawSample> {
    (0..6)
        .map(|i| {
            let t = DateTime::<Utc>::from_timestamp(BASE_TS + 300 * i, 0).unwrap();
            RawSample::new(t.format("%Y-%m-%d %H:%M:%S").to_string(), 120.0, 124.0, 118.0, 121.0)
        })
        .collect()
}

struct FakeSource;

#[async_trait]
impl MarketDataSource for FakeSource {
    async fn quote(&self, instrument: &Instrument) -> SignalResult<f64> {
        match instrument.symbol() {
            FAILING => Err(SignalError::upstream("quote endpoint down")),
            _ => Ok(26_010.0),
        }
    }

    async fn history(
        &self,
        instrument: &Instrument,
        _interval: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> SignalResult<Vec<RawSample>> {
        if instrument.symbol() == HANGING {
            tokio::time::sleep(STALL).await;
        }
        match instrument {
            _ if instrument.symbol() == FAILING => {
                Err(SignalError::upstream("history endpoint down"))
            }
            Instrument::Index { .. } => Ok(spot_rows_on_buy()),
            Instrument::Option { .. } => Ok(option_rows()),
        }
    }

    async fn chain(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        right: OptionRight,
    ) -> SignalResult<ChainSnapshot> {
        if underlying == FAILING {
            return Err(SignalError::upstream("chain endpoint down"));
        }
        let quotes = [
            (25_800.0, 260.0),
            (25_900.0, 190.0),
            (26_000.0, 120.0),
            (26_100.0, 70.0),
            (26_200.0, 35.0),
            (27_500.0, 100.0),
        ]
        .iter()
        .map(|&(strike, premium)| OptionQuote::new(strike, right, premium))
        .collect();
        Ok(ChainSnapshot { underlying: underlying.to_string(), expiry, right, quotes })
    }
}

struct FixedCalendar;

impl ExpiryCalendar for FixedCalendar {
    fn next_expiry(&self, _kind: ExpiryKind) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 30).unwrap()
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Alert>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

struct BrokenNotifier;

#[async_trait]
impl Notifier for BrokenNotifier {
    async fn send(&self, _alert: &Alert) -> anyhow::Result<()> {
        anyhow::bail!("webhook unreachable")
    }
}

/// Hangs on the first send, delivers afterwards.
#[derive(Default)]
struct StallOnceNotifier {
    calls: AtomicUsize,
    sent: Mutex<Vec<Alert>>,
}

#[async_trait]
impl Notifier for StallOnceNotifier {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(STALL).await;
        }
        self.sent.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

fn engine_config(underlyings: &[&str]) -> EngineConfig {
    EngineConfig {
        underlyings: underlyings.iter().map(|s| s.to_string()).collect(),
        refresh_interval: Duration::from_millis(50),
        ..EngineConfig::default()
    }
}

fn orchestrator(underlyings: &[&str], notifier: Arc<dyn Notifier>) -> Arc<RefreshOrchestrator> {
    orchestrator_with(engine_config(underlyings), notifier)
}

fn orchestrator_with(
    config: EngineConfig,
    notifier: Arc<dyn Notifier>,
) -> Arc<RefreshOrchestrator> {
    Arc::new(RefreshOrchestrator::new(
        Arc::new(FakeSource),
        Arc::new(FixedCalendar),
        notifier,
        config,
    ))
}

fn short_limits(underlyings: &[&str]) -> EngineConfig {
    EngineConfig {
        instrument_timeout: Some(Duration::from_millis(300)),
        notify_timeout: Duration::from_millis(100),
        ..engine_config(underlyings)
    }
}

async fn wait_for_report(orch: &RefreshOrchestrator, within: Duration) -> Option<Arc<CycleReport>> {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if let Some(report) = orch.latest().await {
            return Some(report);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}

// -----------------------------------------------
// CYCLE
// -----------------------------------------------

#[tokio::test]
async fn test_cycle_evaluates_every_leg() {
    let notifier = Arc::new(RecordingNotifier::default());
    let orch = orchestrator(&["NIFTY"], notifier.clone());

    let report = orch.run_cycle().await;
    assert_eq!(report.instruments.len(), 3);
    assert_eq!(report.failures, 0);
    assert_eq!(report.strategy, "macd_zero_cross");

    let spot = report.instrument(&InstrumentKey::spot("NIFTY")).unwrap();
    assert_eq!(spot.status, SignalStatus::Buy);
    assert!(spot.alerted);
    assert!(!spot.signal_events.is_empty());
    assert_eq!(spot.indicator_snapshot_tail.len(), 5);

    // Far strike at 27500 has the exact premium but sits outside ATM +/- 5
    let call = report.instrument(&InstrumentKey::call("NIFTY")).unwrap();
    let selection = call.selection.unwrap();
    assert_eq!(selection.strike, 26_000.0);
    assert_eq!(call.contract.as_deref(), Some("NIFTY 30-Dec-2025 26000CE"));
    assert_eq!(call.status, SignalStatus::Wait);
    assert!(call.failure.is_none());

    let put = report.instrument(&InstrumentKey::put("NIFTY")).unwrap();
    assert_eq!(put.contract.as_deref(), Some("NIFTY 30-Dec-2025 26000PE"));

    let sent = notifier.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].instrument_key, InstrumentKey::spot("NIFTY"));
    assert_eq!(sent[0].status, SignalStatus::Buy);
    assert_eq!(report.alerts_sent, 1);
}

#[tokio::test]
async fn test_repeat_status_is_not_realerted() {
    let notifier = Arc::new(RecordingNotifier::default());
    let orch = orchestrator(&["NIFTY"], notifier.clone());

    let first = orch.run_cycle().await;
    let second = orch.run_cycle().await;

    assert_eq!(first.alerts_sent, 1);
    assert_eq!(second.alerts_sent, 0);
    let spot = second.instrument(&InstrumentKey::spot("NIFTY")).unwrap();
    assert_eq!(spot.status, SignalStatus::Buy);
    assert!(!spot.alerted);
    assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    assert_eq!(
        orch.last_emitted(&InstrumentKey::spot("NIFTY")).await,
        Some(SignalStatus::Buy)
    );
}

#[tokio::test]
async fn test_failing_underlying_is_isolated() {
    let notifier = Arc::new(RecordingNotifier::default());
    let orch = orchestrator(&["NIFTY", FAILING], notifier.clone());

    let report = orch.run_cycle().await;
    assert_eq!(report.instruments.len(), 6);
    assert_eq!(report.failures, 3);

    for key in [
        InstrumentKey::spot(FAILING),
        InstrumentKey::call(FAILING),
        InstrumentKey::put(FAILING),
    ] {
        let payload = report.instrument(&key).unwrap();
        assert_eq!(payload.status, SignalStatus::Wait);
        assert!(payload.failure.as_deref().unwrap().contains("endpoint down"));
        assert!(!payload.alerted);
    }
    let spot = report.instrument(&InstrumentKey::spot("NIFTY")).unwrap();
    assert_eq!(spot.status, SignalStatus::Buy);
    assert_eq!(notifier.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_notifier_failure_does_not_abort_cycle() {
    let orch = orchestrator(&["NIFTY"], Arc::new(BrokenNotifier));

    let report = orch.run_cycle().await;
    assert_eq!(report.alerts_sent, 0);
    assert_eq!(report.instruments.len(), 3);
    assert!(!report.instrument(&InstrumentKey::spot("NIFTY")).unwrap().alerted);
    assert!(orch.latest().await.is_some());
    // Undelivered, so the next cycle may try again
    assert_eq!(orch.last_emitted(&InstrumentKey::spot("NIFTY")).await, None);
}

#[tokio::test]
async fn test_stalled_alert_is_delivered_next_cycle() {
    let notifier = Arc::new(StallOnceNotifier::default());
    let orch = orchestrator_with(short_limits(&["NIFTY"]), notifier.clone());
    let key = InstrumentKey::spot("NIFTY");

    let first = tokio::time::timeout(Duration::from_secs(2), orch.run_cycle())
        .await
        .expect("a stalled send must not hold up the cycle");
    assert_eq!(first.alerts_sent, 0);
    assert!(!first.instrument(&key).unwrap().alerted);
    assert!(notifier.sent.lock().unwrap().is_empty());
    assert_eq!(orch.last_emitted(&key).await, None);

    let second = orch.run_cycle().await;
    assert_eq!(second.alerts_sent, 1);
    assert!(second.instrument(&key).unwrap().alerted);
    assert_eq!(orch.last_emitted(&key).await, Some(SignalStatus::Buy));

    let sent = notifier.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status, SignalStatus::Buy);
}

#[tokio::test]
async fn test_hung_underlying_times_out_alone() {
    let orch = orchestrator_with(
        short_limits(&["NIFTY", HANGING]),
        Arc::new(RecordingNotifier::default()),
    );

    let report = tokio::time::timeout(Duration::from_secs(3), orch.run_cycle())
        .await
        .expect("cycle must finish while one underlying hangs");
    assert_eq!(report.instruments.len(), 6);
    assert_eq!(report.failures, 3);
    assert!(report.duration_ms < STALL.as_millis() as u64);

    let spot = report.instrument(&InstrumentKey::spot("NIFTY")).unwrap();
    assert_eq!(spot.status, SignalStatus::Buy);
    assert!(spot.alerted);

    for key in [
        InstrumentKey::spot(HANGING),
        InstrumentKey::call(HANGING),
        InstrumentKey::put(HANGING),
    ] {
        let payload = report.instrument(&key).unwrap();
        assert_eq!(payload.status, SignalStatus::Wait);
        assert!(payload.failure.as_deref().unwrap().contains("timed out"));
    }
    // The chain answered, so the leg still names its contract
    let call = report.instrument(&InstrumentKey::call(HANGING)).unwrap();
    assert_eq!(call.contract.as_deref(), Some("FINNIFTY 30-Dec-2025 26000CE"));
    assert!(orch.latest().await.is_some());
}

#[tokio::test]
async fn test_run_forever_publishes_while_one_underlying_hangs() {
    let orch = orchestrator_with(
        short_limits(&["NIFTY", HANGING]),
        Arc::new(RecordingNotifier::default()),
    );
    let handle = tokio::spawn(Arc::clone(&orch).run_forever());

    let report = wait_for_report(&orch, Duration::from_millis(1500)).await;
    handle.abort();

    let report = report.expect("healthy underlying never published");
    let spot = report.instrument(&InstrumentKey::spot("NIFTY")).unwrap();
    assert_eq!(spot.status, SignalStatus::Buy);
    assert!(report.instrument(&InstrumentKey::spot(HANGING)).unwrap().failure.is_some());
}

#[tokio::test]
async fn test_run_forever_publishes_reports() {
    let orch = orchestrator(&["NIFTY"], Arc::new(RecordingNotifier::default()));
    let handle = tokio::spawn(Arc::clone(&orch).run_forever());

    let published = wait_for_report(&orch, Duration::from_secs(1)).await;
    handle.abort();
    assert!(published.is_some());
}

// -----------------------------------------------
// HTTP API
// -----------------------------------------------

async fn call(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_api_routes() {
    let orch = orchestrator(&["NIFTY"], Arc::new(RecordingNotifier::default()));
    let app = router(orch);

    let (status, body) = call(&app, "GET", "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["strategy"], "macd_zero_cross");
    assert!(body["data"]["last_cycle_at"].is_null());

    let (_, body) = call(&app, "GET", "/api/signals").await;
    assert_eq!(body["success"], false);

    let (status, body) = call(&app, "POST", "/api/refresh").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["instruments"].as_array().unwrap().len(), 3);

    let (_, body) = call(&app, "GET", "/api/signals/nifty-spot").await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["instrument_key"], "NIFTY-SPOT");
    assert_eq!(body["data"]["status"], "buy");

    let (_, body) = call(&app, "GET", "/api/signals/NIFTY-CE").await;
    assert_eq!(body["data"]["selection"]["strike"], 26_000.0);

    let (_, body) = call(&app, "GET", "/api/signals/NIFTY-XX").await;
    assert_eq!(body["success"], false);

    let (_, body) = call(&app, "GET", "/api/signals/SENSEX-SPOT").await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_refresh_endpoint_returns_while_one_underlying_hangs() {
    let orch = orchestrator_with(
        short_limits(&["NIFTY", HANGING]),
        Arc::new(RecordingNotifier::default()),
    );
    let app = router(orch);

    let (status, body) = tokio::time::timeout(
        Duration::from_secs(3),
        call(&app, "POST", "/api/refresh"),
    )
    .await
    .expect("refresh must answer while one underlying hangs");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["instruments"].as_array().unwrap().len(), 6);
    assert_eq!(body["data"]["failures"], 3);
}
