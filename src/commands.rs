use crate::api_server;
use crate::app_config::AppConfig;
use crate::engine::candles::aggregate_raw;
use crate::engine::models::{BarSeries, RawSample, SignalKind, SignalStatus};
use crate::engine::strategy::Evaluation;
use crate::error::SignalResult;
use crate::market::{HttpMarketData, LogNotifier, Notifier, WebhookNotifier, WeekdayCalendar};
use crate::orchestrator::{CycleReport, EngineConfig, RefreshOrchestrator};
use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Recorded history: a bare array of rows, or a gateway envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayFile {
    Rows(Vec<RawSample>),
    Envelope {
        #[serde(rename = "Success")]
        success: Vec<RawSample>,
    },
}

/// Aggregate recorded samples and evaluate them with the configured strategy.
pub fn replay_samples(
    rows: &[RawSample],
    config: &EngineConfig,
) -> SignalResult<(BarSeries, Evaluation)> {
    let series = aggregate_raw(rows, config.bucket_width())?;
    let evaluation = config.strategy.evaluate(&series.bars, config.tail_len);
    Ok((series, evaluation))
}

pub fn load_replay_file(path: &Path) -> Result<Vec<RawSample>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay file {}", path.display()))?;
    let parsed: ReplayFile = serde_json::from_str(&text)
        .with_context(|| format!("Replay file {} is not a list of samples", path.display()))?;
    Ok(match parsed {
        ReplayFile::Rows(rows) => rows,
        ReplayFile::Envelope { success } => success,
    })
}

/// Signal command handler - one entry point per execution mode
pub struct SignalCommands;

impl SignalCommands {
    pub fn build_orchestrator(app: &AppConfig) -> Result<Arc<RefreshOrchestrator>> {
        let source = HttpMarketData::new(&app.gateway_url, app.session_token.as_deref())?;
        let notifier: Arc<dyn Notifier> = match &app.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
            None => Arc::new(LogNotifier),
        };
        Ok(Arc::new(RefreshOrchestrator::new(
            Arc::new(source),
            Arc::new(WeekdayCalendar::new(app.expiry_weekday)),
            notifier,
            app.engine.clone(),
        )))
    }

    /// Poll loop in the background, HTTP API in the foreground
    pub async fn run_server(app: &AppConfig) -> Result<()> {
        Self::banner("Nifty Signal Server");
        let orchestrator = Self::build_orchestrator(app)?;
        tokio::spawn(Arc::clone(&orchestrator).run_forever());
        api_server::start_server(orchestrator, app.port).await
    }

    /// Run a single refresh cycle and print the result
    pub async fn run_once(app: &AppConfig) -> Result<()> {
        Self::banner("Nifty Signal Refresh");
        println!("{} Gateway: {}", "→".cyan(), app.gateway_url.yellow());
        println!("{} Strategy: {}", "→".cyan(), app.engine.strategy.name().yellow());
        println!();

        let orchestrator = Self::build_orchestrator(app)?;
        let report = orchestrator.run_cycle().await;

        Self::display_report(&report);
        Ok(())
    }

    /// Evaluate a recorded sample file offline
    pub fn run_replay(app: &AppConfig) -> Result<()> {
        Self::banner("Nifty Signal Replay");
        let path = app
            .replay_file
            .as_deref()
            .context("Replay mode needs SIGNAL_REPLAY_FILE")?;

        let rows = load_replay_file(path)?;
        let (series, evaluation) = replay_samples(&rows, &app.engine)?;
        info!(samples = rows.len(), bars = series.len(), "replay aggregated");

        println!("{} Samples: {}", "✓".green(), rows.len());
        println!(
            "{} Bars: {} x {}m",
            "✓".green(),
            series.len(),
            series.bucket_width().num_minutes()
        );
        println!("{} Strategy: {}", "✓".green(), app.engine.strategy.name());
        println!();

        println!("{}", "Signal events".cyan().bold());
        if evaluation.events.is_empty() {
            println!("  {} none", "ℹ".blue());
        }
        for event in &evaluation.events {
            let kind = match event.kind {
                SignalKind::Buy => "BUY ".green().bold(),
                SignalKind::Sell => "SELL".red().bold(),
            };
            println!(
                "  {} bar {:>4} @ {}",
                kind,
                event.bar_index,
                event.bar_start.format("%Y-%m-%d %H:%M")
            );
        }
        println!();

        let price = evaluation
            .last_price
            .map(|p| format!("{:.2}", p))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} Current status: {} (last price {})",
            "→".cyan(),
            paint(evaluation.status),
            price
        );
        println!("{}", "=".repeat(60).blue());
        Ok(())
    }

    fn banner(title: &str) {
        println!("{}", "=".repeat(60).blue());
        println!("{}", title.green().bold());
        println!("{}", "=".repeat(60).blue());
        println!();
    }

    fn display_report(report: &CycleReport) {
        println!("{}", "=".repeat(60).blue());
        println!("{}", "Summary".cyan().bold());
        println!("{}", "=".repeat(60).blue());
        println!("{} Expiry: {}", "ℹ".blue(), report.expiry.format("%d-%b-%Y"));

        for payload in &report.instruments {
            let subject = payload
                .contract
                .clone()
                .unwrap_or_else(|| payload.instrument_key.to_string());
            let price = payload
                .last_price
                .map(|p| format!("{:.2}", p))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<12} {:<10} {:>10}  {}",
                payload.instrument_key.to_string().yellow(),
                paint(payload.status),
                price,
                subject
            );
            if let Some(failure) = &payload.failure {
                println!("    {} {}", "✗".red(), failure.chars().take(80).collect::<String>());
            } else if let Some(note) = &payload.note {
                println!("    {} {}", "ℹ".blue(), note);
            }
        }

        println!();
        println!("{} Alerts sent: {}", "✓".green(), report.alerts_sent);
        println!("{} Failed: {}", "✗".red(), report.failures);
        println!("{} Time taken: {:.2}s", "⏱".yellow(), report.duration_ms as f64 / 1000.0);
        println!("{}", "=".repeat(60).blue());
    }

    /// Print usage instructions
    pub fn print_usage() {
        eprintln!("Set SIGNAL_MODE to control execution mode");
        eprintln!("Examples:");
        eprintln!("  SIGNAL_MODE=server SIGNAL_PORT=3001 nifty-signals   # Poll loop + API");
        eprintln!("  SIGNAL_MODE=once nifty-signals                      # One refresh cycle");
        eprintln!("  SIGNAL_MODE=replay SIGNAL_REPLAY_FILE=day.json nifty-signals");
    }
}

fn paint(status: SignalStatus) -> ColoredString {
    match status {
        SignalStatus::Buy => status.as_str().green().bold(),
        SignalStatus::HoldBuy => status.as_str().green(),
        SignalStatus::Sell => status.as_str().red().bold(),
        SignalStatus::HoldSell => status.as_str().red(),
        SignalStatus::Neutral | SignalStatus::Wait => status.as_str().dimmed(),
    }
}
