use crate::config;
use crate::engine::indicators::{MacdParams, SupertrendParams};
use crate::engine::strategy::Strategy;
use crate::engine::strikes::{PremiumBand, StrikeFilter};
use crate::market::source::ExpiryKind;
use crate::orchestrator::EngineConfig;
use anyhow::{anyhow, bail, Context, Result};
use chrono::Weekday;
use colored::Colorize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Poll loop plus HTTP API.
    Server,
    /// One cycle, printed summary.
    Once,
    /// Evaluate a file of recorded samples.
    Replay,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(Mode::Server),
            "once" => Ok(Mode::Once),
            "replay" => Ok(Mode::Replay),
            other => bail!("Unknown mode '{}': use server, once or replay", other),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Mode::Server => "server",
            Mode::Once => "once",
            Mode::Replay => "replay",
        })
    }
}

/// Runtime configuration assembled from `SIGNAL_*` environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: Mode,
    pub port: u16,
    pub gateway_url: String,
    pub session_token: Option<String>,
    pub webhook_url: Option<String>,
    pub expiry_weekday: Weekday,
    pub replay_file: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to the defaults in
    /// `config`, malformed ones are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mode = match get("SIGNAL_MODE") {
            Some(raw) => raw.parse()?,
            None => Mode::Server,
        };

        let underlyings = match get("SIGNAL_UNDERLYINGS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None => config::DEFAULT_UNDERLYINGS.iter().map(|s| s.to_string()).collect(),
        };

        let band = match get("SIGNAL_PREMIUM_BAND") {
            Some(raw) => {
                let [min, max] = parse_list::<f64, 2>("SIGNAL_PREMIUM_BAND", &raw)?;
                Some(PremiumBand::new(min, max)?)
            }
            None => None,
        };

        let strategy = match get("SIGNAL_STRATEGY").as_deref().unwrap_or("macd") {
            "macd" => {
                let params = match get("SIGNAL_MACD") {
                    Some(raw) => {
                        let [fast, slow, signal] = parse_list::<usize, 3>("SIGNAL_MACD", &raw)?;
                        MacdParams { fast, slow, signal }
                    }
                    None => MacdParams::default(),
                };
                Strategy::MacdZeroCross(params)
            }
            "supertrend" => {
                let params = match get("SIGNAL_SUPERTREND") {
                    Some(raw) => {
                        let [period, multiplier] =
                            parse_list::<f64, 2>("SIGNAL_SUPERTREND", &raw)?;
                        if period.fract() != 0.0 || period < 1.0 {
                            bail!(
                                "SIGNAL_SUPERTREND period must be a positive integer, got {}",
                                period
                            );
                        }
                        SupertrendParams { period: period as usize, multiplier }
                    }
                    None => SupertrendParams::default(),
                };
                Strategy::SupertrendFlip(params)
            }
            other => bail!("Unknown SIGNAL_STRATEGY '{}': use macd or supertrend", other),
        };

        let expiry_kind = match get("SIGNAL_EXPIRY").as_deref().unwrap_or("monthly") {
            "monthly" => ExpiryKind::Monthly,
            "weekly" => ExpiryKind::Weekly,
            other => bail!("Unknown SIGNAL_EXPIRY '{}': use monthly or weekly", other),
        };

        let scan_width: u32 = parse_or(&get, "SIGNAL_SCAN_WIDTH", config::DEFAULT_SCAN_WIDTH)?;
        let instrument_timeout: u64 = parse_or(
            &get,
            "SIGNAL_INSTRUMENT_TIMEOUT_SECS",
            config::DEFAULT_INSTRUMENT_TIMEOUT_SECS,
        )?;
        let notify_timeout: u64 =
            parse_or(&get, "SIGNAL_NOTIFY_TIMEOUT_SECS", config::DEFAULT_NOTIFY_TIMEOUT_SECS)?;
        if notify_timeout == 0 {
            bail!("SIGNAL_NOTIFY_TIMEOUT_SECS must be positive");
        }

        let engine = EngineConfig {
            underlyings,
            strike_step: parse_or(&get, "SIGNAL_STRIKE_STEP", config::DEFAULT_STRIKE_STEP)?,
            scan_width: (scan_width > 0).then_some(scan_width),
            target_premium: parse_or(
                &get,
                "SIGNAL_TARGET_PREMIUM",
                config::DEFAULT_TARGET_PREMIUM,
            )?,
            strike_filter: StrikeFilter {
                band,
                round_to: get("SIGNAL_ROUND_STRIKE")
                    .map(|raw| parse_value("SIGNAL_ROUND_STRIKE", &raw))
                    .transpose()?,
            },
            strategy,
            expiry_kind,
            sample_interval: get("SIGNAL_SAMPLE_INTERVAL")
                .unwrap_or_else(|| config::DEFAULT_SAMPLE_INTERVAL.to_string()),
            bucket_minutes: parse_or(
                &get,
                "SIGNAL_BUCKET_MINUTES",
                config::DEFAULT_BUCKET_MINUTES,
            )?,
            history_days: parse_or(&get, "SIGNAL_HISTORY_DAYS", config::DEFAULT_HISTORY_DAYS)?,
            tail_len: parse_or(&get, "SIGNAL_TAIL_LEN", config::DEFAULT_TAIL_LEN)?,
            refresh_interval: Duration::from_secs(parse_or(
                &get,
                "SIGNAL_REFRESH_SECS",
                config::DEFAULT_REFRESH_SECS,
            )?),
            instrument_timeout: (instrument_timeout > 0)
                .then(|| Duration::from_secs(instrument_timeout)),
            notify_timeout: Duration::from_secs(notify_timeout),
        };

        let expiry_weekday = match get("SIGNAL_EXPIRY_WEEKDAY") {
            Some(raw) => raw
                .parse::<Weekday>()
                .map_err(|_| anyhow!("SIGNAL_EXPIRY_WEEKDAY '{}' is not a weekday", raw))?,
            None => Weekday::Tue,
        };

        let app = Self {
            mode,
            port: parse_or(&get, "SIGNAL_PORT", config::DEFAULT_PORT)?,
            gateway_url: get("SIGNAL_GATEWAY_URL")
                .unwrap_or_else(|| config::DEFAULT_GATEWAY_URL.to_string()),
            session_token: get("SIGNAL_SESSION_TOKEN"),
            webhook_url: get("SIGNAL_WEBHOOK_URL"),
            expiry_weekday,
            replay_file: get("SIGNAL_REPLAY_FILE").map(PathBuf::from),
            engine,
        };
        app.validate()?;
        Ok(app)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.underlyings.is_empty() {
            bail!("SIGNAL_UNDERLYINGS must name at least one underlying");
        }
        if !(engine.strike_step.is_finite() && engine.strike_step > 0.0) {
            bail!("SIGNAL_STRIKE_STEP must be positive, got {}", engine.strike_step);
        }
        if !engine.target_premium.is_finite() {
            bail!("SIGNAL_TARGET_PREMIUM must be finite");
        }
        if engine.strike_filter.round_to == Some(0) {
            bail!("SIGNAL_ROUND_STRIKE must be positive");
        }
        if engine.bucket_minutes <= 0 {
            bail!("SIGNAL_BUCKET_MINUTES must be positive, got {}", engine.bucket_minutes);
        }
        if engine.history_days <= 0 {
            bail!("SIGNAL_HISTORY_DAYS must be positive, got {}", engine.history_days);
        }
        if engine.refresh_interval.is_zero() {
            bail!("SIGNAL_REFRESH_SECS must be positive");
        }
        match engine.strategy {
            Strategy::MacdZeroCross(p) => p.validate(),
            Strategy::SupertrendFlip(p) => p.validate(),
        }
        .context("Invalid strategy parameters")?;
        if self.mode == Mode::Replay && self.replay_file.is_none() {
            bail!("Replay mode needs SIGNAL_REPLAY_FILE");
        }
        Ok(())
    }

    /// Server mode is a long-running loop; CI runs a single cycle instead.
    pub fn effective_mode(&self) -> Mode {
        if self.mode == Mode::Server && config::is_ci_environment() {
            Mode::Once
        } else {
            self.mode
        }
    }

    /// Log configuration details for CI environments
    pub fn log_ci_config(&self) {
        if config::is_ci_environment() {
            println!("{}", "Running in CI environment".blue().bold());
            println!("{} Mode: {}", "→".cyan(), self.mode.to_string().yellow());
            if self.mode == Mode::Server {
                println!("{} Server mode not supported in CI - running one cycle", "⚠".yellow());
            }
            println!();
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| anyhow!("{} has invalid value '{}': {}", key, raw, e))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

/// Parse exactly `N` comma-separated values.
fn parse_list<T, const N: usize>(key: &str, raw: &str) -> Result<[T; N]>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let values = raw
        .split(',')
        .map(|part| parse_value::<T>(key, part.trim()))
        .collect::<Result<Vec<T>>>()?;
    let found = values.len();
    values
        .try_into()
        .map_err(|_| anyhow!("{} expects {} comma-separated values, got {}", key, N, found))
}
