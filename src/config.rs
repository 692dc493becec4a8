use std::time::Duration;

// -----------------------------------------------
// MARKET DATA GATEWAY
// -----------------------------------------------
pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8080";
pub const GATEWAY_QUOTE_PATH: &str = "/api/quotes";
pub const GATEWAY_HISTORY_PATH: &str = "/api/historicalcharts";
pub const GATEWAY_CHAIN_PATH: &str = "/api/optionchain";

pub const EXCHANGE_SPOT: &str = "NSE";
pub const EXCHANGE_DERIVATIVES: &str = "NFO";
pub const PRODUCT_OPTIONS: &str = "options";

/// Header carrying an already-issued gateway session token.
pub const HEADER_SESSION_TOKEN: &str = "x-session-token";

// -----------------------------------------------
// HTTP CLIENT CONFIG
// -----------------------------------------------
pub const USER_AGENT: &str = concat!("nifty-signals/", env!("CARGO_PKG_VERSION"));
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

// -----------------------------------------------
// RETRY CONFIG
// -----------------------------------------------
pub const RETRY_BASE_DELAY_MS: u64 = 100;
pub const RETRY_FACTOR: u64 = 2;
pub const RETRY_MAX_DELAY_SECS: u64 = 3;
pub const RETRY_MAX_ATTEMPTS: usize = 3;

// -----------------------------------------------
// UNDERLYINGS
// -----------------------------------------------
pub const DEFAULT_UNDERLYINGS: &[&str] = &["NIFTY"];
pub const DEFAULT_STRIKE_STEP: f64 = 100.0;
/// Strikes scanned on each side of ATM.
pub const DEFAULT_SCAN_WIDTH: u32 = 5;

// -----------------------------------------------
// STRIKE SELECTION
// -----------------------------------------------
pub const DEFAULT_TARGET_PREMIUM: f64 = 100.0;

// -----------------------------------------------
// CANDLES AND HISTORY
// -----------------------------------------------
/// Gateway interval name for raw samples.
pub const DEFAULT_SAMPLE_INTERVAL: &str = "5minute";
pub const DEFAULT_BUCKET_MINUTES: i64 = 15;
pub const DEFAULT_HISTORY_DAYS: i64 = 10;
/// Closed indicator readings returned per instrument.
pub const DEFAULT_TAIL_LEN: usize = 5;

// -----------------------------------------------
// EXPIRY CALENDAR
// -----------------------------------------------
/// Market close; an expiry falling today is skipped after this time.
pub const EXPIRY_CUTOFF_HOUR: u32 = 15;
pub const EXPIRY_CUTOFF_MINUTE: u32 = 30;

// -----------------------------------------------
// REFRESH LOOP
// -----------------------------------------------
pub const DEFAULT_REFRESH_SECS: u64 = 300;
/// Per upstream step of one instrument; covers the client's own retries.
pub const DEFAULT_INSTRUMENT_TIMEOUT_SECS: u64 = 90;
/// Per alert send.
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 30;
/// Cycles slower than this get a warning.
pub const SLOW_CYCLE_THRESHOLD_MS: u128 = 10_000;
pub const SLOW_FETCH_THRESHOLD_MS: u128 = 3_000;

// -----------------------------------------------
// API SERVER
// -----------------------------------------------
pub const DEFAULT_PORT: u16 = 3001;

// -----------------------------------------------
// LOGGING
// -----------------------------------------------
pub const LOG_DIR: &str = "./logs";
pub const LOG_FILE_PREFIX: &str = "nifty-signals.log";

// -----------------------------------------------
// RUNTIME CONFIGURATION
// -----------------------------------------------

/// Check if running in CI/automated environment
pub fn is_ci_environment() -> bool {
    std::env::var("CI").is_ok() || std::env::var("GITHUB_ACTIONS").is_ok()
}
