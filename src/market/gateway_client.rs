use super::source::{Instrument, MarketDataSource};
use crate::config;
use crate::engine::models::{parse_price, ChainSnapshot, OptionQuote, OptionRight, RawSample};
use crate::error::{SignalError, SignalResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, warn};

// -----------------------------------------------
// RESPONSE ENVELOPE
// -----------------------------------------------

/// `{"Success": [...], "Status": 200, "Error": null}`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "Success")]
    success: Option<Vec<T>>,
    #[serde(rename = "Status", default)]
    status: Option<i64>,
    #[serde(rename = "Error", default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteRow {
    #[serde(default)]
    ltp: Value,
}

#[derive(Debug, Deserialize)]
struct ChainRow {
    #[serde(default)]
    strike_price: Value,
    #[serde(default)]
    ltp: Value,
}

// -----------------------------------------------
// CLIENT WRAPPER
// -----------------------------------------------

/// JSON-over-HTTP market data gateway.
///
/// The gateway is expected to hold an authenticated broker session already;
/// this client only forwards an optional session token.
pub struct HttpMarketData {
    client: Client,
    base_url: String,
}

impl HttpMarketData {
    pub fn new(base_url: &str, session_token: Option<&str>) -> Result<Self> {
        Ok(Self {
            client: build_client(session_token)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Generic retry fetch: 429 and 5xx retry, other failures are final
    async fn fetch_json(&self, url: &str) -> Result<String> {
        let backoff = ExponentialBackoff::from_millis(config::RETRY_BASE_DELAY_MS)
            .factor(config::RETRY_FACTOR)
            .max_delay(Duration::from_secs(config::RETRY_MAX_DELAY_SECS))
            .map(jitter)
            .take(config::RETRY_MAX_ATTEMPTS);

        Retry::spawn(backoff, || async {
            let res = self
                .client
                .get(url)
                .send()
                .await
                .context("Request send failed")?;

            let status = res.status();
            debug!(url, status = status.as_u16(), "gateway response");

            if status.is_success() {
                let text = res.text().await.context("Failed to read body")?;
                let trimmed = text.trim();
                if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
                    let preview: String = text.chars().take(200).collect();
                    anyhow::bail!("Non-JSON response: {}", preview);
                }
                Ok(text)
            } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                warn!(url, status = status.as_u16(), "retryable gateway error");
                anyhow::bail!("Retryable error: {}", status)
            } else {
                let body = res.text().await.unwrap_or_default();
                let preview: String = body.chars().take(200).collect();
                anyhow::bail!("Client error {}: {}", status, preview)
            }
        })
        .await
    }

    async fn fetch_rows<T: DeserializeOwned>(&self, url: &str) -> SignalResult<Vec<T>> {
        let text = self.fetch_json(url).await?;
        let envelope: Envelope<T> = serde_json::from_str(&text)
            .map_err(|e| {
                SignalError::upstream(format!("Failed to parse gateway response: {}", e))
            })?;
        match envelope.success {
            Some(rows) => Ok(rows),
            None => Err(SignalError::upstream(format!(
                "gateway returned status {:?}: {}",
                envelope.status,
                envelope.error.unwrap_or_else(|| "no data".to_string())
            ))),
        }
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> String {
        let query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        format!("{}{}?{}", self.base_url, path, query.join("&"))
    }
}

#[async_trait]
impl MarketDataSource for HttpMarketData {
    async fn quote(&self, instrument: &Instrument) -> SignalResult<f64> {
        let url = self.url(config::GATEWAY_QUOTE_PATH, &instrument_params(instrument));
        let rows: Vec<QuoteRow> = self.fetch_rows(&url).await?;
        rows.first()
            .and_then(|row| parse_price(&row.ltp))
            .ok_or_else(|| SignalError::upstream(format!("no usable ltp for {}", instrument)))
    }

    async fn history(
        &self,
        instrument: &Instrument,
        interval: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SignalResult<Vec<RawSample>> {
        let mut params = instrument_params(instrument);
        params.push(("interval", interval.to_string()));
        params.push(("from_date", gateway_timestamp(from)));
        params.push(("to_date", gateway_timestamp(to)));

        let url = self.url(config::GATEWAY_HISTORY_PATH, &params);
        self.fetch_rows(&url).await
    }

    async fn chain(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        right: OptionRight,
    ) -> SignalResult<ChainSnapshot> {
        let params = vec![
            ("stock_code", underlying.to_string()),
            ("exchange_code", config::EXCHANGE_DERIVATIVES.to_string()),
            ("product_type", config::PRODUCT_OPTIONS.to_string()),
            ("expiry_date", gateway_expiry(expiry)),
            ("right", right.to_string()),
        ];
        let url = self.url(config::GATEWAY_CHAIN_PATH, &params);
        let rows: Vec<ChainRow> = self.fetch_rows(&url).await?;

        let total = rows.len();
        let quotes: Vec<OptionQuote> = rows
            .iter()
            .filter_map(|row| {
                let strike = parse_price(&row.strike_price)?;
                Some(OptionQuote { strike, right, premium: parse_price(&row.ltp) })
            })
            .collect();
        if quotes.len() < total {
            debug!(underlying, dropped = total - quotes.len(), "chain rows without strike");
        }

        Ok(ChainSnapshot {
            underlying: underlying.to_string(),
            expiry,
            right,
            quotes,
        })
    }
}

// -----------------------------------------------
// REQUEST PARAMETERS
// -----------------------------------------------

fn instrument_params(instrument: &Instrument) -> Vec<(&'static str, String)> {
    match instrument {
        Instrument::Index { symbol } => vec![
            ("stock_code", symbol.clone()),
            ("exchange_code", config::EXCHANGE_SPOT.to_string()),
        ],
        Instrument::Option { underlying, expiry, right, strike } => vec![
            ("stock_code", underlying.clone()),
            ("exchange_code", config::EXCHANGE_DERIVATIVES.to_string()),
            ("product_type", config::PRODUCT_OPTIONS.to_string()),
            ("expiry_date", gateway_expiry(*expiry)),
            ("right", right.to_string()),
            ("strike_price", format_strike(*strike)),
        ],
    }
}

fn gateway_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S.000Z").to_string()
}

fn gateway_expiry(expiry: NaiveDate) -> String {
    expiry.format("%Y-%m-%dT07:00:00.000Z").to_string()
}

fn format_strike(strike: f64) -> String {
    if strike.fract() == 0.0 {
        format!("{:.0}", strike)
    } else {
        strike.to_string()
    }
}

// -----------------------------------------------
// HTTP CLIENT BUILDER
// -----------------------------------------------
fn build_client(session_token: Option<&str>) -> Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    if let Some(token) = session_token {
        let mut value = header::HeaderValue::from_str(token)
            .context("Session token is not a valid header value")?;
        value.set_sensitive(true);
        headers.insert(config::HEADER_SESSION_TOKEN, value);
    }

    Client::builder()
        .default_headers(headers)
        .cookie_store(true)
        .user_agent(config::USER_AGENT)
        .timeout(config::HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}
