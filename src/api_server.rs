use crate::engine::models::InstrumentKey;
use crate::orchestrator::{CycleReport, InstrumentPayload, RefreshOrchestrator};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::info;

// -----------------------------------------------
// API RESPONSE MODELS
// -----------------------------------------------

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub processing_time_ms: Option<u64>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T, start_time: Instant) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            processing_time_ms: Some(start_time.elapsed().as_millis() as u64),
        }
    }

    fn fail(error: impl Into<String>, start_time: Instant) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            processing_time_ms: Some(start_time.elapsed().as_millis() as u64),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub strategy: &'static str,
    pub underlyings: Vec<String>,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, StatusCode>;

const NO_CYCLE_YET: &str = "No refresh cycle has completed yet";

// -----------------------------------------------
// API HANDLERS
// -----------------------------------------------

/// GET /api/health
async fn get_health(
    State(orchestrator): State<Arc<RefreshOrchestrator>>,
) -> ApiResult<HealthResponse> {
    let start_time = Instant::now();
    let config = orchestrator.config();
    let last_cycle_at = orchestrator.latest().await.map(|r| r.started_at);

    Ok(Json(ApiResponse::ok(
        HealthResponse {
            status: "ok",
            strategy: config.strategy.name(),
            underlyings: config.underlyings.clone(),
            last_cycle_at,
        },
        start_time,
    )))
}

/// GET /api/signals - latest cycle report
async fn get_signals(
    State(orchestrator): State<Arc<RefreshOrchestrator>>,
) -> ApiResult<CycleReport> {
    let start_time = Instant::now();
    match orchestrator.latest().await {
        Some(report) => Ok(Json(ApiResponse::ok(CycleReport::clone(&report), start_time))),
        None => Ok(Json(ApiResponse::fail(NO_CYCLE_YET, start_time))),
    }
}

/// GET /api/signals/{key} - one instrument, e.g. NIFTY-CE
async fn get_instrument_signal(
    Path(key): Path<String>,
    State(orchestrator): State<Arc<RefreshOrchestrator>>,
) -> ApiResult<InstrumentPayload> {
    let start_time = Instant::now();
    let key: InstrumentKey = match key.parse() {
        Ok(key) => key,
        Err(e) => return Ok(Json(ApiResponse::fail(e, start_time))),
    };

    let Some(report) = orchestrator.latest().await else {
        return Ok(Json(ApiResponse::fail(NO_CYCLE_YET, start_time)));
    };
    match report.instrument(&key) {
        Some(payload) => Ok(Json(ApiResponse::ok(payload.clone(), start_time))),
        None => Ok(Json(ApiResponse::fail(
            format!("{} is not tracked", key),
            start_time,
        ))),
    }
}

/// POST /api/refresh - run a cycle now and return its report. Bounded by the
/// per-instrument and per-alert limits, so a hung upstream cannot stall it.
async fn run_refresh(
    State(orchestrator): State<Arc<RefreshOrchestrator>>,
) -> ApiResult<CycleReport> {
    let start_time = Instant::now();
    let report = orchestrator.run_cycle().await;
    Ok(Json(ApiResponse::ok(CycleReport::clone(&report), start_time)))
}

// -----------------------------------------------
// SERVER SETUP
// -----------------------------------------------

pub fn router(orchestrator: Arc<RefreshOrchestrator>) -> Router {
    Router::new()
        .route("/api/health", get(get_health))
        .route("/api/signals", get(get_signals))
        .route("/api/signals/{key}", get(get_instrument_signal))
        .route("/api/refresh", post(run_refresh))
        .layer(CorsLayer::permissive())
        .with_state(orchestrator)
}

pub async fn start_server(orchestrator: Arc<RefreshOrchestrator>, port: u16) -> Result<()> {
    let app = router(orchestrator);

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(%addr, "signal API listening");
    println!("{} Signal API running on http://{}", "🚀".green(), addr);
    println!("{}", "📋 Available endpoints:".cyan());
    println!("   GET  /api/health");
    println!("   GET  /api/signals");
    println!("   GET  /api/signals/NIFTY-CE");
    println!("   POST /api/refresh");
    println!();

    axum::serve(listener, app).await?;
    Ok(())
}
