pub mod api_server;
pub mod app_config;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod market;
pub mod orchestrator;
pub mod utility;

// Re-exports for convenience
pub use app_config::{AppConfig, Mode};
pub use commands::SignalCommands;
pub use error::{SignalError, SignalResult};
pub use orchestrator::{CycleReport, EngineConfig, InstrumentPayload, RefreshOrchestrator};
