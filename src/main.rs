use anyhow::Result;
use colored::Colorize;
use nifty_signals::{logging, AppConfig, Mode, SignalCommands};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = logging::init_logging() {
        eprintln!("{} File logging disabled: {:#}", "⚠".yellow(), e);
    }

    let app = match AppConfig::from_env() {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red(), e);
            SignalCommands::print_usage();
            std::process::exit(2);
        }
    };
    app.log_ci_config();

    let mode = app.effective_mode();
    info!(%mode, underlyings = ?app.engine.underlyings, "starting");

    match mode {
        Mode::Server => SignalCommands::run_server(&app).await,
        Mode::Once => SignalCommands::run_once(&app).await,
        Mode::Replay => SignalCommands::run_replay(&app),
    }
}
