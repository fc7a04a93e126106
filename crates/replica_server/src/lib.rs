//! # Replica Server
//!
//! Process host for [`replica_core`]: parses the command line, loads the TOML
//! configuration, installs logging and runs the object server's fixed-rate
//! simulation loop until a termination signal arrives.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (creates config.toml if missing)
//! replica-server
//!
//! # Custom configuration and a faster simulation
//! replica-server --config arena.toml --tick-rate 60
//!
//! # JSON logging for production
//! replica-server --json-logs --log-level debug
//! ```
//!
//! ## Signal Handling
//!
//! SIGINT and SIGTERM start a graceful shutdown: the simulation loop stops,
//! every channel is disconnected and final statistics are logged. A second
//! signal exits immediately.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Entry point called from `main`.
///
/// Exits the process with status 1 if startup or the run fails.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging settings come from the file before CLI overrides are merged
    let config = AppConfig::load_from_file(&args.config_path).await.unwrap_or_default();
    let mut logging_settings = config.logging;
    if let Some(level) = &args.log_level {
        logging_settings.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging_settings, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{LoggingSettings, ServerSettings};
