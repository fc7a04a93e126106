//! Signal handling for graceful server shutdown.
//!
//! SIGINT and SIGTERM on Unix, Ctrl+C on Windows.

use replica_core::ShutdownState;
use tokio::signal;
use tracing::info;

/// Waits for a termination signal, then initiates `shutdown`.
pub async fn setup_signal_handlers(shutdown: &ShutdownState) -> Result<(), Box<dyn std::error::Error>> {
    wait_for_signal().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");
    shutdown.initiate();
    Ok(())
}

/// Waits for a termination signal without touching any shared state.
pub async fn wait_for_signal() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    Ok(())
}
