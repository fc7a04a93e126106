//! Main application logic and lifecycle management.
//!
//! The `Application` owns the object server and the router it talks
//! through, drives the simulation loop in the background and coordinates a
//! phased shutdown when a termination signal arrives.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{setup_signal_handlers, wait_for_signal},
};
use replica_core::{ChannelRouter, ObjectServer, OutboundMessage, ShutdownState, StaticAuthenticator};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// The running replica server process.
pub struct Application {
    config: AppConfig,
    server: Arc<ObjectServer>,
    router: Arc<ChannelRouter>,
    upstream: UnboundedReceiver<OutboundMessage>,
}

impl Application {
    /// Loads configuration, applies CLI overrides, validates the result and
    /// builds the object server.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(tick_rate) = args.tick_rate {
            config.simulation.tick_rate_hz = tick_rate;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let (router, upstream) = ChannelRouter::new();
        let router = Arc::new(router);
        let authenticator = StaticAuthenticator::new(&config.login);
        info!("🔑 Authenticator knows {} accounts", authenticator.account_count());

        let server = ObjectServer::builder(router.clone())
            .config(config.to_core_config())
            .authenticator(Arc::new(authenticator))
            .build()?;

        Ok(Self {
            config,
            server: Arc::new(server),
            router,
            upstream,
        })
    }

    /// Bootstraps the topology, runs until a termination signal and shuts
    /// down in phases.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting replica server '{}'", self.config.server.name);
        self.log_configuration_summary();

        let Application {
            config,
            server,
            router,
            mut upstream,
        } = self;

        server.bootstrap().await?;

        // Without a transport attached, upstream traffic is only logged
        let forwarded = Arc::new(AtomicU64::new(0));
        let upstream_handle = {
            let forwarded = forwarded.clone();
            tokio::spawn(async move {
                while let Some(message) = upstream.recv().await {
                    forwarded.fetch_add(1, Ordering::Relaxed);
                    match serde_json::to_string(&message) {
                        Ok(json) => debug!("📨 upstream {}", json),
                        Err(e) => warn!("⚠️ Unserializable upstream message {:?}: {}", message, e),
                    }
                }
            })
        };

        let shutdown = ShutdownState::default();
        let server_handle = {
            let server = server.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.run(shutdown).await })
        };

        let monitoring_handle = (config.server.health_interval_secs > 0).then(|| {
            let server = server.clone();
            let router = router.clone();
            let forwarded = forwarded.clone();
            let name = config.server.name.clone();
            let period = Duration::from_secs(config.server.health_interval_secs);
            tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately
                ticker.tick().await;
                let mut last_forwarded = 0u64;

                loop {
                    ticker.tick().await;
                    let stats = server.stats().await;
                    let total = forwarded.load(Ordering::Relaxed);
                    info!(
                        "📊 {} health - {} objects | {} views | {} channels ({} attached) | {} upstream msgs this period",
                        name,
                        stats.objects,
                        stats.views,
                        stats.channels,
                        router.attached(),
                        total - last_forwarded
                    );
                    last_forwarded = total;
                }
            })
        });

        info!("✅ Replica server is now running!");
        if monitoring_handle.is_some() {
            info!(
                "🔍 Health monitoring active - stats every {} seconds",
                config.server.health_interval_secs
            );
        }
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        setup_signal_handlers(&shutdown).await?;

        // A second signal skips the graceful path
        tokio::spawn(async move {
            if let Err(e) = wait_for_signal().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }
            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        info!("📡 Phase 1: Stopping health monitoring...");
        if let Some(handle) = monitoring_handle {
            handle.abort();
        }

        info!("⏳ Phase 2: Draining the simulation loop...");
        let limit = Duration::from_secs(config.server.shutdown_timeout_secs);
        match timeout(limit, server_handle).await {
            Ok(Ok(())) => info!("✅ Simulation loop stopped"),
            Ok(Err(e)) => error!("❌ Simulation loop task failed: {}", e),
            Err(_) => warn!("⏰ Simulation loop did not stop within {:?}, proceeding", limit),
        }
        if !shutdown.is_complete() {
            warn!("⚠️ Shutdown finished without the loop completing cleanup");
        }

        info!("🧹 Phase 3: Flushing upstream messages...");
        tokio::task::yield_now().await;
        upstream_handle.abort();

        log_final_statistics(&server, forwarded.load(Ordering::Relaxed)).await;
        info!("✅ Replica server shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        let simulation = &self.config.simulation;
        info!("📋 Configuration Summary:");
        info!("  🏷️ Server name: {}", self.config.server.name);
        info!("  🕒 Tick rate: {} Hz", simulation.tick_rate_hz);
        info!(
            "  🏃 Move speed: {} u/s | Turn speed: {} deg/s | Arena: ±{}",
            simulation.move_speed, simulation.rotation_speed, simulation.arena_bound
        );
        info!(
            "  🔢 Avatar ids: {}..={}",
            self.config.allocator.min_id, self.config.allocator.max_id
        );
    }
}

async fn log_final_statistics(server: &ObjectServer, forwarded: u64) {
    let stats = server.stats().await;
    info!("📊 Final Statistics:");
    info!("  - Ticks run: {}", stats.ticks);
    info!("  - Objects still hosted: {}", stats.objects);
    info!("  - Ids in use: {}", stats.ids_in_use);
    info!("  - Upstream messages: {}", forwarded);
}
