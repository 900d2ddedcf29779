//! Stagelink Hub Server
//!
//! Message broker and plugin supervisor for live-broadcast tooling.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stagelink_hub::health::HealthMonitor;
use stagelink_hub::hub::Hub;
use stagelink_hub::server::create_router;
use stagelink_hub::supervisor::Supervisor;

/// Stagelink broadcast hub
#[derive(Parser, Debug)]
#[command(name = "stagelink-hub")]
#[command(about = "Message broker and plugin supervisor for live-broadcast tooling", long_about = None)]
struct Args {
    /// Bind host address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Bind port
    #[arg(long, default_value = "9500")]
    port: u16,

    /// Don't supervise local plugin processes
    #[arg(long)]
    no_supervisor: bool,

    /// Don't run the heartbeat health monitor
    #[arg(long)]
    no_health_monitor: bool,

    /// Path to the plugin configuration file
    #[arg(long, default_value = "config/plugins.json")]
    plugin_config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stagelink=info,tower_http=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("starting stagelink hub v{}", env!("CARGO_PKG_VERSION"));

    // A missing config file is replaced with a default; a malformed one
    // is fatal before we accept any connection.
    let supervisor = if args.no_supervisor {
        None
    } else {
        Some(
            Supervisor::load(&args.plugin_config)
                .await
                .context("failed to load plugin configuration")?,
        )
    };

    let hub = Arc::new(Hub::new(supervisor.clone()));
    tokio::spawn(Arc::clone(&hub).run());

    let health = if args.no_health_monitor {
        None
    } else {
        let monitor = HealthMonitor::new(Arc::clone(&hub), supervisor.clone());
        hub.set_health_monitor(Arc::clone(&monitor));
        tokio::spawn(Arc::clone(&monitor).run());
        Some(monitor)
    };

    if let Some(supervisor) = &supervisor {
        supervisor.auto_start().await;
    }

    let app = create_router(Arc::clone(&hub));
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid bind address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("hub listening on http://{addr}");
    info!("WebSocket endpoint: ws://{addr}/ws");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&hub), supervisor, health))
        .await?;

    info!("hub shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal, then wind the components down in order:
/// hub loop first (stops routing), then the supervisor (latches the
/// shutdown flag before killing children), then the health monitor.
async fn shutdown_signal(
    hub: Arc<Hub>,
    supervisor: Option<Arc<Supervisor>>,
    health: Option<Arc<HealthMonitor>>,
) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }

    hub.shutdown();
    if let Some(supervisor) = supervisor {
        supervisor.stop_all().await;
    }
    if let Some(health) = health {
        health.stop();
    }
}
