use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use rollcall_core::collab::{Notifier, RosterSource};
use rollcall_core::config::RollcallConfig;
use rollcall_core::events::SessionCreated;
use rollcall_core::time::SystemClock;
use tracing::info;

mod app;
mod broadcast;
mod http;
mod migrations;
mod notify;

/// Day-order scheduling and attendance session server.
#[derive(Debug, Parser)]
#[command(name = "rollcall-gateway", version)]
struct Cli {
    /// Path to rollcall.toml (default: ~/.rollcall/rollcall.toml).
    #[arg(long, env = "ROLLCALL_CONFIG")]
    config: Option<String>,

    /// Run one materialization pass for the configured units and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rollcall_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = RollcallConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        RollcallConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    ensure_parent_dir(&config.database.path);
    info!(path = %config.database.path, "opening SQLite database");

    // Created-session channel: materializer / manual create → notifier task
    let (events_tx, events_rx) = tokio::sync::mpsc::channel::<SessionCreated>(256);
    let state = Arc::new(app::AppState::open(config, Arc::new(SystemClock), events_tx)?);

    if cli.once {
        let report = state.engine().tick();
        info!(?report, "single materialization pass complete");
        return Ok(());
    }

    let notifier: Arc<dyn Notifier> = Arc::new(notify::LogNotifier::new(state.broadcaster.clone()));
    let roster: Arc<dyn RosterSource> = state.directory.clone();
    tokio::spawn(notify::deliver(events_rx, notifier, roster));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    if state.config.materializer.enabled {
        let engine = state.engine();
        tokio::spawn(async move { engine.run(shutdown_rx).await });
    } else {
        info!("materializer engine disabled");
    }

    let router = app::build_router(state.clone());
    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Rollcall gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // signal the engine to stop
    let _ = shutdown_tx.send(true);
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
