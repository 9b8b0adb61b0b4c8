//! Control-plane server: config -> store -> hub -> background loops ->
//! HTTP/WebSocket surface.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flotilla_api::{build_router, AppState, StoreEventSink};
use flotilla_common::{FleetConfig, Mode};
use flotilla_control::{DashboardScanner, TaskManager, TopologyManager};
use flotilla_hub::Hub;
use flotilla_storage::{
    FleetStore, MemoryMetrics, MemoryStore, MetricsProvider, PostgresMetrics, PostgresStore,
};

#[derive(Debug, Parser)]
#[command(name = "flotilla-server", about = "Fleet management control plane")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "FLOTILLA_CONFIG")]
    config: Option<String>,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => FleetConfig::load(path).with_context(|| format!("loading {path}"))?,
        None => FleetConfig::default(),
    };
    let bind = args.bind.unwrap_or_else(|| config.server.bind_addr.clone());

    let (store, metrics): (Arc<dyn FleetStore>, Arc<dyn MetricsProvider>) = match config.mode {
        Mode::Prod => {
            let url = config
                .server
                .database_url
                .clone()
                .context("PROD mode requires server.database_url")?;
            let postgres = PostgresStore::new(&url).await?;
            postgres.run_migrations().await?;
            let pool = postgres.pool().clone();
            (Arc::new(postgres), Arc::new(PostgresMetrics::new(pool)))
        }
        Mode::Dev => {
            info!("DEV mode: in-memory store and metrics");
            (Arc::new(MemoryStore::new()), Arc::new(MemoryMetrics::new()))
        }
    };

    let sink = Arc::new(StoreEventSink::new(store.clone(), metrics.clone()));
    let hub = Arc::new(Hub::new(sink));
    let tasks = Arc::new(TaskManager::new(store.clone()));
    let topology = Arc::new(TopologyManager::new(
        hub.clone(),
        store.clone(),
        config.topology.clone(),
    ));
    let scanner = Arc::new(DashboardScanner::new(
        hub.clone(),
        store.clone(),
        tasks.clone(),
        metrics,
        config.scanner.clone(),
    ));

    let cancel = CancellationToken::new();
    let topology_loop = topology.clone().start_background_refresh(cancel.clone());
    let scanner_loop = scanner.clone().start(cancel.clone());

    let state = AppState {
        hub,
        store,
        tasks,
        topology,
        scanner,
        config: Arc::new(config),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    cancel.cancel();
    let _ = topology_loop.await;
    let _ = scanner_loop.await;
    Ok(())
}
