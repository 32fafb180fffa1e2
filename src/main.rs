//! Crashcore server binary.

use clap::Parser;
use crashcore::api::{create_router, AppState};
use crashcore::config::CrashcoreConfig;
use crashcore::events::EventBus;
use crashcore::round::engine::CrashRoundEngine;
use crashcore::scheduler::RoundScheduler;
use crashcore::settlement::coordinator::SettlementCoordinator;
use crashcore::settlement::ledger::{HttpLedgerClient, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crashcore")]
#[command(about = "Provably-fair crash round server", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// HTTP bind host (overrides configuration)
    #[arg(long)]
    host: Option<String>,

    /// HTTP bind port (overrides configuration)
    #[arg(long)]
    port: Option<u16>,

    /// External ledger base URL (overrides configuration)
    #[arg(long)]
    ledger_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => CrashcoreConfig::load(path)?,
        None => CrashcoreConfig::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ledger_url) = args.ledger_url {
        config.ledger.base_url = ledger_url;
    }
    config.validate()?;

    let events = EventBus::new(1024);
    let engine = Arc::new(CrashRoundEngine::new(&config.round)?);
    let ledger = Arc::new(HttpLedgerClient::new(
        &config.ledger.base_url,
        RetryPolicy {
            max_attempts: config.ledger.retry.max_attempts,
            initial_backoff: Duration::from_millis(config.ledger.retry.initial_backoff_ms),
            request_timeout: Duration::from_millis(config.ledger.request_timeout_ms),
        },
    )?);
    let coordinator = Arc::new(SettlementCoordinator::new(
        engine.clone(),
        ledger,
        events.clone(),
        &config,
    ));
    let scheduler = RoundScheduler::new(
        engine.clone(),
        coordinator.clone(),
        events.clone(),
        config.round.clone(),
    );
    let scheduler_task = scheduler.spawn();

    let state = Arc::new(AppState {
        engine,
        coordinator,
        scheduler: scheduler.clone(),
        events,
        version: env!("CARGO_PKG_VERSION").to_string(),
    });
    let router = create_router(state, &config.server);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("crashcore listening on {}", addr);
    info!("settling against ledger at {}", config.ledger.base_url);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    scheduler.stop();
    let _ = scheduler_task.await;
    Ok(())
}
