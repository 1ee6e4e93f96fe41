//! barfeed-connector: interval bar collection binary
//!
//! Connects to the gateway's bar socket, subscribes to the configured
//! watches and persists completed bars into per-symbol tables.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use barfeed_connector_lib::{
    event_queue, run_server, BarRouter, BarStore, DailyLogWriter, FeedConnection, FeedError,
    LogNotifier, MemoryBarStore, PostgresBarStore, ServerState, WatchRequest,
};
use barfeed_metadata::{FeedConfig, WatchSpec};

#[derive(Parser, Debug)]
#[command(name = "barfeed-connector")]
#[command(about = "Interval bar collector for the market data gateway")]
struct Args {
    /// Path to feed configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Health server bind address (overrides the config file)
    #[arg(long)]
    health_addr: Option<String>,

    /// Directory for daily notice logs (overrides the config file)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = FeedConfig::load(&args.config)?;
    if let Some(addr) = args.health_addr {
        config.health_addr = addr;
    }
    if let Some(dir) = args.log_dir {
        config.notifier.log_dir = Some(dir);
    }
    info!(
        feed = %config.name,
        gateway = %config.gateway.addr(),
        watches = config.watches.len(),
        "Loaded feed configuration"
    );

    match config.database.url.clone() {
        Some(url) => {
            let store = PostgresBarStore::connect(&url).await.map_err(|e| {
                error!(error = %e, "Failed to connect to bar database");
                e
            })?;
            run(config, store).await
        }
        None => {
            warn!("No database configured, bars are kept in memory only");
            let store = MemoryBarStore::with_tables(config.symbols());
            run(config, store).await
        }
    }
}

async fn run<S>(config: FeedConfig, store: S) -> Result<(), Box<dyn std::error::Error>>
where
    S: BarStore + 'static,
{
    let health_addr: SocketAddr = config.health_addr.parse()?;

    let mut notifier = LogNotifier::new(&config.name);
    if let Some(dir) = &config.notifier.log_dir {
        info!(dir = %dir.display(), "Writing daily notice logs");
        notifier = notifier.with_file(DailyLogWriter::new(dir));
    }
    let notifier = Arc::new(notifier);

    let (tx, rx) = event_queue(config.queue.capacity);
    let mut router = BarRouter::new(
        &config.name,
        Arc::new(store),
        notifier.clone(),
        config.symbols(),
    )
    .persist_updates(config.queue.persist_updates)
    .start_listening(rx, Duration::from_secs(config.queue.join_timeout_secs));

    let mut conn = FeedConnection::new(&config.name, config.gateway.clone()).with_queue(tx);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_state = ServerState::new(&config.name, conn.health_handle());
    let server = tokio::spawn(async move {
        if let Err(e) = run_server(health_addr, server_state, shutdown_rx).await {
            error!(error = %e, "Health server error");
        }
    });
    info!(addr = %health_addr, "Health server started");

    let result = session(&mut conn, &config.watches).await;

    // Ordered shutdown: socket, then queue drain, then sinks
    if conn.reader_running() {
        if let Err(e) = conn.unwatch_all().await {
            warn!(error = %e, "Failed to send unwatch all");
        }
    }
    if let Err(e) = conn.disconnect().await {
        warn!(error = %e, "Connection did not close cleanly");
    }
    if let Err(e) = router.stop_listening().await {
        error!(error = %e, "Bar router did not stop cleanly");
    }
    notifier.close();
    shutdown_tx.send(true).ok();
    server.await.ok();

    match result {
        Ok(()) => {
            info!("Connector stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Connector error");
            Err(e.into())
        }
    }
}

/// Connect, subscribe and run until Ctrl+C or the reader exits
async fn session(conn: &mut FeedConnection, watches: &[WatchSpec]) -> Result<(), FeedError> {
    conn.connect().await?;
    for spec in watches {
        conn.watch(&WatchRequest::from(spec)).await?;
    }
    conn.request_watches().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
        result = conn.closed() => result,
    }
}
