//! CLI commands: the long-running `serve` daemon and a one-shot `scrape`
//! for debugging filters.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::Error;
use crate::exporter::Exporter;
use crate::models::Subscription;
use crate::scraper::{Scraper, ScraperConfig};
use crate::server::{self, AppState};
use crate::service::{SiteArchiveService, SubscriptionConfig, SubscriptionService};
use crate::storage::{MemoryStorage, PgStorage};
use crate::watcher::{Watcher, WatcherConfig};

#[derive(Parser)]
#[command(name = "htracker")]
#[command(about = "Tracks changes on subscribed web sites")]
#[command(version)]
pub struct Cli {
    /// Log level (DEBUG, INFO, WARN, ERROR, OFF)
    #[arg(long, global = true, default_value = "INFO", env = "HTRACKER_LOGLEVEL")]
    loglevel: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server and the periodic watcher
    Serve {
        /// Address the server is listening on
        #[arg(long, default_value = ":8080", env = "HTRACKER_ADDR")]
        addr: String,
        /// Websocket url of the chrome instance used for site rendering
        #[arg(long, default_value = "ws://localhost:3000", env = "HTRACKER_WS")]
        ws: String,
        /// Interval in seconds between watcher runs
        #[arg(long, default_value = "3600", env = "HTRACKER_INTERVAL")]
        interval: u64,
        /// Shutdown grace period in seconds
        #[arg(long, default_value = "10", env = "HTRACKER_GRACE")]
        grace: u64,
        /// Storage backend
        #[arg(long, default_value = "memory", env = "HTRACKER_BACKEND")]
        backend: Backend,
        /// Postgres connection uri
        #[arg(
            long,
            default_value = "postgres://localhost?sslmode=disable",
            env = "HTRACKER_PGURI"
        )]
        pguri: String,
    },

    /// Scrape a single url once and print the archived result
    Scrape {
        /// Url to be scraped
        url: String,
        /// Filter applied to the scraped content
        #[arg(short, long, default_value = "")]
        filter: String,
        /// Content type tag of the scraped url
        #[arg(short = 't', long, default_value = "text")]
        content_type: String,
        /// Render the site with chrome before filtering
        #[arg(short, long)]
        render: bool,
        /// Websocket url of the chrome instance used for site rendering
        #[arg(long, default_value = "ws://localhost:3000", env = "HTRACKER_WS")]
        ws: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Memory,
    Postgres,
}

fn init_logging(loglevel: &str) {
    let directive = match loglevel.to_uppercase().as_str() {
        "DEBUG" => "htracker=debug",
        "INFO" => "htracker=info",
        "WARN" => "htracker=warn",
        "ERROR" => "htracker=error",
        "OFF" => "off",
        other => {
            eprintln!("unknown log level {other:?}, using INFO");
            "htracker=info"
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Parse arguments and dispatch the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.loglevel);

    match cli.command {
        Commands::Serve {
            addr,
            ws,
            interval,
            grace,
            backend,
            pguri,
        } => serve(addr, ws, interval, grace, backend, pguri).await,
        Commands::Scrape {
            url,
            filter,
            content_type,
            render,
            ws,
        } => scrape(url, filter, content_type, render, ws).await,
    }
}

async fn build_services(
    backend: Backend,
    pguri: &str,
) -> anyhow::Result<(SiteArchiveService, SubscriptionService)> {
    match backend {
        Backend::Memory => {
            let storage = Arc::new(MemoryStorage::new());
            Ok((
                SiteArchiveService::new(storage.clone()),
                SubscriptionService::new(storage, SubscriptionConfig::default()),
            ))
        }
        Backend::Postgres => {
            let storage = PgStorage::connect(pguri)
                .await
                .context("failed to connect to postgres")?;
            storage
                .init_schema()
                .await
                .context("failed to initialize database schema")?;
            let storage = Arc::new(storage);
            Ok((
                SiteArchiveService::new(storage.clone()),
                SubscriptionService::new(storage, SubscriptionConfig::default()),
            ))
        }
    }
}

async fn serve(
    addr: String,
    ws: String,
    interval: u64,
    grace: u64,
    backend: Backend,
    pguri: String,
) -> anyhow::Result<()> {
    let (archive, subscriptions) = build_services(backend, &pguri).await?;

    let scraper_config = ScraperConfig {
        browser_endpoint: (!ws.is_empty()).then_some(ws),
        ..Default::default()
    };
    let watcher = Watcher::new(
        archive.clone(),
        subscriptions.clone(),
        WatcherConfig {
            interval: Duration::from_secs(interval),
            scraper: scraper_config,
            ..Default::default()
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_handle = tokio::spawn(async move { watcher.start(shutdown_rx).await });

    let state = AppState {
        archive,
        subscriptions,
    };
    server::serve(state, &addr, shutdown_signal(shutdown_tx)).await?;

    // connections are drained, give the watcher the grace period to stop
    match tokio::time::timeout(Duration::from_secs(grace), watcher_handle).await {
        Ok(Ok(Err(err))) if !err.is_cancelled() => warn!(error = %err, "watcher stopped"),
        Ok(Err(join_err)) => error!(error = %join_err, "watcher task panicked"),
        Err(_) => warn!("watcher did not stop within the grace period"),
        _ => {}
    }

    info!("exiting");
    Ok(())
}

/// Resolve when SIGINT or SIGTERM arrives, broadcasting shutdown first.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("caught SIGINT"),
        _ = terminate => info!("caught SIGTERM"),
    }

    let _ = shutdown_tx.send(true);
}

async fn scrape(
    url: String,
    filter: String,
    content_type: String,
    render: bool,
    ws: String,
) -> anyhow::Result<()> {
    let storage = Arc::new(MemoryStorage::new());
    let archive = SiteArchiveService::new(storage);

    let subscription = Subscription {
        url,
        filter,
        content_type,
        use_chrome: render,
        interval_secs: 0,
    };

    let config = ScraperConfig {
        browser_endpoint: render.then_some(ws),
        ..Default::default()
    };

    let (tx, rx) = mpsc::channel(16);
    Scraper::new(vec![subscription.clone()], config, tx)?
        .start()
        .await;

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    Exporter::new(archive.clone()).run(rx, shutdown_rx).await?;

    match archive.get(&subscription).await {
        Ok(record) => {
            println!("url:          {}", record.subscription.url);
            println!("last checked: {}", record.last_checked);
            println!("checksum:     {}", record.checksum);
            println!("content:      {}", String::from_utf8_lossy(&record.content));
            Ok(())
        }
        Err(Error::NotFound(_)) => {
            anyhow::bail!("scrape produced no content (fetch failed or filter invalid)")
        }
        Err(err) => Err(err.into()),
    }
}
