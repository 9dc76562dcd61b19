//! htracker - tracks changes on subscribed web sites.
//!
//! Subscribers register URLs with optional content filters; the watcher
//! re-fetches them on a fixed interval, fingerprints the filtered content
//! and archives a readable diff whenever a site changed materially.

mod cli;
mod error;
mod exporter;
mod models;
mod schema;
mod scraper;
mod server;
mod service;
mod storage;
mod watcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // load .env before flags are parsed, HTRACKER_* vars may live there
    let _ = dotenvy::dotenv();

    cli::run().await
}
