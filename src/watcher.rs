//! The watcher schedules scrapes of all subscribed sites in regular
//! intervals, fanning batches out to a bounded pool of scraper workers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::exporter::Exporter;
use crate::models::Subscription;
use crate::scraper::{Scraper, ScraperConfig};
use crate::service::{SiteArchiveService, SubscriptionService};

/// Watcher tuning knobs.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Time between ticks; also the timeout of a single tick.
    pub interval: Duration,
    /// Number of subscriptions handed to one scraper instance.
    pub batch_size: usize,
    /// Number of concurrently running scraper workers.
    pub threads: usize,
    /// Options passed to every scraper instance.
    pub scraper: ScraperConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            batch_size: 4,
            threads: 2,
            scraper: ScraperConfig::default(),
        }
    }
}

/// Periodically scrapes all subscribed sites and archives the results.
///
/// One tick generates the scrape list, dispatches it and drains the
/// exporter; at most one tick is in flight per instance. Cancellation is
/// cooperative: every blocking wait races the shutdown channel and the
/// per-tick deadline.
pub struct Watcher {
    archive: SiteArchiveService,
    subscriptions: SubscriptionService,
    config: WatcherConfig,
}

impl Watcher {
    pub fn new(
        archive: SiteArchiveService,
        subscriptions: SubscriptionService,
        config: WatcherConfig,
    ) -> Self {
        Self {
            archive,
            subscriptions,
            config,
        }
    }

    /// Build the deduplicated scrape list for one tick.
    ///
    /// Flattens all subscribers' subscription sets; a subscription held by
    /// several subscribers appears once, in the order first encountered.
    pub async fn generate_scrape_list(&self) -> Result<Vec<Subscription>> {
        let mut seen = HashSet::new();
        let mut list = Vec::new();

        for subscriber in self.subscriptions.get_subscribers().await? {
            for subscription in subscriber.subscriptions {
                if seen.insert(subscription.clone()) {
                    list.push(subscription);
                }
            }
        }

        Ok(list)
    }

    /// Scrape the given list with a bounded worker pool and wait until every
    /// emitted observation has been exported into the archive.
    ///
    /// Returns `Cancelled` when the shutdown channel or the per-tick
    /// deadline fires before all batches were handed out.
    pub async fn run_scrapers(
        &self,
        shutdown: watch::Receiver<bool>,
        subscriptions: Vec<Subscription>,
    ) -> Result<()> {
        let deadline = Instant::now() + self.config.interval;

        let (observation_tx, observation_rx) = mpsc::channel(64);
        let exporter = Exporter::new(self.archive.clone());
        let exporter_shutdown = shutdown.clone();
        let exporter_handle = tokio::spawn(async move {
            tokio::select! {
                result = exporter.run(observation_rx, exporter_shutdown) => result,
                _ = time::sleep_until(deadline) => Err(Error::Cancelled),
            }
        });

        let (batch_tx, batch_rx) = mpsc::channel::<Vec<Subscription>>(self.config.threads.max(1));
        let batch_rx = Arc::new(Mutex::new(batch_rx));

        let mut workers = Vec::with_capacity(self.config.threads);
        for worker in 0..self.config.threads.max(1) {
            let batch_rx = Arc::clone(&batch_rx);
            let observation_tx = observation_tx.clone();
            let scraper_config = self.config.scraper.clone();
            let mut shutdown = shutdown.clone();

            debug!(worker, "starting worker");
            workers.push(tokio::spawn(async move {
                loop {
                    debug!(worker, "waiting for next batch of sites to process");
                    let batch = {
                        let mut rx = batch_rx.lock().await;
                        tokio::select! {
                            batch = rx.recv() => batch,
                            _ = time::sleep_until(deadline) => None,
                            _ = shutdown.changed() => None,
                        }
                    };
                    let Some(batch) = batch else {
                        debug!(worker, "no more sites to process, worker shutting down");
                        return;
                    };

                    match Scraper::new(batch, scraper_config.clone(), observation_tx.clone()) {
                        Ok(scraper) => {
                            debug!(worker, "scraper starting");
                            scraper.start().await;
                            debug!(worker, "scraper finished");
                        }
                        Err(err) => warn!(worker, error = %err, "failed to set up scraper"),
                    }
                }
            }));
        }
        drop(observation_tx);

        let mut feed_shutdown = shutdown.clone();
        for batch in subscriptions.chunks(self.config.batch_size.max(1)) {
            let batch = batch.to_vec();
            tokio::select! {
                sent = batch_tx.send(batch) => {
                    if sent.is_err() {
                        break;
                    }
                }
                _ = time::sleep_until(deadline) => {
                    debug!("run_scrapers deadline hit while dispatching");
                    return Err(Error::Cancelled);
                }
                _ = feed_shutdown.changed() => {
                    debug!("run_scrapers canceled while dispatching");
                    return Err(Error::Cancelled);
                }
            }
        }
        drop(batch_tx);

        debug!("waiting for workers to finish");
        for handle in workers {
            let _ = handle.await;
        }
        debug!("all workers finished");

        // all observation senders are gone, wait for the exporter to drain
        match exporter_handle.await {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Run the periodic scrape loop until the shutdown channel fires.
    ///
    /// A cancelled return is definitive; `start` must not be called again
    /// on the same instance afterwards.
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let list = match self.generate_scrape_list().await {
                        Ok(list) => list,
                        Err(err) => {
                            warn!(error = %err, "failed to generate scrape list");
                            continue;
                        }
                    };

                    debug!(sites = list.len(), "tick: dispatching scrape list");
                    if let Err(err) = self.run_scrapers(shutdown.clone(), list).await {
                        if *shutdown.borrow() {
                            return Err(err);
                        }
                        warn!(error = %err, "tick aborted");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("watcher canceled, shutting down");
                    return Err(Error::Cancelled);
                }
            }
        }
    }
}
