//! Exporter: drains scrape observations into the site archive.

use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::Observation;
use crate::service::SiteArchiveService;

/// Consumes the observation channel and feeds each entry into the archive.
///
/// A failing storage write is logged and the stream continues; a single bad
/// observation must not abort the tick. The run ends normally when the
/// channel closes, or with `Cancelled` when the shutdown scope fires first,
/// in which case observations already written persist and in-flight ones
/// may be dropped.
pub struct Exporter {
    archive: SiteArchiveService,
}

impl Exporter {
    pub fn new(archive: SiteArchiveService) -> Self {
        Self { archive }
    }

    pub async fn run(
        self,
        mut observations: mpsc::Receiver<Observation>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                observation = observations.recv() => match observation {
                    Some(observation) => {
                        if let Err(err) = self.archive.update(&observation).await {
                            warn!(
                                url = %observation.subscription.url,
                                error = %err,
                                "failed to update site in archive"
                            );
                        }
                    }
                    None => return Ok(()),
                },
                _ = shutdown.changed() => {
                    warn!("exporter stopping, unexported scrape results may be lost");
                    return Err(Error::Cancelled);
                }
            }
        }
    }
}
