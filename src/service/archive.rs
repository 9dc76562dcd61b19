//! Site archive service: decides whether an observation is a material
//! change and persists the outcome.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::diff::diff_text;
use crate::error::Result;
use crate::models::{Observation, SiteRecord, Subscription};
use crate::storage::ArchiveStorage;

/// Compute the lowercase hex SHA-256 fingerprint of a byte buffer.
pub fn fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Orchestrates archive reads and the material-change update policy on top
/// of an [`ArchiveStorage`] backend.
#[derive(Clone)]
pub struct SiteArchiveService {
    storage: Arc<dyn ArchiveStorage>,
}

impl SiteArchiveService {
    pub fn new(storage: Arc<dyn ArchiveStorage>) -> Self {
        Self { storage }
    }

    /// Return the archived record for a subscription identity.
    pub async fn get(&self, subscription: &Subscription) -> Result<SiteRecord> {
        self.storage.get(subscription).await
    }

    /// Update the archive with the result of the latest scrape.
    ///
    /// Returns the textual diff when the filtered content changed
    /// materially, the empty string otherwise.
    ///
    /// A checksum mismatch with an empty diff is a whitespace-only change:
    /// only `last_checked` advances and the stored content and checksum are
    /// kept, so a later real change is still diffed against the content the
    /// subscriber last saw.
    pub async fn update(&self, observation: &Observation) -> Result<String> {
        let stored = match self.storage.get(&observation.subscription).await {
            Ok(record) => record,
            Err(err) if err.is_not_found() => {
                // first observation of this site - create a new entry
                self.storage
                    .add(&SiteRecord {
                        subscription: observation.subscription.clone(),
                        last_updated: observation.last_checked,
                        last_checked: observation.last_checked,
                        content: observation.content.clone(),
                        checksum: observation.checksum.clone(),
                        diff: String::new(),
                    })
                    .await?;
                return Ok(String::new());
            }
            Err(err) => return Err(err),
        };

        if stored.checksum != observation.checksum {
            let diff = diff_text(
                &String::from_utf8_lossy(&stored.content),
                &String::from_utf8_lossy(&observation.content),
            );
            if !diff.is_empty() {
                self.storage
                    .update(&SiteRecord {
                        subscription: observation.subscription.clone(),
                        last_updated: observation.last_checked,
                        last_checked: observation.last_checked,
                        content: observation.content.clone(),
                        checksum: observation.checksum.clone(),
                        diff: diff.clone(),
                    })
                    .await?;
                return Ok(diff);
            }
            debug!(
                url = %observation.subscription.url,
                "checksum changed but diff is empty, treating as unchanged"
            );
        }

        // content unchanged - touch last_checked only
        self.storage
            .update(&SiteRecord {
                last_checked: observation.last_checked,
                ..stored
            })
            .await?;

        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::{Duration, Utc};

    fn service() -> SiteArchiveService {
        SiteArchiveService::new(Arc::new(MemoryStorage::new()))
    }

    fn observation(content: &[u8], at: chrono::DateTime<Utc>) -> Observation {
        Observation {
            subscription: Subscription::new("http://site1.test"),
            last_checked: at,
            content: content.to_vec(),
            checksum: fingerprint(content),
        }
    }

    #[test]
    fn fingerprint_matches_iff_bytes_match() {
        assert_eq!(fingerprint(b"hello"), fingerprint(b"hello"));
        assert_ne!(fingerprint(b"hello"), fingerprint(b"hello "));
        assert_eq!(
            fingerprint(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn first_observation_creates_record() {
        let svc = service();
        let t0 = Utc::now();
        let obs = observation(b"hello", t0);

        let diff = svc.update(&obs).await.unwrap();
        assert_eq!(diff, "");

        let record = svc.get(&obs.subscription).await.unwrap();
        assert_eq!(record.content, b"hello");
        assert_eq!(record.checksum, fingerprint(b"hello"));
        assert_eq!(record.last_checked, t0);
        assert_eq!(record.last_updated, t0);
        assert_eq!(record.diff, "");
    }

    #[tokio::test]
    async fn unchanged_content_touches_last_checked_only() {
        let svc = service();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(60);

        svc.update(&observation(b"hello", t0)).await.unwrap();
        let diff = svc.update(&observation(b"hello", t1)).await.unwrap();
        assert_eq!(diff, "");

        let record = svc
            .get(&Subscription::new("http://site1.test"))
            .await
            .unwrap();
        assert_eq!(record.last_checked, t1);
        assert_eq!(record.last_updated, t0);
        assert_eq!(record.diff, "");
    }

    #[tokio::test]
    async fn whitespace_only_change_is_not_material() {
        let svc = service();
        let t0 = Utc::now();
        let t2 = t0 + Duration::seconds(120);

        svc.update(&observation(b"hello", t0)).await.unwrap();
        let diff = svc.update(&observation(b"he llo", t2)).await.unwrap();
        assert_eq!(diff, "");

        let record = svc
            .get(&Subscription::new("http://site1.test"))
            .await
            .unwrap();
        assert_eq!(record.last_checked, t2);
        assert_eq!(record.last_updated, t0);
        // stored content and checksum keep the original form
        assert_eq!(record.content, b"hello");
        assert_eq!(record.checksum, fingerprint(b"hello"));
        assert_eq!(record.diff, "");
    }

    #[tokio::test]
    async fn material_change_records_diff() {
        let svc = service();
        let t0 = Utc::now();
        let t3 = t0 + Duration::seconds(180);

        svc.update(&observation(b"hello", t0)).await.unwrap();
        let diff = svc.update(&observation(b"hello world", t3)).await.unwrap();
        assert!(diff.contains("\x1b[32m"));
        assert!(diff.contains("world"));

        let record = svc
            .get(&Subscription::new("http://site1.test"))
            .await
            .unwrap();
        assert_eq!(record.last_checked, t3);
        assert_eq!(record.last_updated, t3);
        assert_eq!(record.content, b"hello world");
        assert_eq!(record.checksum, fingerprint(b"hello world"));
        assert_eq!(record.diff, diff);
    }

    #[tokio::test]
    async fn update_is_idempotent_for_equal_content() {
        let svc = service();
        let t0 = Utc::now();
        let obs = observation(b"hello", t0);

        svc.update(&obs).await.unwrap();
        let before = svc.get(&obs.subscription).await.unwrap();
        svc.update(&obs).await.unwrap();
        let after = svc.get(&obs.subscription).await.unwrap();

        assert_eq!(before, after);
    }
}
