//! In-memory storage backend, mainly for tests and the `memory` CLI backend.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{ArchiveStorage, SubscriptionStorage};
use crate::error::{Error, Result};
use crate::models::{SiteRecord, Subscriber, Subscription};

#[derive(Default)]
struct Collections {
    sites: Vec<SiteRecord>,
    subscribers: Vec<Subscriber>,
}

/// In-memory implementation of both storage contracts.
///
/// A single mutex protects the internal collections; they are small and
/// scanned linearly, with the identity tuple of `Subscription` driving all
/// comparisons.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Collections>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Collections> {
        self.inner.lock().expect("storage mutex poisoned")
    }
}

#[async_trait]
impl ArchiveStorage for MemoryStorage {
    async fn get(&self, subscription: &Subscription) -> Result<SiteRecord> {
        let inner = self.lock();
        inner
            .sites
            .iter()
            .find(|record| record.subscription == *subscription)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("site {} not archived", subscription.url)))
    }

    async fn add(&self, record: &SiteRecord) -> Result<()> {
        let mut inner = self.lock();
        if inner
            .sites
            .iter()
            .any(|existing| existing.subscription == record.subscription)
        {
            return Err(Error::AlreadyExists(format!(
                "site {} already archived",
                record.subscription.url
            )));
        }

        inner.sites.push(SiteRecord {
            subscription: record.subscription.clone(),
            last_updated: record.last_checked,
            last_checked: record.last_checked,
            content: record.content.clone(),
            checksum: record.checksum.clone(),
            diff: String::new(),
        });
        Ok(())
    }

    async fn update(&self, record: &SiteRecord) -> Result<()> {
        let mut inner = self.lock();
        match inner
            .sites
            .iter_mut()
            .find(|existing| existing.subscription == record.subscription)
        {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!(
                "site {} not archived",
                record.subscription.url
            ))),
        }
    }
}

#[async_trait]
impl SubscriptionStorage for MemoryStorage {
    async fn find_by_subscriber(&self, email: &str) -> Result<Vec<Subscription>> {
        let inner = self.lock();
        inner
            .subscribers
            .iter()
            .find(|subscriber| subscriber.email == email)
            .map(|subscriber| subscriber.subscriptions.clone())
            .ok_or_else(|| Error::NotFound(format!("subscriber {email} not found")))
    }

    async fn find_by_subscription(&self, subscription: &Subscription) -> Result<Vec<Subscriber>> {
        let inner = self.lock();
        Ok(inner
            .subscribers
            .iter()
            .filter(|subscriber| subscriber.subscriptions.contains(subscription))
            .cloned()
            .collect())
    }

    async fn subscriber_count(&self) -> Result<usize> {
        Ok(self.lock().subscribers.len())
    }

    async fn add_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        let mut inner = self.lock();
        if inner
            .subscribers
            .iter()
            .any(|existing| existing.email == subscriber.email)
        {
            return Err(Error::AlreadyExists(format!(
                "subscriber {} already exists",
                subscriber.email
            )));
        }
        inner.subscribers.push(subscriber.clone());
        Ok(())
    }

    async fn get_all_subscribers(&self) -> Result<Vec<Subscriber>> {
        Ok(self.lock().subscribers.clone())
    }

    async fn get_subscriber(&self, email: &str) -> Result<Subscriber> {
        let inner = self.lock();
        inner
            .subscribers
            .iter()
            .find(|subscriber| subscriber.email == email)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("subscriber {email} not found")))
    }

    async fn add_subscription(&self, email: &str, subscription: &Subscription) -> Result<()> {
        let mut inner = self.lock();
        let subscriber = inner
            .subscribers
            .iter_mut()
            .find(|subscriber| subscriber.email == email)
            .ok_or_else(|| Error::NotFound(format!("subscriber {email} not found")))?;

        if subscriber.subscriptions.contains(subscription) {
            return Err(Error::AlreadyExists(format!(
                "{email} is already subscribed to {}",
                subscription.url
            )));
        }
        subscriber.subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn remove_subscription(&self, email: &str, subscription: &Subscription) -> Result<()> {
        let mut inner = self.lock();
        let subscriber = inner
            .subscribers
            .iter_mut()
            .find(|subscriber| subscriber.email == email)
            .ok_or_else(|| Error::NotFound(format!("subscriber {email} not found")))?;

        match subscriber
            .subscriptions
            .iter()
            .position(|existing| existing == subscription)
        {
            Some(index) => {
                subscriber.subscriptions.remove(index);
                Ok(())
            }
            None => Err(Error::NotFound(format!(
                "{email} was not subscribed to url {}, filter {}, content type {}",
                subscription.url, subscription.filter, subscription.content_type
            ))),
        }
    }

    async fn remove_subscriber(&self, email: &str) -> Result<()> {
        let mut inner = self.lock();
        match inner
            .subscribers
            .iter()
            .position(|subscriber| subscriber.email == email)
        {
            Some(index) => {
                inner.subscribers.remove(index);
                Ok(())
            }
            None => Err(Error::NotFound(format!("subscriber {email} not found"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(url: &str, content: &[u8]) -> SiteRecord {
        SiteRecord {
            subscription: Subscription::new(url),
            last_updated: Utc::now(),
            last_checked: Utc::now(),
            content: content.to_vec(),
            checksum: "checksum".to_string(),
            diff: String::new(),
        }
    }

    #[tokio::test]
    async fn archive_add_get_update() {
        let storage = MemoryStorage::new();
        let rec = record("http://site1.test", b"hello");

        assert!(storage.get(&rec.subscription).await.is_err());
        storage.add(&rec).await.unwrap();

        // add resets diff and aligns last_updated with last_checked
        let stored = storage.get(&rec.subscription).await.unwrap();
        assert_eq!(stored.last_updated, rec.last_checked);
        assert_eq!(stored.diff, "");

        let err = storage.add(&rec).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        let mut changed = rec.clone();
        changed.content = b"hello world".to_vec();
        changed.diff = "+world".to_string();
        storage.update(&changed).await.unwrap();
        let stored = storage.get(&rec.subscription).await.unwrap();
        assert_eq!(stored.content, b"hello world");
        assert_eq!(stored.diff, "+world");
    }

    #[tokio::test]
    async fn update_unknown_site_is_not_found() {
        let storage = MemoryStorage::new();
        let err = storage
            .update(&record("http://nowhere.test", b""))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn subscriptions_are_per_subscriber_and_deduplicated() {
        let storage = MemoryStorage::new();
        let sub = Subscription::new("http://site1.test");

        storage
            .add_subscriber(&Subscriber::new("a@x.test"))
            .await
            .unwrap();
        storage
            .add_subscriber(&Subscriber::new("b@x.test"))
            .await
            .unwrap();
        assert_eq!(storage.subscriber_count().await.unwrap(), 2);

        storage.add_subscription("a@x.test", &sub).await.unwrap();
        storage.add_subscription("b@x.test", &sub).await.unwrap();

        let err = storage
            .add_subscription("a@x.test", &sub)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        let holders = storage.find_by_subscription(&sub).await.unwrap();
        let emails: Vec<_> = holders.iter().map(|s| s.email.as_str()).collect();
        assert_eq!(emails, vec!["a@x.test", "b@x.test"]);
    }

    #[tokio::test]
    async fn unsubscribe_and_delete() {
        let storage = MemoryStorage::new();
        let sub = Subscription::new("http://site1.test");

        storage
            .add_subscriber(&Subscriber::new("a@x.test"))
            .await
            .unwrap();
        storage.add_subscription("a@x.test", &sub).await.unwrap();

        let other = Subscription::new("http://other.test");
        assert!(storage
            .remove_subscription("a@x.test", &other)
            .await
            .unwrap_err()
            .is_not_found());

        storage.remove_subscription("a@x.test", &sub).await.unwrap();
        assert!(storage
            .find_by_subscriber("a@x.test")
            .await
            .unwrap()
            .is_empty());

        storage.remove_subscriber("a@x.test").await.unwrap();
        assert!(storage
            .remove_subscriber("a@x.test")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
