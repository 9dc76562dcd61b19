//! Subscription service: subscriber management with limit enforcement on
//! top of a [`SubscriptionStorage`] backend.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Subscriber, Subscription};
use crate::storage::SubscriptionStorage;

/// Limits applied by the subscription service.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Maximum number of registered subscribers.
    pub subscriber_limit: usize,
    /// Default per-subscriber subscription cap, applied when a subscriber is
    /// registered with limit `0`.
    pub subscription_limit: i64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            subscriber_limit: 100,
            subscription_limit: 100,
        }
    }
}

/// Manages subscribers and their subscription links.
#[derive(Clone)]
pub struct SubscriptionService {
    storage: Arc<dyn SubscriptionStorage>,
    config: SubscriptionConfig,
}

impl SubscriptionService {
    pub fn new(storage: Arc<dyn SubscriptionStorage>, config: SubscriptionConfig) -> Self {
        Self { storage, config }
    }

    /// Register a new subscriber, substituting the service default when the
    /// subscriber carries no explicit subscription limit.
    ///
    /// A taken email is reported as `AlreadyExists` even when the subscriber
    /// cap is reached.
    pub async fn add_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        match self.storage.get_subscriber(&subscriber.email).await {
            Ok(_) => {
                return Err(Error::AlreadyExists(format!(
                    "subscriber {} already exists",
                    subscriber.email
                )))
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let count = self.storage.subscriber_count().await?;
        if count >= self.config.subscriber_limit {
            return Err(Error::Limit(format!(
                "subscriber limit of {} reached",
                self.config.subscriber_limit
            )));
        }

        let mut subscriber = subscriber.clone();
        if subscriber.subscription_limit == 0 {
            subscriber.subscription_limit = self.config.subscription_limit;
        }

        debug!(email = %subscriber.email, "adding subscriber");
        self.storage.add_subscriber(&subscriber).await
    }

    /// Attach a subscription to an existing subscriber.
    pub async fn subscribe(&self, email: &str, subscription: &Subscription) -> Result<()> {
        let subscriber = self.storage.get_subscriber(email).await?;

        if subscriber.subscription_limit > 0
            && subscriber.subscriptions.len() as i64 >= subscriber.subscription_limit
        {
            return Err(Error::Limit(format!(
                "subscription limit of {} reached for {email}",
                subscriber.subscription_limit
            )));
        }

        debug!(email, url = %subscription.url, "adding subscription");
        self.storage.add_subscription(email, subscription).await
    }

    /// All subscriptions held by the given subscriber.
    pub async fn get_subscriptions_by_subscriber(&self, email: &str) -> Result<Vec<Subscription>> {
        self.storage.find_by_subscriber(email).await
    }

    /// All subscribers attached to an identity-equal subscription, each with
    /// their full subscription list.
    pub async fn get_subscribers_by_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Vec<Subscriber>> {
        self.storage.find_by_subscription(subscription).await
    }

    /// All registered subscribers.
    pub async fn get_subscribers(&self) -> Result<Vec<Subscriber>> {
        self.storage.get_all_subscribers().await
    }

    /// Remove one subscription link.
    pub async fn unsubscribe(&self, email: &str, subscription: &Subscription) -> Result<()> {
        self.storage.remove_subscription(email, subscription).await
    }

    /// Remove a subscriber with all their subscription links.
    pub async fn delete_subscriber(&self, email: &str) -> Result<()> {
        self.storage.remove_subscriber(email).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn service(config: SubscriptionConfig) -> SubscriptionService {
        SubscriptionService::new(Arc::new(MemoryStorage::new()), config)
    }

    fn subscription(url: &str, filter: &str, content_type: &str) -> Subscription {
        Subscription {
            url: url.into(),
            filter: filter.into(),
            content_type: content_type.into(),
            use_chrome: false,
            interval_secs: 3600,
        }
    }

    #[tokio::test]
    async fn subscribe_and_query() {
        let svc = service(SubscriptionConfig::default());
        let sub1 = subscription("http://site1.example/blah", "foo", "text");
        let sub2 = subscription("http://site2.example/blub", "bar", "byte");

        svc.add_subscriber(&Subscriber::new("email1@foo.test"))
            .await
            .unwrap();
        svc.add_subscriber(&Subscriber::new("email2@foo.test"))
            .await
            .unwrap();

        svc.subscribe("email1@foo.test", &sub1).await.unwrap();
        svc.subscribe("email1@foo.test", &sub2).await.unwrap();
        svc.subscribe("email2@foo.test", &sub1).await.unwrap();

        let subs = svc
            .get_subscriptions_by_subscriber("email1@foo.test")
            .await
            .unwrap();
        assert_eq!(subs, vec![sub1.clone(), sub2.clone()]);

        let holders = svc.get_subscribers_by_subscription(&sub1).await.unwrap();
        let emails: Vec<_> = holders.iter().map(|s| s.email.as_str()).collect();
        assert_eq!(emails, vec!["email1@foo.test", "email2@foo.test"]);
    }

    #[tokio::test]
    async fn duplicate_subscription_is_rejected_even_with_other_interval() {
        let svc = service(SubscriptionConfig::default());
        let sub = subscription("http://site1.example/blah", "foo", "text");
        let mut equal = sub.clone();
        equal.interval_secs = 60;

        svc.add_subscriber(&Subscriber::new("email1@foo.test"))
            .await
            .unwrap();
        svc.subscribe("email1@foo.test", &sub).await.unwrap();

        let err = svc.subscribe("email1@foo.test", &equal).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn subscribe_with_unknown_subscriber_fails() {
        let svc = service(SubscriptionConfig::default());
        let err = svc
            .subscribe("nobody@foo.test", &Subscription::new("http://x.test"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn subscriber_limit_is_enforced() {
        let svc = service(SubscriptionConfig {
            subscriber_limit: 2,
            subscription_limit: 100,
        });

        svc.add_subscriber(&Subscriber::new("email1@foo.test"))
            .await
            .unwrap();
        svc.add_subscriber(&Subscriber::new("email2@foo.test"))
            .await
            .unwrap();

        let err = svc
            .add_subscriber(&Subscriber::new("email3@foo.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Limit(_)));
    }

    #[tokio::test]
    async fn readding_existing_subscriber_conflicts_even_at_the_cap() {
        let svc = service(SubscriptionConfig {
            subscriber_limit: 2,
            subscription_limit: 100,
        });

        svc.add_subscriber(&Subscriber::new("email1@foo.test"))
            .await
            .unwrap();
        svc.add_subscriber(&Subscriber::new("email2@foo.test"))
            .await
            .unwrap();

        // the cap is reached, but a taken email still reports the conflict
        let err = svc
            .add_subscriber(&Subscriber::new("email1@foo.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        let err = svc
            .add_subscriber(&Subscriber::new("email3@foo.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Limit(_)));
    }

    #[tokio::test]
    async fn subscription_limit_is_enforced() {
        let svc = service(SubscriptionConfig {
            subscriber_limit: 100,
            subscription_limit: 2,
        });

        // limit 0 inherits the service default of 2
        svc.add_subscriber(&Subscriber::new("email1@foo.test"))
            .await
            .unwrap();

        svc.subscribe(
            "email1@foo.test",
            &subscription("http://site1.example", "", "text"),
        )
        .await
        .unwrap();
        svc.subscribe(
            "email1@foo.test",
            &subscription("http://site2.example", "", "text"),
        )
        .await
        .unwrap();

        let err = svc
            .subscribe(
                "email1@foo.test",
                &subscription("http://site3.example", "", "text"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Limit(_)));
    }

    #[tokio::test]
    async fn negative_limit_means_unlimited() {
        let svc = service(SubscriptionConfig {
            subscriber_limit: 100,
            subscription_limit: 1,
        });

        let mut unlimited = Subscriber::new("email1@foo.test");
        unlimited.subscription_limit = -1;
        svc.add_subscriber(&unlimited).await.unwrap();

        for i in 0..5 {
            svc.subscribe(
                "email1@foo.test",
                &subscription(&format!("http://site{i}.example"), "", "text"),
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn delete_subscriber_and_unsubscribe() {
        let svc = service(SubscriptionConfig::default());
        let sub = subscription("http://site1.example", "someFilter", "text");

        svc.add_subscriber(&Subscriber::new("foo@bar.test"))
            .await
            .unwrap();
        svc.subscribe("foo@bar.test", &sub).await.unwrap();

        assert!(svc
            .unsubscribe("foo@bar.test", &Subscription::new("http://other.test"))
            .await
            .unwrap_err()
            .is_not_found());
        svc.unsubscribe("foo@bar.test", &sub).await.unwrap();

        assert!(svc
            .delete_subscriber("notexisting@foo.bar")
            .await
            .unwrap_err()
            .is_not_found());
        svc.delete_subscriber("foo@bar.test").await.unwrap();
        assert!(svc
            .delete_subscriber("foo@bar.test")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
