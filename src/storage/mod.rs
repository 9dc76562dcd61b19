//! Storage contracts and backends.
//!
//! Services only depend on the two traits below; the `memory` backend backs
//! tests and the `memory` CLI backend, `postgres` is the durable one.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{SiteRecord, Subscriber, Subscription};

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

/// Storage backend for the site archive service.
///
/// Implementations must be safe for concurrent access, and `add`/`update`
/// must be atomic per subscription identity (last write wins).
#[async_trait]
pub trait ArchiveStorage: Send + Sync {
    /// Look up the record for a subscription identity.
    /// Returns `NotFound` if the site was never archived.
    async fn get(&self, subscription: &Subscription) -> Result<SiteRecord>;

    /// Insert a new record. Returns `AlreadyExists` on identity collision.
    async fn add(&self, record: &SiteRecord) -> Result<()>;

    /// Overwrite the record for an existing identity.
    /// Returns `NotFound` if there is nothing to update.
    async fn update(&self, record: &SiteRecord) -> Result<()>;
}

/// Storage backend for the subscription service.
#[async_trait]
pub trait SubscriptionStorage: Send + Sync {
    /// All subscriptions held by the given subscriber.
    /// Returns `NotFound` for an unknown email.
    async fn find_by_subscriber(&self, email: &str) -> Result<Vec<Subscription>>;

    /// All subscribers attached to an identity-equal subscription.
    /// Empty list if none.
    async fn find_by_subscription(&self, subscription: &Subscription) -> Result<Vec<Subscriber>>;

    /// Number of registered subscribers.
    async fn subscriber_count(&self) -> Result<usize>;

    /// Register a new subscriber. `AlreadyExists` if the email is taken.
    async fn add_subscriber(&self, subscriber: &Subscriber) -> Result<()>;

    /// All registered subscribers with their subscription lists.
    async fn get_all_subscribers(&self) -> Result<Vec<Subscriber>>;

    /// One subscriber by email, with subscriptions. `NotFound` if unknown.
    async fn get_subscriber(&self, email: &str) -> Result<Subscriber>;

    /// Attach a subscription to a subscriber. Identity-equal subscriptions
    /// are interned: a second subscriber reuses the existing row.
    /// `NotFound` for an unknown email, `AlreadyExists` for a duplicate link.
    async fn add_subscription(&self, email: &str, subscription: &Subscription) -> Result<()>;

    /// Detach one subscription link. `NotFound` if the subscriber or the
    /// link is missing. Unreferenced subscription rows are garbage-collected.
    async fn remove_subscription(&self, email: &str, subscription: &Subscription) -> Result<()>;

    /// Remove a subscriber and all of their links. `NotFound` if unknown.
    async fn remove_subscriber(&self, email: &str) -> Result<()>;
}
