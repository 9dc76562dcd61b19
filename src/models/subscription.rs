//! Subscription identity and subscriber models.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Identity of a watched web resource.
///
/// Two subscriptions are the same resource iff `url`, `filter`,
/// `content_type` and `use_chrome` are pairwise equal. `interval_secs` is a
/// per-subscriber revisit hint and deliberately excluded from identity; the
/// watcher currently runs on a single global interval and only persists the
/// per-link value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Absolute HTTP(S) URL of the watched resource.
    #[serde(rename = "URL")]
    pub url: String,
    /// Optional content filter. A CSS selector when the fetched document is
    /// HTML, a regular expression applied to the raw body otherwise.
    #[serde(rename = "Filter", default)]
    pub filter: String,
    /// Opaque tag used by subscribers to distinguish variants of one URL.
    #[serde(rename = "ContentType", default)]
    pub content_type: String,
    /// Render the page through the external browser before filtering.
    #[serde(rename = "UseChrome", default)]
    pub use_chrome: bool,
    /// Suggested minimum revisit period in seconds (advisory).
    #[serde(rename = "Interval", default)]
    pub interval_secs: u64,
}

impl Subscription {
    /// Create a subscription for a plain-text URL without filter.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filter: String::new(),
            content_type: "text".to_string(),
            use_chrome: false,
            interval_secs: 0,
        }
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
            && self.filter == other.filter
            && self.content_type == other.content_type
            && self.use_chrome == other.use_chrome
    }
}

impl Eq for Subscription {}

impl Hash for Subscription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
        self.filter.hash(state);
        self.content_type.hash(state);
        self.use_chrome.hash(state);
    }
}

/// A subscriber identified by email, holding a set of subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    #[serde(rename = "Email")]
    pub email: String,
    /// Subscriptions keyed by identity; storage enforces uniqueness.
    #[serde(rename = "Subscriptions", default)]
    pub subscriptions: Vec<Subscription>,
    /// Per-subscriber cap. `0` inherits the service default, positive is a
    /// hard cap, negative means unlimited.
    #[serde(rename = "SubscriptionLimit", default)]
    pub subscription_limit: i64,
}

impl Subscriber {
    /// Create a subscriber with no subscriptions and the inherited limit.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            subscriptions: Vec::new(),
            subscription_limit: 0,
        }
    }
}
