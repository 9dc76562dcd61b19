//! Archived site state and scrape observations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Subscription;

/// Persisted state of one watched resource.
///
/// Exactly one record exists per subscription identity once the first
/// successful observation has been archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRecord {
    #[serde(rename = "Subscription")]
    pub subscription: Subscription,
    /// Most recent observation whose filtered content differed materially.
    #[serde(rename = "LastUpdated")]
    pub last_updated: DateTime<Utc>,
    /// Most recent observation that produced content at all.
    #[serde(rename = "LastChecked")]
    pub last_checked: DateTime<Utc>,
    /// Last observed filtered payload.
    #[serde(rename = "Content", with = "content_encoding")]
    pub content: Vec<u8>,
    /// Fingerprint of `content`.
    #[serde(rename = "Checksum")]
    pub checksum: String,
    /// Textual diff against the previous content at the moment
    /// `last_updated` advanced. Empty for never-changed records.
    #[serde(rename = "Diff")]
    pub diff: String,
}

/// A single scrape result, produced by a scraper and consumed by the
/// exporter. `checksum` is always the fingerprint of `content`.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub subscription: Subscription,
    pub last_checked: DateTime<Utc>,
    pub content: Vec<u8>,
    pub checksum: String,
}

/// Byte payloads travel over the JSON API as base64 strings.
mod content_encoding {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_record_json_round_trip() {
        let record = SiteRecord {
            subscription: Subscription::new("http://site1.example"),
            last_updated: Utc::now(),
            last_checked: Utc::now(),
            content: b"hello world".to_vec(),
            checksum: "abc123".to_string(),
            diff: String::new(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"Content\":\"aGVsbG8gd29ybGQ=\""));

        let decoded: SiteRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);
    }
}
