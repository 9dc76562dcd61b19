//! Error taxonomy shared across services, storage and transports.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Domain errors surfaced by services and storage backends.
///
/// The HTTP layer maps these onto status codes; everything that is not one
/// of the explicitly mapped kinds becomes a 500.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entity with the same identity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A configured cap (subscriber or subscription count) was reached.
    #[error("limit reached: {0}")]
    Limit(String),

    /// Malformed input, e.g. a request without a subscription.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Backend failure other than a uniqueness or missing-row condition.
    #[error("storage error: {0}")]
    Storage(String),

    /// HTTP status >= 400 or a transport error while scraping.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// A subscription filter that does not compile.
    #[error("bad filter: {0}")]
    ParseConfig(String),

    /// Cooperative cancellation or per-tick timeout.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// True when this error is the cancellation sentinel.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True when this error means "entity absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<diesel::result::Error> for Error {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error as DieselError};
        match err {
            DieselError::NotFound => Error::NotFound("no matching row".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Error::AlreadyExists(info.message().to_string())
            }
            other => Error::Storage(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Fetch(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diesel_not_found_maps_to_not_found() {
        let err: Error = diesel::result::Error::NotFound.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn cancelled_is_detectable() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::NotFound("x".into()).is_cancelled());
    }
}
