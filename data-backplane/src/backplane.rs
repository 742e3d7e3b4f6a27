//! Pluggable storage-adapter capability contract.

use crate::entry::Entry;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};

pub enum BackplaneError {
    /// The backing store could not be reached. Transient: callers retry on
    /// the next scheduled tick rather than treating this as fatal.
    BackendUnavailable(String),
    /// A stored record could not be decoded. Adapters skip such records
    /// inside `query` instead of surfacing this to the caller.
    MalformedEntry(String),
}

impl Debug for BackplaneError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BackplaneError::BackendUnavailable(detail) => {
                write!(f, "BackendUnavailable({detail})")
            }
            BackplaneError::MalformedEntry(detail) => write!(f, "MalformedEntry({detail})"),
        }
    }
}

impl Display for BackplaneError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BackplaneError::BackendUnavailable(detail) => {
                write!(f, "Backing store unavailable: {detail}")
            }
            BackplaneError::MalformedEntry(detail) => {
                write!(f, "Unreadable record in backing store: {detail}")
            }
        }
    }
}

impl Error for BackplaneError {}

/// Storage adapter for the shared registry.
///
/// Implementations own the liveness policy of their store: `query` returns
/// only entries the backend currently considers live (freshness window,
/// passing health check), and excludes entries owned by the caller itself.
#[async_trait]
pub trait DataBackplane: Send + Sync {
    /// Upserts the caller's own entry under `entry_type`. Idempotent; safe to
    /// call on every heartbeat tick.
    async fn publish(&self, entry_type: &str, data: &str) -> Result<(), BackplaneError>;

    /// Best-effort deletion of the caller's entry for `entry_type`. A missing
    /// entry is not an error.
    async fn revoke(&self, entry_type: &str) -> Result<(), BackplaneError>;

    /// Returns all currently-live entries from all other owners, in no
    /// particular order. Unreadable or corrupt records are skipped, never
    /// fatal to the whole query.
    async fn query(&self) -> Result<Vec<Entry>, BackplaneError>;
}
