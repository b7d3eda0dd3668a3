use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlagError>;

#[derive(Debug, Error)]
pub enum FlagError {
    /// A rule, experiment or caller-supplied tenant disagrees with the context tenant.
    #[error("{what} belongs to tenant {found}, but context is for tenant {expected}")]
    TenantMismatch {
        what: String,
        expected: String,
        found: String,
    },

    #[error("snapshot integrity check failed: {0}")]
    SnapshotIntegrity(String),

    #[error("snapshot expired at {expires_at}, current time is {now}")]
    SnapshotExpired {
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Only raised by the boundary validators, never by evaluation calls.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("failed to encode canonical body: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FlagError {
    pub(crate) fn tenant_mismatch(
        what: impl Into<String>,
        expected: &str,
        found: &str,
    ) -> Self {
        FlagError::TenantMismatch {
            what: what.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
