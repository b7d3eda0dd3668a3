use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

use crate::error::{FlagError, Result};

/// 24 hours.
pub const DEFAULT_SNAPSHOT_TTL_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SnapshotConfig {
    /// Lifetime of a generated snapshot unless the call overrides it.
    pub default_ttl_ms: i64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_SNAPSHOT_TTL_MS,
        }
    }
}

impl SnapshotConfig {
    /// Reads `SNAPSHOT_TTL_MS`, loading a `.env` file first if one exists.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        match env::var("SNAPSHOT_TTL_MS") {
            Ok(raw) => Self::from_ttl_str(&raw),
            Err(env::VarError::NotPresent) => Ok(Self::default()),
            Err(e) => Err(FlagError::Config(format!("SNAPSHOT_TTL_MS unreadable: {}", e))),
        }
    }

    fn from_ttl_str(raw: &str) -> Result<Self> {
        let default_ttl_ms: i64 = raw.trim().parse().map_err(|_| {
            FlagError::Config(format!("SNAPSHOT_TTL_MS must be an integer, got '{}'", raw))
        })?;
        if default_ttl_ms <= 0 {
            return Err(FlagError::Config(
                "SNAPSHOT_TTL_MS must be greater than zero".to_string(),
            ));
        }
        Ok(Self { default_ttl_ms })
    }
}
