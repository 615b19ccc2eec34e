//! Replicator configuration.
//!
//! Read once (from a TOML file, the environment, or the command line) and
//! passed explicitly to the [`Replicator`](crate::Replicator).

use crate::error::{ReplicaError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable holding the archived changeset retention count.
pub const MAX_CHANGESETS_ENV: &str = "TABLEREPL_MAX_CHANGESETS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicatorConfig {
    /// Number of raw changesets to keep on disk. Zero disables archival.
    pub max_changesets: u32,
}

impl ReplicatorConfig {
    pub fn from_env() -> Self {
        let raw = std::env::var(MAX_CHANGESETS_ENV).ok();
        Self {
            max_changesets: parse_max_changesets(raw.as_deref()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ReplicaError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&text)
            .map_err(|e| ReplicaError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    pub fn with_max_changesets(mut self, count: i64) -> Self {
        self.max_changesets = clamp_count(count);
        self
    }

    pub fn archival_enabled(&self) -> bool {
        self.max_changesets > 0
    }
}

/// Unset, unparsable, or non-positive values all disable archival.
fn parse_max_changesets(raw: Option<&str>) -> u32 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .map(clamp_count)
        .unwrap_or(0)
}

fn clamp_count(count: i64) -> u32 {
    count.clamp(0, i64::from(u32::MAX)) as u32
}
