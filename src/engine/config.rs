//! Engine configuration options.

use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// Attempts per operation before giving up with `Contention`.
    pub max_commit_retries: u32,
    /// Reject oracle prices older than this. None disables the check.
    pub max_oracle_age_secs: Option<i64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            max_commit_retries: 64,
            max_oracle_age_secs: None,
        }
    }
}
