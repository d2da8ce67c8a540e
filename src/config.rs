use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const ENV_DEADLOCK_DETECTION: &str = "OXITXN_DEADLOCK_DETECTION";

/// Tunables for a [`TransactionManager`](crate::TransactionManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Search for wait-for cycles whenever a transaction blocks, and abort
    /// the youngest member of any cycle found. With detection off a
    /// deadlocked transaction waits until its context is cancelled.
    pub deadlock_detection: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            deadlock_detection: true,
        }
    }
}

impl ManagerConfig {
    /// Read overrides from `OXITXN_*` environment variables on top of the
    /// defaults. Unset variables keep their default.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but with a caller-supplied lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_DEADLOCK_DETECTION) {
            config.deadlock_detection = parse_bool(ENV_DEADLOCK_DETECTION, &raw)?;
        }
        Ok(config)
    }

    /// Load from a JSON file. Missing fields keep their default.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::InvalidConfig(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}
