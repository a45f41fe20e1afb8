use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::access::{Session, User};
use crate::error::{MonitorError, Result};
use crate::risk::ThresholdConfig;

pub const DEFAULT_CONFIG_PATH: &str = ".risk-monitor.json";
pub const TIMEOUT_ENV: &str = "RISK_MONITOR_TIMEOUT_SECS";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Client-side state kept between runs: the last thresholds this client
/// applied, the last signed-in user and the store request timeout.
///
/// Stored thresholds take precedence; the local copy is only used before the
/// store has any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    pub thresholds: ThresholdConfig,
    pub cached_user: Option<User>,
    pub request_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            cached_user: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl MonitorConfig {
    /// Reads the config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|err| MonitorError::Config(format!("{}: {err}", path.display())))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(err) => return Err(err.into()),
        };

        if let Ok(raw) = std::env::var(TIMEOUT_ENV) {
            config.request_timeout_secs = raw.trim().parse().map_err(|_| {
                MonitorError::Config(format!("{TIMEOUT_ENV} must be a whole number of seconds"))
            })?;
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn session(&self) -> Result<Session> {
        self.cached_user
            .clone()
            .map(Session::new)
            .ok_or(MonitorError::NotSignedIn)
    }
}
