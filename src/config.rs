//! Controller tuning
//!
//! Settings come from an optional TOML file; command-line flags (or their
//! environment variables) override individual values.
//!
//! ```toml
//! resyncPeriodSecs = 10
//! backoffBaseMillis = 100
//! backoffMaxSecs = 300
//! workers = 1
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Work queue and resync settings shared by every controller
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ControllerSettings {
    /// Interval at which every controller re-enqueues its key unconditionally
    pub resync_period_secs: u64,
    /// First retry delay after a failed reconcile
    pub backoff_base_millis: u64,
    /// Upper bound of the retry delay
    pub backoff_max_secs: u64,
    /// Workers per controller
    pub workers: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            resync_period_secs: 10,
            backoff_base_millis: 100,
            backoff_max_secs: 300,
            workers: 1,
        }
    }
}

impl ControllerSettings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("reading {}: {}", path.display(), e)))?;
        let settings: Self = toml::from_str(&text)
            .map_err(|e| Error::ConfigError(format!("parsing {}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::ConfigError("workers must be at least 1".to_string()));
        }
        if self.resync_period_secs == 0 {
            return Err(Error::ConfigError(
                "resyncPeriodSecs must be greater than 0".to_string(),
            ));
        }
        if self.backoff_base() > self.backoff_max() {
            return Err(Error::ConfigError(format!(
                "backoffBaseMillis ({}) exceeds backoffMaxSecs ({})",
                self.backoff_base_millis, self.backoff_max_secs
            )));
        }
        Ok(())
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_millis)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

/// Tuning flags of the `run` command
#[derive(clap::Args, Debug, Default, Clone)]
pub struct TuningArgs {
    /// TOML file with controller settings
    #[arg(long = "config", env = "OPERATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Forced resync interval in seconds
    #[arg(long, env = "RESYNC_PERIOD_SECS")]
    pub resync_period_secs: Option<u64>,

    /// First retry delay in milliseconds
    #[arg(long, env = "BACKOFF_BASE_MILLIS")]
    pub backoff_base_millis: Option<u64>,

    /// Maximum retry delay in seconds
    #[arg(long, env = "BACKOFF_MAX_SECS")]
    pub backoff_max_secs: Option<u64>,

    /// Workers per controller
    #[arg(long, env = "WORKERS")]
    pub workers: Option<usize>,
}

impl TuningArgs {
    /// Resolve the effective settings: defaults, then the file, then flags
    pub fn resolve(&self) -> Result<ControllerSettings> {
        let mut settings = match &self.config {
            Some(path) => ControllerSettings::from_file(path)?,
            None => ControllerSettings::default(),
        };
        if let Some(secs) = self.resync_period_secs {
            settings.resync_period_secs = secs;
        }
        if let Some(millis) = self.backoff_base_millis {
            settings.backoff_base_millis = millis;
        }
        if let Some(secs) = self.backoff_max_secs {
            settings.backoff_max_secs = secs;
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        settings.validate()?;
        Ok(settings)
    }
}
