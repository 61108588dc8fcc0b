//! Runner settings.

use crate::errors::DockhandError;
use crate::pipeline::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding [`RunnerConfig::max_parallel`].
pub const ENV_MAX_PARALLEL: &str = "DOCKHAND_MAX_PARALLEL";
/// Environment variable overriding [`RunnerConfig::stage_timeout`], in seconds.
pub const ENV_STAGE_TIMEOUT: &str = "DOCKHAND_STAGE_TIMEOUT_SECS";
/// Environment variable overriding [`RunnerConfig::artifact_root`].
pub const ENV_ARTIFACT_ROOT: &str = "DOCKHAND_ARTIFACT_ROOT";

/// How the runner schedules and bounds stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum stages in flight. `1` runs stages strictly in execution order.
    pub max_parallel: usize,
    /// Default per-stage time budget.
    #[serde(rename = "stage_timeout_secs", with = "secs")]
    pub stage_timeout: Duration,
    /// Retry policy for transient environment setup failures.
    pub retry: RetryConfig,
    /// Root directory of the artifact store.
    pub artifact_root: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            stage_timeout: Duration::from_secs(30 * 60),
            retry: RetryConfig::default(),
            artifact_root: PathBuf::from(".dockhand/artifacts"),
        }
    }
}

impl RunnerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `DOCKHAND_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::Config`] if a variable is set but invalid.
    pub fn from_env() -> Result<Self, DockhandError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up by `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::Config`] if a value is invalid.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DockhandError> {
        if let Some(value) = lookup(ENV_MAX_PARALLEL) {
            self = self.with_max_parallel(parse_positive(ENV_MAX_PARALLEL, &value)?);
        }
        if let Some(value) = lookup(ENV_STAGE_TIMEOUT) {
            let secs = parse_positive(ENV_STAGE_TIMEOUT, &value)?;
            self.stage_timeout = Duration::from_secs(u64::try_from(secs).unwrap_or(u64::MAX));
        }
        if let Some(value) = lookup(ENV_ARTIFACT_ROOT) {
            self.artifact_root = PathBuf::from(value);
        }
        Ok(self)
    }

    /// Sets the parallelism bound; `0` is treated as `1`.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Sets the default stage timeout.
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the artifact root.
    #[must_use]
    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = root.into();
        self
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize, DockhandError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(DockhandError::Config(format!(
            "{key} must be a positive integer, got '{value}'"
        ))),
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
