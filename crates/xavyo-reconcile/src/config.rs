//! Reconciliation engine configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{ReconcileError, ReconcileResult};

/// Environment variable prefix read by [`ReconcileConfig::from_env`].
pub const ENV_PREFIX: &str = "XAVYO_RECONCILE_";

fn default_verify_attempts() -> u32 {
    5
}

fn default_verify_interval_ms() -> u64 {
    2000
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Refuse to create an object whose display name is already taken.
    #[serde(default)]
    pub prevent_duplicate_names: bool,

    /// Allow a pass to remove the last owner of a group.
    #[serde(default)]
    pub allow_owner_drain: bool,

    /// Read-back attempts after creating a credential.
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,

    /// Delay between read-back attempts in milliseconds.
    #[serde(default = "default_verify_interval_ms")]
    pub verify_interval_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            prevent_duplicate_names: false,
            allow_owner_drain: false,
            verify_attempts: default_verify_attempts(),
            verify_interval_ms: default_verify_interval_ms(),
        }
    }
}

impl ReconcileConfig {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> ReconcileConfigBuilder {
        ReconcileConfigBuilder::default()
    }

    /// Delay between read-back attempts.
    #[must_use]
    pub fn verify_interval(&self) -> Duration {
        Duration::from_millis(self.verify_interval_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ReconcileResult<()> {
        if self.verify_attempts == 0 {
            return Err(ReconcileError::configuration(
                "verify_attempts must be at least 1",
            ));
        }
        if self.verify_attempts > 100 {
            return Err(ReconcileError::configuration(
                "verify_attempts must not exceed 100",
            ));
        }
        if self.verify_interval_ms > 60_000 {
            return Err(ReconcileError::configuration(
                "verify_interval_ms must not exceed 60000",
            ));
        }
        Ok(())
    }

    /// Parse configuration from environment variables.
    ///
    /// Reads:
    /// - `XAVYO_RECONCILE_PREVENT_DUPLICATE_NAMES` (default: false)
    /// - `XAVYO_RECONCILE_ALLOW_OWNER_DRAIN` (default: false)
    /// - `XAVYO_RECONCILE_VERIFY_ATTEMPTS` (default: 5)
    /// - `XAVYO_RECONCILE_VERIFY_INTERVAL_MS` (default: 2000)
    pub fn from_env() -> ReconcileResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> ReconcileResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };
        let defaults = Self::default();

        let config = Self {
            prevent_duplicate_names: match get("PREVENT_DUPLICATE_NAMES") {
                Some(v) => parse_bool("PREVENT_DUPLICATE_NAMES", &v)?,
                None => defaults.prevent_duplicate_names,
            },
            allow_owner_drain: match get("ALLOW_OWNER_DRAIN") {
                Some(v) => parse_bool("ALLOW_OWNER_DRAIN", &v)?,
                None => defaults.allow_owner_drain,
            },
            verify_attempts: match get("VERIFY_ATTEMPTS") {
                Some(v) => parse_number("VERIFY_ATTEMPTS", &v)?,
                None => defaults.verify_attempts,
            },
            verify_interval_ms: match get("VERIFY_INTERVAL_MS") {
                Some(v) => parse_number("VERIFY_INTERVAL_MS", &v)?,
                None => defaults.verify_interval_ms,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_bool(name: &str, value: &str) -> ReconcileResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ReconcileError::configuration(format!(
            "{ENV_PREFIX}{name} must be a boolean, got {value:?}"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> ReconcileResult<T> {
    value.trim().parse().map_err(|_| {
        ReconcileError::configuration(format!(
            "{ENV_PREFIX}{name} must be a non-negative integer, got {value:?}"
        ))
    })
}

/// Builder for [`ReconcileConfig`].
#[derive(Debug, Default)]
pub struct ReconcileConfigBuilder {
    config: ReconcileConfig,
}

impl ReconcileConfigBuilder {
    /// Refuse to create objects whose display name is taken.
    #[must_use]
    pub fn prevent_duplicate_names(mut self, enabled: bool) -> Self {
        self.config.prevent_duplicate_names = enabled;
        self
    }

    /// Allow removing the last owner of a group.
    #[must_use]
    pub fn allow_owner_drain(mut self, enabled: bool) -> Self {
        self.config.allow_owner_drain = enabled;
        self
    }

    /// Read-back attempts after creating a credential.
    #[must_use]
    pub fn verify_attempts(mut self, attempts: u32) -> Self {
        self.config.verify_attempts = attempts;
        self
    }

    /// Delay between read-back attempts.
    #[must_use]
    pub fn verify_interval(mut self, interval: Duration) -> Self {
        self.config.verify_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> ReconcileResult<ReconcileConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
