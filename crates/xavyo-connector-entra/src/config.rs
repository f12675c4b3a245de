//! Configuration for the Entra ID directory client.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{EntraError, EntraResult};

/// Microsoft cloud the tenant lives in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntraCloudEnvironment {
    /// Global Azure.
    #[default]
    Commercial,
    /// Azure US Government (GCC High / DoD).
    UsGovernment,
    /// Azure China (21Vianet).
    China,
    /// Azure Germany.
    Germany,
    /// Explicit endpoints, e.g. a sovereign cloud or a test server.
    Custom {
        login_endpoint: String,
        graph_endpoint: String,
    },
}

impl EntraCloudEnvironment {
    /// OAuth2 authority host, without trailing slash.
    #[must_use]
    pub fn login_endpoint(&self) -> &str {
        match self {
            Self::Commercial => "https://login.microsoftonline.com",
            Self::UsGovernment => "https://login.microsoftonline.us",
            Self::China => "https://login.chinacloudapi.cn",
            Self::Germany => "https://login.microsoftonline.de",
            Self::Custom { login_endpoint, .. } => login_endpoint.trim_end_matches('/'),
        }
    }

    /// Graph API host, without trailing slash.
    #[must_use]
    pub fn graph_endpoint(&self) -> &str {
        match self {
            Self::Commercial => "https://graph.microsoft.com",
            Self::UsGovernment => "https://graph.microsoft.us",
            Self::China => "https://microsoftgraph.chinacloudapi.cn",
            Self::Germany => "https://graph.microsoft.de",
            Self::Custom { graph_endpoint, .. } => graph_endpoint.trim_end_matches('/'),
        }
    }
}

/// App registration used for the client credentials flow.
#[derive(Debug)]
pub struct EntraCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

fn default_api_version() -> String {
    "v1.0".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_factor() -> f64 {
    0.25
}

/// Transport-level retry budget for throttling and gateway errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 5).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds (default: 1000ms).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on any single delay, including `Retry-After` (default: 60s).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the delay (default: 0.25).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// Short delays for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 10,
            jitter_factor: 0.0,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay_ms == 0 {
            return Err("base_delay_ms must be greater than 0".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must be >= base_delay_ms".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("jitter_factor must be in range [0.0, 1.0]".to_string());
        }
        Ok(())
    }

    /// Exponential delay for `attempt` (0-based), capped at `max_delay_ms`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = 2_u64.saturating_pow(attempt.min(32));
        let delay_ms = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Honor a `Retry-After` value, capped at `max_delay_ms`.
    #[must_use]
    pub fn retry_after_delay(&self, secs: u64) -> Duration {
        Duration::from_millis(secs.saturating_mul(1000).min(self.max_delay_ms))
    }

    /// Add up to `jitter_factor` of random extra delay.
    #[must_use]
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        use rand::Rng;

        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let delay_ms = delay.as_millis() as f64;
        let jitter = rand::thread_rng().gen_range(0.0..=delay_ms * self.jitter_factor);
        Duration::from_millis((delay_ms + jitter) as u64)
    }
}

/// Entra ID client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntraConfig {
    /// Directory (tenant) id.
    pub tenant_id: String,

    #[serde(default)]
    pub cloud_environment: EntraCloudEnvironment,

    /// Graph API version segment (default: `v1.0`).
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// `$top` for paged list calls (default: 100).
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl EntraConfig {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> EntraConfigBuilder {
        EntraConfigBuilder::default()
    }

    /// Per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> EntraResult<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(EntraError::Config("tenant_id is required".to_string()));
        }
        if self.api_version.trim().is_empty() {
            return Err(EntraError::Config("api_version must not be empty".to_string()));
        }
        if !(1..=999).contains(&self.page_size) {
            return Err(EntraError::Config(
                "page_size must be between 1 and 999".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(EntraError::Config("timeout_secs must be greater than 0".to_string()));
        }
        if let EntraCloudEnvironment::Custom {
            login_endpoint,
            graph_endpoint,
        } = &self.cloud_environment
        {
            for endpoint in [login_endpoint, graph_endpoint] {
                url::Url::parse(endpoint)
                    .map_err(|e| EntraError::Config(format!("invalid endpoint {endpoint:?}: {e}")))?;
            }
        }
        self.retry
            .validate()
            .map_err(|e| EntraError::Config(format!("invalid retry config: {e}")))
    }
}

/// Builder for [`EntraConfig`].
#[derive(Debug, Default)]
pub struct EntraConfigBuilder {
    tenant_id: Option<String>,
    cloud_environment: EntraCloudEnvironment,
    api_version: Option<String>,
    page_size: Option<u32>,
    timeout_secs: Option<u64>,
    retry: Option<RetryConfig>,
}

impl EntraConfigBuilder {
    #[must_use]
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn cloud_environment(mut self, env: EntraCloudEnvironment) -> Self {
        self.cloud_environment = env;
        self
    }

    #[must_use]
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> EntraResult<EntraConfig> {
        let config = EntraConfig {
            tenant_id: self.tenant_id.unwrap_or_default(),
            cloud_environment: self.cloud_environment,
            api_version: self.api_version.unwrap_or_else(default_api_version),
            page_size: self.page_size.unwrap_or_else(default_page_size),
            timeout_secs: self.timeout_secs.unwrap_or_else(default_timeout_secs),
            retry: self.retry.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}
