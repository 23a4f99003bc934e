//! Client configuration.
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `WAYPOINT_API_URL` | API base URL (default: `https://api.waypoint.dev/v1`) |
//! | `WAYPOINT_API_TOKEN` | Bearer token |
//! | `WAYPOINT_API_TIMEOUT` | Request timeout in seconds (default: 30) |
//! | `WAYPOINT_API_MAX_RETRIES` | Request retries for transient failures (default: 3) |
//! | `WAYPOINT_POLL_INTERVAL_MS` | Polling interval for update subscriptions (default: 5000) |
//! | `WAYPOINT_MAX_RECONNECTS` | Subscription reconnect attempts before degrading (default: 5) |

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProgressError, ProgressResult};
use crate::fetcher::BackoffPolicy;

/// Progress client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL for the progress API.
    #[serde(default = "default_url")]
    pub url: String,

    /// Bearer token. Never serialized.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Request-level retry for rate limits and transport failures.
    #[serde(default = "BackoffPolicy::requests")]
    pub retry: BackoffPolicy,

    /// Interval between polls when subscribing by polling.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Subscription reconnect policy.
    #[serde(default = "BackoffPolicy::reconnects")]
    pub reconnect: BackoffPolicy,

    /// Evict a completed assessment this long after it completes.
    #[serde(default)]
    pub terminal_grace_secs: Option<u64>,
}

fn default_url() -> String {
    "https://api.waypoint.dev/v1".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    5_000
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token: None,
            timeout_secs: default_timeout(),
            retry: BackoffPolicy::requests(),
            poll_interval_ms: default_poll_interval(),
            reconnect: BackoffPolicy::reconnects(),
            terminal_grace_secs: None,
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables (see module docs).
    pub fn from_env() -> Self {
        Self::default().merge_env()
    }

    /// Override fields with any `WAYPOINT_*` variables that are set.
    pub fn merge_env(mut self) -> Self {
        if let Ok(url) = std::env::var("WAYPOINT_API_URL") {
            self.url = url;
        }
        if let Some(token) = std::env::var("WAYPOINT_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
        {
            self.token = Some(token);
        }
        if let Some(timeout) = env_parse("WAYPOINT_API_TIMEOUT") {
            self.timeout_secs = timeout;
        }
        if let Some(retries) = env_parse("WAYPOINT_API_MAX_RETRIES") {
            self.retry.max_attempts = retries;
        }
        if let Some(interval) = env_parse("WAYPOINT_POLL_INTERVAL_MS") {
            self.poll_interval_ms = interval;
        }
        if let Some(reconnects) = env_parse("WAYPOINT_MAX_RECONNECTS") {
            self.reconnect.max_attempts = reconnects;
        }
        self
    }

    /// Parse YAML config. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> ProgressResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| ProgressError::Config {
            message: format!("invalid config: {}", e),
        })
    }

    /// Load YAML config from a file.
    pub fn load(path: impl AsRef<Path>) -> ProgressResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ProgressError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_yaml_str(&content)
    }

    /// Check values that would otherwise fail late.
    pub fn validate(&self) -> ProgressResult<()> {
        let parsed = url::Url::parse(&self.url).map_err(|e| ProgressError::Config {
            message: format!("invalid url {:?}: {}", self.url, e),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(ProgressError::Config {
                message: format!("url {:?} cannot be used as a base", self.url),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ProgressError::Config {
                message: "timeout_secs must be positive".into(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ProgressError::Config {
                message: "poll_interval_ms must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn terminal_grace(&self) -> Option<Duration> {
        self.terminal_grace_secs.map(Duration::from_secs)
    }

    /// Set the token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the base URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_retry(mut self, retry: BackoffPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_reconnect(mut self, reconnect: BackoffPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_terminal_grace(mut self, grace: Duration) -> Self {
        self.terminal_grace_secs = Some(grace.as_secs());
        self
    }
}
