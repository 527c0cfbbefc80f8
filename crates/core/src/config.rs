//! Client configuration via `lattice.toml`
//!
//! All fields have defaults, so an empty file (or no file at all) yields a
//! working client. Timeouts are given in milliseconds; a missing request
//! timeout means calls wait as long as the transport does.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "lattice.toml";

/// When a transaction obtains its start timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartTimestampPolicy {
    /// The first query or mutation response assigns it
    Lazy,
    /// `Client::begin` asks the oracle up front, fixing the snapshot at begin
    #[default]
    Eager,
}

/// Retry behavior for conflict-retrying helpers
///
/// Each attempt runs in a brand new transaction; a commit is never re-sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Base delay between retries in milliseconds (exponential backoff)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    10
}

fn default_max_delay_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Create a new RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay between retries
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Delay before the given retry attempt (exponential backoff, capped)
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        // Cap the shift to prevent overflow (1 << 63 is the max for u64)
        let shift = attempt.min(63);
        let multiplier = 1u64 << shift;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Client configuration loaded from `lattice.toml`.
///
/// # Example
///
/// ```toml
/// start_timestamp = "eager"
/// request_timeout_ms = 5000
/// commit_timeout_ms = 10000
/// discard_timeout_ms = 1000
///
/// [retry]
/// max_retries = 3
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Start timestamp policy: `"lazy"` or `"eager"`.
    #[serde(default)]
    pub start_timestamp: StartTimestampPolicy,
    /// Deadline for begin, query and mutate calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    /// Deadline for commit calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timeout_ms: Option<u64>,
    /// Deadline for the best-effort discard notification.
    #[serde(default = "default_discard_timeout_ms")]
    pub discard_timeout_ms: u64,
    /// Retry policy for conflict-retrying helpers.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_discard_timeout_ms() -> u64 {
    1000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            start_timestamp: StartTimestampPolicy::default(),
            request_timeout_ms: None,
            commit_timeout_ms: None,
            discard_timeout_ms: default_discard_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Deadline for begin, query and mutate calls
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Deadline for commit calls, falling back to the request deadline
    pub fn commit_timeout(&self) -> Option<Duration> {
        self.commit_timeout_ms
            .map(Duration::from_millis)
            .or_else(|| self.request_timeout())
    }

    /// Deadline for discard notifications
    pub fn discard_timeout(&self) -> Duration {
        Duration::from_millis(self.discard_timeout_ms)
    }

    /// Set the start timestamp policy
    pub fn with_start_timestamp(mut self, policy: StartTimestampPolicy) -> Self {
        self.start_timestamp = policy;
        self
    }

    /// Set the request deadline in milliseconds
    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the commit deadline in milliseconds
    pub fn with_commit_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.commit_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the discard deadline in milliseconds
    pub fn with_discard_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.discard_timeout_ms = timeout_ms;
        self
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Lattice client configuration
#
# Start timestamp policy for begin(): "eager" (default) or "lazy"
#   "eager" = begin() asks the oracle before returning the transaction
#   "lazy"  = the first query or mutation response assigns the timestamp
start_timestamp = "eager"

# Deadline for begin, query and mutate calls (default: none).
# request_timeout_ms = 5000

# Deadline for commit calls (default: request_timeout_ms).
# A commit that runs out of time leaves the transaction failed.
# commit_timeout_ms = 10000

# Deadline for the best-effort discard notification (default: 1000).
discard_timeout_ms = 1000

# Retry policy for conflict-retrying helpers.
[retry]
max_retries = 3
base_delay_ms = 10
max_delay_ms = 100
"#
    }

    /// Parse config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the text is not valid TOML for this config.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::config(format!("failed to parse client config: {}", e)))
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| {
            Error::config(format!("config file '{}': {}", path.display(), e))
        })
    }

    /// Serialize this config to TOML text.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("failed to serialize client config: {}", e)))
    }
}
