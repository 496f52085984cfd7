//! Configuration types for piece-dl
//!
//! Every field has a default, so an empty JSON object is a valid config file.
//! Durations are written as integer milliseconds.

use crate::error::{Error, Result};
use crate::piece::DEFAULT_DEAL_HEIGHT;
use crate::piece::tree::MAX_HEIGHT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default location lookup service
pub const DEFAULT_ENDPOINT: &str = "https://roundabout.web3.storage/";

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Location lookup settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Local verification settings
    #[serde(default)]
    pub verify: VerifyConfig,

    /// Download plan settings
    #[serde(default)]
    pub plan: PlanConfig,
}

impl Config {
    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("config file {}", path.display()))
            }
            _ => Error::Io(e),
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a JSON config document
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<()> {
        let resolver = &self.resolver;
        if !matches!(resolver.endpoint.scheme(), "http" | "https") {
            return Err(Error::config(
                "resolver.endpoint",
                format!("unsupported scheme {:?}", resolver.endpoint.scheme()),
            ));
        }
        if !(100..=599).contains(&resolver.expected_status) {
            return Err(Error::config(
                "resolver.expected_status",
                format!("{} is not an HTTP status", resolver.expected_status),
            ));
        }
        if resolver.request_timeout.is_zero() {
            return Err(Error::config("resolver.request_timeout", "must be positive"));
        }
        if !resolver.retry.backoff_multiplier.is_finite() || resolver.retry.backoff_multiplier < 1.0
        {
            return Err(Error::config(
                "resolver.retry.backoff_multiplier",
                "must be a finite number of at least 1.0",
            ));
        }
        if resolver.retry.initial_delay > resolver.retry.max_delay {
            return Err(Error::config(
                "resolver.retry.initial_delay",
                "must not exceed max_delay",
            ));
        }

        if self.verify.workers == 0 {
            return Err(Error::config("verify.workers", "must be at least 1"));
        }
        if self.verify.read_buffer_size == 0 {
            return Err(Error::config("verify.read_buffer_size", "must be positive"));
        }
        if self.verify.deal_height > MAX_HEIGHT {
            return Err(Error::config(
                "verify.deal_height",
                format!("{} exceeds maximum {MAX_HEIGHT}", self.verify.deal_height),
            ));
        }

        if self.plan.concurrency == 0 {
            return Err(Error::config("plan.concurrency", "must be at least 1"));
        }
        Ok(())
    }
}

/// Location lookup configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Lookup service base URL (default: roundabout.web3.storage)
    #[serde(default = "default_endpoint")]
    pub endpoint: Url,

    /// Status the lookup service must answer with (default: 302)
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,

    /// Timeout for one lookup attempt (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_millis")]
    pub request_timeout: Duration,

    /// Retry policy for failed lookups
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            expected_status: default_expected_status(),
            request_timeout: default_request_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first (default: 5; 0 behaves as 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_millis")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Local verification configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Hashing threads (default: number of CPUs)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Read buffer per hashing thread in bytes (default: 1 MiB)
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Aggregate tree height; offers are composed into deals of `32 << deal_height`
    /// bytes (default: 30, a 32 GiB deal)
    #[serde(default = "default_deal_height")]
    pub deal_height: u8,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            read_buffer_size: default_read_buffer_size(),
            deal_height: default_deal_height(),
        }
    }
}

/// Download plan configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Concurrent location lookups (default: 100)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Which URL goes into each plan block
    #[serde(default)]
    pub url_source: PlanUrl,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            url_source: PlanUrl::default(),
        }
    }
}

/// URL written for each piece in a download plan
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanUrl {
    /// The lookup service URL; the downloader follows the redirect itself
    #[default]
    Lookup,
    /// The redirect target discovered during resolution
    Resolved,
}

// The constant is a valid absolute URL; covered by `defaults_are_valid`
#[allow(clippy::expect_used)]
fn default_endpoint() -> Url {
    Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL")
}

fn default_expected_status() -> u16 {
    302
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    num_cpus::get().max(1)
}

fn default_read_buffer_size() -> usize {
    1 << 20
}

fn default_deal_height() -> u8 {
    DEFAULT_DEAL_HEIGHT
}

fn default_concurrency() -> usize {
    100
}

// Duration serialization helper
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
