//! Client configuration types.

use std::time::Duration;

/// Page size used when listing items and experiments
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Connection settings for one eLabFTW instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Instance URL without the `/api/v2` suffix
    pub host_url: String,
    pub api_key: String,
    pub verify_ssl: bool,
    pub timeout: Duration,
    /// Entities per list request for paginated collections
    pub page_size: usize,
}

impl ClientConfig {
    pub fn new(host_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host_url: host_url.into(),
            api_key: api_key.into(),
            verify_ssl: true,
            timeout: Duration::from_secs(30),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Base URL of the v2 API.
    pub fn api_base(&self) -> String {
        let host = self.host_url.trim_end_matches('/');
        let host = host.strip_suffix("/api/v2").unwrap_or(host);
        format!("{host}/api/v2")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base() {
        let config = ClientConfig::new("https://elab.example.org/", "key");
        assert_eq!(config.api_base(), "https://elab.example.org/api/v2");

        let config = ClientConfig::new("https://elab.example.org/api/v2/", "key");
        assert_eq!(config.api_base(), "https://elab.example.org/api/v2");
    }

    #[test]
    fn test_retry_config_delay() {
        let config = RetryConfig::new(4, Duration::from_secs(1), 2.0);
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn test_retry_config_max_delay() {
        let config = RetryConfig::new(10, Duration::from_secs(10), 4.0);
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(30));
    }

    #[test]
    fn test_no_retry() {
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }
}
