/**
 * Configuration constants and tunables for suppliers, the refresh scheduler and pagination
 */
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default freshness window for a supplied value
pub const DEFAULT_TTL_SECS: u64 = 60;

/// Maximum number of producers a single store keeps before evicting the least recently used
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Per-fetch deadline applied by the wallet fetchers
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 15_000;

/// How often the refresh scheduler looks for expired entries
pub const DEFAULT_REFRESH_SCAN_SECS: u64 = 5;

/// Default number of concurrent scheduled refreshes
pub const DEFAULT_CONCURRENT_REFRESHES: usize = 8;

/// Channel buffer size for refresh events
pub const REFRESH_EVENT_CHANNEL_CAPACITY: usize = 100;

/// Default page size for paginated fetchers
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Retry defaults used by `retry_until_success`
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
pub const INITIAL_BACKOFF_MS: u64 = 200;
pub const MAX_BACKOFF_MS: u64 = 10_000;

/// Prefix of the environment variables read by [`SupplyConfig::with_env_overrides`]
pub const ENV_PREFIX: &str = "WALLETFEED_";

/// Tunables for one application scope. Every field has a default, so a partial JSON
/// document is enough.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SupplyConfig {
    pub max_entries: usize,
    pub default_ttl_secs: u64,
    pub fetch_timeout_ms: u64,
    pub refresh_scan_secs: u64,
    pub max_concurrent_refreshes: usize,
    pub page_limit: usize,
    pub retry: RetryPolicy,
}

impl Default for SupplyConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl_secs: DEFAULT_TTL_SECS,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            refresh_scan_secs: DEFAULT_REFRESH_SCAN_SECS,
            max_concurrent_refreshes: DEFAULT_CONCURRENT_REFRESHES,
            page_limit: DEFAULT_PAGE_LIMIT,
            retry: RetryPolicy::default(),
        }
    }
}

impl SupplyConfig {
    /// Parse a (possibly partial) JSON document
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON for this struct or fails validation
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the file cannot be read, otherwise as [`Self::from_json_str`]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Override fields from `WALLETFEED_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but does not parse
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::with_env_overrides`] with an injectable lookup
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but does not parse
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| Error::Custom(format!("invalid value for {name}: {raw}")))
        }

        let var = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name).map(|raw| (name, raw))
        };

        if let Some((name, raw)) = var("MAX_ENTRIES") {
            self.max_entries = parse(&name, &raw)?;
        }
        if let Some((name, raw)) = var("TTL_SECS") {
            self.default_ttl_secs = parse(&name, &raw)?;
        }
        if let Some((name, raw)) = var("FETCH_TIMEOUT_MS") {
            self.fetch_timeout_ms = parse(&name, &raw)?;
        }
        if let Some((name, raw)) = var("REFRESH_SCAN_SECS") {
            self.refresh_scan_secs = parse(&name, &raw)?;
        }
        if let Some((name, raw)) = var("MAX_CONCURRENT_REFRESHES") {
            self.max_concurrent_refreshes = parse(&name, &raw)?;
        }
        if let Some((name, raw)) = var("PAGE_LIMIT") {
            self.page_limit = parse(&name, &raw)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns an error if a limit is zero
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("max_entries", self.max_entries == 0),
            ("max_concurrent_refreshes", self.max_concurrent_refreshes == 0),
            ("page_limit", self.page_limit == 0),
            ("retry.max_attempts", self.retry.max_attempts == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(Error::Custom(format!("{field} must be greater than 0"))),
            None => Ok(()),
        }
    }

    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    #[must_use]
    pub const fn refresh_scan_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_scan_secs)
    }
}

/// Attempts and exponential backoff for `retry_until_success`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, no sleeping between attempts
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before the attempt following `attempt` (0-based): doubles each time, capped
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(DEFAULT_TTL_SECS > 0, "DEFAULT_TTL_SECS must be greater than 0");
    assert!(DEFAULT_MAX_ENTRIES > 0, "DEFAULT_MAX_ENTRIES must be greater than 0");
    assert!(DEFAULT_FETCH_TIMEOUT_MS > 0, "DEFAULT_FETCH_TIMEOUT_MS must be greater than 0");
    assert!(DEFAULT_REFRESH_SCAN_SECS > 0, "DEFAULT_REFRESH_SCAN_SECS must be greater than 0");
    assert!(DEFAULT_CONCURRENT_REFRESHES > 0, "DEFAULT_CONCURRENT_REFRESHES must be greater than 0");
    assert!(REFRESH_EVENT_CHANNEL_CAPACITY > 0, "REFRESH_EVENT_CHANNEL_CAPACITY must be greater than 0");
    assert!(DEFAULT_PAGE_LIMIT > 0, "DEFAULT_PAGE_LIMIT must be greater than 0");
    assert!(DEFAULT_RETRY_ATTEMPTS > 0, "DEFAULT_RETRY_ATTEMPTS must be greater than 0");
    assert!(INITIAL_BACKOFF_MS <= MAX_BACKOFF_MS, "INITIAL_BACKOFF_MS must not exceed MAX_BACKOFF_MS");
};
