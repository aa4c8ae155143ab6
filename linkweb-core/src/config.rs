use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_DEPTH: u32 = 7;
pub const DEFAULT_MAX_LINKS_PER_PAGE: usize = 7;
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 2;
pub const DEFAULT_RESULT_TTL_SECS: u64 = 60;
pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 30;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("per-page link cap must be at least 1")]
    ZeroLinkCap,

    #[error("fetch timeout must be non-zero")]
    ZeroTimeout,

    #[error("result TTL must be non-zero")]
    ZeroTtl,

    #[error("purge interval must be non-zero")]
    ZeroPurgeInterval,
}

/// Tunables for crawl sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Depth budget handed to the root of every crawl.
    pub max_depth: u32,
    /// Qualifying links collected per page before the scan stops.
    pub max_links_per_page: usize,
    /// Concurrent fetches allowed per session.
    pub max_concurrency: usize,
    /// Connect, read and idle timeout for each fetch.
    pub fetch_timeout: Duration,
    /// How long a result stream stays readable after its last write.
    pub result_ttl: Duration,
    /// How often expired streams are swept from the store.
    pub purge_interval: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_links_per_page: DEFAULT_MAX_LINKS_PER_PAGE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            result_ttl: Duration::from_secs(DEFAULT_RESULT_TTL_SECS),
            purge_interval: Duration::from_secs(DEFAULT_PURGE_INTERVAL_SECS),
        }
    }
}

impl CrawlConfig {
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_links_per_page(mut self, links: usize) -> Self {
        self.max_links_per_page = links;
        self
    }

    pub fn with_max_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrency = concurrency;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    /// Rejects settings that would stall every crawl.
    ///
    /// A depth of zero is allowed: such sessions finish immediately with only
    /// the completion record.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_links_per_page == 0 {
            return Err(ConfigError::ZeroLinkCap);
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.result_ttl.is_zero() {
            return Err(ConfigError::ZeroTtl);
        }
        if self.purge_interval.is_zero() {
            return Err(ConfigError::ZeroPurgeInterval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = CrawlConfig::default();
        assert_eq!(config.max_depth, 7);
        assert_eq!(config.max_links_per_page, 7);
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.fetch_timeout, Duration::from_secs(2));
        assert_eq!(config.result_ttl, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let base = CrawlConfig::default();
        assert_eq!(
            base.clone().with_max_concurrency(0).validate(),
            Err(ConfigError::ZeroConcurrency)
        );
        assert_eq!(
            base.clone().with_max_links_per_page(0).validate(),
            Err(ConfigError::ZeroLinkCap)
        );
        assert_eq!(
            base.clone().with_fetch_timeout(Duration::ZERO).validate(),
            Err(ConfigError::ZeroTimeout)
        );
        assert_eq!(
            base.clone().with_result_ttl(Duration::ZERO).validate(),
            Err(ConfigError::ZeroTtl)
        );
        assert_eq!(
            base.clone().with_purge_interval(Duration::ZERO).validate(),
            Err(ConfigError::ZeroPurgeInterval)
        );
        assert!(base.with_max_depth(0).validate().is_ok());
    }
}
