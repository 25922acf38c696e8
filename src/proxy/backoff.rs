//! What to do when the destination signals rate limiting

use std::time::Duration;

use http::{HeaderMap, StatusCode};

use crate::config::PoolConfig;
use crate::models::ProxyAddress;

/// Decides how a request reacts to a 429/503 answer.
pub trait CongestionPolicy: Send + Sync {
    /// Called for every rate-limit response of a logical request.
    ///
    /// `rate_limited` counts such responses so far, this one included.
    /// Returns the pause before the next attempt, or `None` to give up.
    fn on_rate_limited(
        &self,
        proxy: &ProxyAddress,
        status: StatusCode,
        headers: &HeaderMap,
        rate_limited: u32,
    ) -> Option<Duration>;
}

/// Backs off the whole request for a fixed interval, regardless of proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolWideBackoff {
    interval: Duration,
    /// 0 means no ceiling
    max_backoffs: u32,
}

impl PoolWideBackoff {
    pub fn new(interval: Duration, max_backoffs: u32) -> Self {
        Self {
            interval,
            max_backoffs,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.backoff_interval, config.max_backoffs)
    }
}

impl Default for PoolWideBackoff {
    fn default() -> Self {
        Self::from_config(&PoolConfig::default())
    }
}

impl CongestionPolicy for PoolWideBackoff {
    fn on_rate_limited(
        &self,
        _proxy: &ProxyAddress,
        _status: StatusCode,
        _headers: &HeaderMap,
        rate_limited: u32,
    ) -> Option<Duration> {
        if self.max_backoffs != 0 && rate_limited > self.max_backoffs {
            return None;
        }
        Some(self.interval)
    }
}

/// Whether a status means the destination is throttling us
pub fn is_rate_limit(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    )
}
