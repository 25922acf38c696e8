use crate::error::{PoolError, Result};
use crate::models::ProxyProtocol;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy pool and dispatch tuning
    pub pool: PoolConfig,
    /// Where proxies come from
    pub providers: ProviderConfig,
    /// Background workers for the command line runner
    pub runner: RunnerConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Failed attempts (via different proxies) before giving up on a request
    pub max_proxy_attempts: u32,
    /// Timeout for each proxied attempt
    pub default_timeout: Duration,
    /// Failure rate at which a proxy stops being sampled, in [0, 1)
    pub max_proxy_failrate: f64,
    /// Pause after the destination signals rate limiting (429/503)
    pub backoff_interval: Duration,
    /// Rate-limit backoffs allowed per request, 0 for unlimited
    pub max_backoffs: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_proxy_attempts: 30,
            default_timeout: Duration::from_secs_f64(5.0),
            max_proxy_failrate: 0.1,
            backoff_interval: Duration::from_secs(60),
            max_backoffs: 10,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.max_proxy_failrate) {
            return Err(PoolError::InvalidConfig(format!(
                "max_proxy_failrate must be in [0, 1), got {}",
                self.max_proxy_failrate
            )));
        }
        if self.default_timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "default_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Fixed proxy addresses
    pub static_proxies: Vec<String>,
    /// Include the local Tor SOCKS endpoint
    pub tor: bool,
    /// Plain-text proxy lists to download
    pub list_urls: Vec<String>,
    /// Scheme for list entries given as bare `host:port`
    pub list_default_protocol: ProxyProtocol,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// URLs to fetch
    pub targets: Vec<String>,
    /// How many times each target is fetched
    pub requests_per_target: usize,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let pool = PoolConfig {
            max_proxy_attempts: parse_env("PROXYPOOL_MAX_PROXY_ATTEMPTS", "30")?,
            default_timeout: Duration::try_from_secs_f64(parse_env(
                "PROXYPOOL_DEFAULT_TIMEOUT",
                "5.0",
            )?)
            .map_err(|_| {
                PoolError::InvalidConfig(
                    "PROXYPOOL_DEFAULT_TIMEOUT must be a non-negative number of seconds".into(),
                )
            })?,
            max_proxy_failrate: parse_env("PROXYPOOL_MAX_PROXY_FAILRATE", "0.1")?,
            backoff_interval: Duration::from_secs(parse_env("PROXYPOOL_BACKOFF_SECS", "60")?),
            max_backoffs: parse_env("PROXYPOOL_MAX_BACKOFFS", "10")?,
        };
        pool.validate()?;

        let list_scheme = get_env_or("PROXYPOOL_LIST_DEFAULT_SCHEME", "http");
        let list_default_protocol = ProxyProtocol::from_str(&list_scheme).ok_or_else(|| {
            PoolError::InvalidConfig(format!(
                "PROXYPOOL_LIST_DEFAULT_SCHEME has unsupported scheme: {}",
                list_scheme
            ))
        })?;

        Ok(Config {
            pool,
            providers: ProviderConfig {
                static_proxies: split_list(&get_env_or("PROXYPOOL_STATIC_PROXIES", "")),
                tor: parse_env("PROXYPOOL_TOR", "false")?,
                list_urls: split_list(&get_env_or("PROXYPOOL_LIST_URLS", "")),
                list_default_protocol,
            },
            runner: RunnerConfig {
                workers: parse_env::<usize>("PROXYPOOL_WORKERS", "4")?.max(1),
                targets: split_list(&get_env_or("PROXYPOOL_TARGETS", "https://api.ipify.org")),
                requests_per_target: parse_env("PROXYPOOL_REQUESTS_PER_TARGET", "10")?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| PoolError::InvalidConfig(format!("{} has an invalid value", key)))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
