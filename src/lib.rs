//! Proxypool - resilient outbound HTTP through untrusted proxies
//!
//! Every request is routed through one proxy out of a self-maintaining pool.
//! Failing proxies are retried around, scored and excluded so the caller only
//! sees a single request/response interface.
//!
//! ## Features
//!
//! - Latency-weighted random proxy selection
//! - Automatic exclusion of failing or banned proxies
//! - Pool refresh from pluggable providers when every proxy has gone bad
//! - Rate-limit backoff with a configurable ceiling
//! - HTTP, HTTPS, SOCKS4 and SOCKS5 proxy support
//! - A small worker pool for fanning out requests

pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod proxy;
pub mod services;

pub use config::{Config, PoolConfig};
pub use error::{PoolError, Result, TransportError};
pub use models::{DispatchResponse, ProxyAddress, ProxyProtocol, ProxyRecord, RequestOptions};
pub use providers::{ListProvider, ProviderFetch, ProviderRegistry, ProxyProvider, StaticProvider};
pub use proxy::{CongestionPolicy, Dispatcher, PoolWideBackoff, ProxyPool, ReqwestTransport, Transport};
pub use services::WorkerPool;

use std::sync::Arc;

/// Build a pool and a reqwest-backed dispatcher in one go
pub fn build(providers: ProviderRegistry, config: &PoolConfig) -> Result<Dispatcher> {
    config.validate()?;
    let pool = Arc::new(ProxyPool::new(providers, config.max_proxy_failrate)?);
    Ok(Dispatcher::new(pool, Arc::new(ReqwestTransport::new()), config))
}
