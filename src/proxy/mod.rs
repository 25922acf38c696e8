//! Proxy pool and dispatch
//!
//! This module provides:
//! - The proxy pool with latency-weighted sampling and failure tracking
//! - Transport of single requests through HTTP and SOCKS proxies
//! - The retry state machine that turns proxy churn into one reliable call
//! - Pluggable handling of destination rate limiting

pub mod backoff;
pub mod dispatch;
pub mod pool;
pub mod sampling;
pub mod transport;

pub use backoff::{CongestionPolicy, PoolWideBackoff};
pub use dispatch::{Dispatcher, DispatcherConfig};
pub use pool::{PoolSnapshot, PoolSummary, ProxyPool, SampledProxy};
pub use transport::{ReqwestTransport, Transport};
