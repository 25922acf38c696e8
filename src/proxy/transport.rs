//! Proxy transport layer for HTTP and SOCKS proxies
//!
//! Issues a single request through a given upstream proxy.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::error::TransportError;
use crate::models::{DispatchRequest, DispatchResponse, ProxyAddress};

/// Client cache size at which all cached clients are dropped
const MAX_CACHED_CLIENTS: usize = 1024;

/// Capability to send one request through one proxy
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` through `proxy`, giving up after `timeout`.
    ///
    /// Errors describe what went wrong with the connection; HTTP error
    /// statuses are returned as regular responses.
    async fn send(
        &self,
        proxy: &ProxyAddress,
        request: &DispatchRequest,
        timeout: Duration,
    ) -> std::result::Result<DispatchResponse, TransportError>;
}

/// reqwest-backed transport, one client per proxy
#[derive(Default)]
pub struct ReqwestTransport {
    clients: DashMap<ProxyAddress, reqwest::Client>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, proxy: &ProxyAddress) -> std::result::Result<reqwest::Client, TransportError> {
        if let Some(client) = self.clients.get(proxy) {
            return Ok(client.clone());
        }

        // A proxy URL the client cannot use is the proxy's fault, not the request's.
        let upstream = reqwest::Proxy::all(proxy.client_url())
            .map_err(|e| TransportError::Connect(format!("unusable proxy {}: {}", proxy, e)))?;
        let client = reqwest::Client::builder()
            .proxy(upstream)
            .build()
            .map_err(|e| TransportError::Connect(format!("client for {}: {}", proxy, e)))?;

        if self.clients.len() >= MAX_CACHED_CLIENTS {
            debug!("Dropping {} cached proxy clients", self.clients.len());
            self.clients.clear();
        }
        self.clients.insert(proxy.clone(), client.clone());
        Ok(client)
    }

    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request), fields(proxy = %proxy, url = %request.url))]
    async fn send(
        &self,
        proxy: &ProxyAddress,
        request: &DispatchRequest,
        timeout: Duration,
    ) -> std::result::Result<DispatchResponse, TransportError> {
        let client = self.client_for(proxy)?;

        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .timeout(timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let start = Instant::now();
        let response = builder.send().await?;
        let elapsed = start.elapsed();

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(DispatchResponse {
            status,
            headers,
            body,
            elapsed,
            proxy: proxy.clone(),
        })
    }
}
