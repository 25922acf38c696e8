use std::borrow::Cow;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use super::ProxyAddress;
use crate::error::{PoolError, Result};

/// Caller-controlled parts of a request.
///
/// The proxy and the timeout are always chosen by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PoolError::InvalidRequest(format!("invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| PoolError::InvalidRequest(format!("invalid header value: {}", e)))?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Fully resolved request handed to the transport
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl DispatchRequest {
    pub fn new(method: Method, url: &str, options: RequestOptions) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| PoolError::InvalidRequest(format!("invalid URL {}: {}", url, e)))?;
        Ok(Self {
            method,
            url,
            headers: options.headers,
            body: options.body,
        })
    }
}

/// Response from the destination, as relayed by a proxy
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Time until the response headers arrived
    pub elapsed: Duration,
    /// Proxy that carried the request
    pub proxy: ProxyAddress,
}

impl DispatchResponse {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
