//! Plain-text proxy list fetched over HTTP
//!
//! Expects one proxy per line, either `scheme://host:port` or `host:port`.
//! Blank lines and `#` comments are ignored.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::ProxyProvider;
use crate::error::{PoolError, Result};
use crate::models::{ProxyAddress, ProxyProtocol};

pub struct ListProvider {
    url: String,
    default_protocol: ProxyProtocol,
    client: reqwest::Client,
}

impl ListProvider {
    pub fn new(url: impl Into<String>, default_protocol: ProxyProtocol) -> Result<Self> {
        Self::with_timeout(url, default_protocol, Duration::from_secs(30))
    }

    pub fn with_timeout(
        url: impl Into<String>,
        default_protocol: ProxyProtocol,
        timeout: Duration,
    ) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url)
            .map_err(|e| PoolError::InvalidConfig(format!("invalid list URL {}: {}", url, e)))?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            url,
            default_protocol,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Normalize a listing body into `scheme://host:port` strings
pub fn parse_lines(body: &str, default_protocol: ProxyProtocol) -> HashSet<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match ProxyAddress::parse_with_default(line, default_protocol) {
            Ok(addr) => Some(addr.to_string()),
            Err(e) => {
                debug!("Ignoring list entry {:?}: {}", line, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl ProxyProvider for ListProvider {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<HashSet<String>> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(parse_lines(&body, self.default_protocol))
    }

    fn name(&self) -> &str {
        &self.url
    }
}
