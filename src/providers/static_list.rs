//! Fixed list of proxies

use std::collections::HashSet;

use async_trait::async_trait;

use super::ProxyProvider;
use crate::error::Result;

/// Address of a local Tor daemon's SOCKS port
pub const TOR_ADDRESS: &str = "socks5://localhost:9050";

/// Always returns the same addresses
pub struct StaticProvider {
    name: String,
    addresses: HashSet<String>,
}

impl StaticProvider {
    pub fn new<I, S>(name: impl Into<String>, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }

    /// Local Tor endpoint
    pub fn tor() -> Self {
        Self::new("tor", [TOR_ADDRESS])
    }
}

#[async_trait]
impl ProxyProvider for StaticProvider {
    async fn fetch(&self) -> Result<HashSet<String>> {
        Ok(self.addresses.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
