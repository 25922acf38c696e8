//! Proxy providers
//!
//! Providers are pluggable sources of candidate proxy addresses. The pool asks
//! every registered provider for a fresh set whenever it runs out of good
//! proxies.

mod list;
mod static_list;

pub use list::ListProvider;
pub use static_list::StaticProvider;

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::error::{PoolError, Result};
use crate::models::ProxyAddress;

/// Source of proxy addresses, e.g. `"socks5://1.1.1.1:5000"`
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    /// Return the currently known proxy addresses.
    ///
    /// An empty set means the provider has nothing to offer right now.
    async fn fetch(&self) -> Result<HashSet<String>>;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Ordered collection of providers consulted on every pool refresh
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ProxyProvider>>,
}

impl ProviderRegistry {
    /// Create a registry; at least one provider is required
    pub fn new(providers: Vec<Arc<dyn ProxyProvider>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(PoolError::InvalidConfig(
                "at least one proxy provider is required".into(),
            ));
        }
        Ok(Self { providers })
    }

    /// Build the providers named in the configuration
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let mut providers: Vec<Arc<dyn ProxyProvider>> = Vec::new();

        if !config.static_proxies.is_empty() {
            providers.push(Arc::new(StaticProvider::new(
                "static",
                config.static_proxies.iter().cloned(),
            )));
        }
        for url in &config.list_urls {
            providers.push(Arc::new(ListProvider::new(
                url.clone(),
                config.list_default_protocol,
            )?));
        }
        if config.tor {
            providers.push(Arc::new(StaticProvider::tor()));
        }

        Self::new(providers)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Ask every provider and union the results.
    ///
    /// A failing provider contributes nothing; it never aborts the others.
    /// Its error is returned alongside the addresses. Strings that do not
    /// parse as proxy addresses are dropped.
    pub async fn fetch_all(&self) -> ProviderFetch {
        let results = futures::future::join_all(self.providers.iter().map(|p| p.fetch())).await;

        let mut fetch = ProviderFetch::default();
        for (provider, result) in self.providers.iter().zip(results) {
            match result {
                Ok(raw) => {
                    info!("Got {} proxies from {}", raw.len(), provider.name());
                    for entry in raw {
                        match ProxyAddress::parse(&entry) {
                            Ok(addr) => {
                                fetch.addresses.insert(addr);
                            }
                            Err(e) => {
                                debug!("Skipping {:?} from {}: {}", entry, provider.name(), e);
                            }
                        }
                    }
                }
                Err(e) => fetch.errors.push(PoolError::Provider {
                    provider: provider.name().to_string(),
                    message: e.to_string(),
                }),
            }
        }

        fetch
    }
}

/// Result of asking every provider once
#[derive(Debug, Default)]
pub struct ProviderFetch {
    /// Union of every parsed address, in walk order
    pub addresses: BTreeSet<ProxyAddress>,
    /// One [`PoolError::Provider`] per provider that failed
    pub errors: Vec<PoolError>,
}
