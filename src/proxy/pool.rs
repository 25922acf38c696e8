//! Proxy pool with health tracking
//!
//! Owns the current generation of proxy records, refreshes it from the
//! providers once every proxy has gone bad, and draws latency-weighted
//! samples. One lock guards both set membership and every record's mutable
//! fields, so counters never lose updates and nobody observes a
//! half-replaced set.

use std::collections::BTreeMap;

use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::sampling;
use crate::error::{PoolError, Result};
use crate::models::{ProxyAddress, ProxyRecord, ProxySnapshot};
use crate::providers::ProviderRegistry;

/// A proxy handed out by [`ProxyPool::sample`].
///
/// Remembers which generation of the pool it came from so that outcomes
/// reported after a refresh do not leak into the fresh records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledProxy {
    pub address: ProxyAddress,
    generation: u64,
}

impl SampledProxy {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Default)]
struct PoolState {
    /// Keyed by address; iteration order is the sampling walk order
    records: BTreeMap<ProxyAddress, ProxyRecord>,
    /// Completed provider refreshes, doubles as the generation number
    refreshes: u64,
}

/// Counts reported by [`ProxyPool::summary`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub total: usize,
    pub good: usize,
    pub refreshes: u64,
}

impl std::fmt::Display for PoolSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} proxies ({} good, updated {} times)",
            self.total, self.good, self.refreshes
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    #[serde(flatten)]
    pub summary: PoolSummary,
    pub proxies: Vec<ProxySnapshot>,
}

pub struct ProxyPool {
    registry: ProviderRegistry,
    max_failrate: f64,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    /// Create an empty pool; the first sample triggers a refresh.
    ///
    /// `max_failrate` must lie in [0, 1).
    pub fn new(registry: ProviderRegistry, max_failrate: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&max_failrate) {
            return Err(PoolError::InvalidConfig(format!(
                "max_failrate must be in [0, 1), got {}",
                max_failrate
            )));
        }
        Ok(Self {
            registry,
            max_failrate,
            state: Mutex::new(PoolState::default()),
        })
    }

    pub fn max_failrate(&self) -> f64 {
        self.max_failrate
    }

    /// Replace every record with a fresh one from the providers.
    ///
    /// All health history is discarded. Fails with
    /// [`PoolError::NoProxiesAvailable`] when the providers return nothing.
    pub async fn refresh(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    async fn refresh_locked(&self, state: &mut PoolState) -> Result<()> {
        let fetch = self.registry.fetch_all().await;
        for err in &fetch.errors {
            warn!("{}", err);
        }

        state.records = fetch
            .addresses
            .into_iter()
            .map(|addr| (addr.clone(), ProxyRecord::new(addr)))
            .collect();
        state.refreshes += 1;

        if state.records.is_empty() {
            warn!("No proxies provided from any provider");
            return Err(PoolError::NoProxiesAvailable);
        }

        info!(
            "Pool refreshed with {} proxies (refresh #{})",
            state.records.len(),
            state.refreshes
        );
        Ok(())
    }

    /// Records that are neither excluded nor over the failure threshold
    pub async fn good_records(&self) -> Vec<ProxyRecord> {
        let state = self.state.lock().await;
        state
            .records
            .values()
            .filter(|r| r.is_good(self.max_failrate))
            .cloned()
            .collect()
    }

    /// Draw a good proxy, biased towards low latency.
    ///
    /// Refreshes the pool first if no good proxy is left; the draw right
    /// after a refresh considers every fresh record.
    pub async fn sample(&self) -> Result<SampledProxy> {
        let r: f64 = rand::thread_rng().gen();
        self.sample_at(r).await
    }

    #[instrument(skip(self))]
    pub(crate) async fn sample_at(&self, r: f64) -> Result<SampledProxy> {
        let mut state = self.state.lock().await;
        let max_failrate = self.max_failrate;

        let any_good = state.records.values().any(|rec| rec.is_good(max_failrate));
        if !any_good {
            debug!("No good proxies left, refreshing");
            self.refresh_locked(&mut state).await?;
        }

        let generation = state.refreshes;
        let mut candidates: Vec<&mut ProxyRecord> = state
            .records
            .values_mut()
            .filter(|rec| !any_good || rec.is_good(max_failrate))
            .collect();

        let weights = sampling::inverse_latency_weights(candidates.iter().map(|rec| rec.latency));
        for (rec, weight) in candidates.iter_mut().zip(&weights) {
            rec.weight = *weight;
        }

        let index = sampling::inverse_cdf(&weights, r);
        let chosen = candidates
            .get_mut(index)
            .ok_or(PoolError::NoProxiesAvailable)?;
        chosen.sample_count += 1;

        Ok(SampledProxy {
            address: chosen.address.clone(),
            generation,
        })
    }

    /// Apply `update` to the sampled record if it is still current
    async fn update<F>(&self, proxy: &SampledProxy, update: F)
    where
        F: FnOnce(&mut ProxyRecord),
    {
        let mut state = self.state.lock().await;
        if state.refreshes != proxy.generation {
            debug!("Ignoring outcome for {} from an earlier generation", proxy.address);
            return;
        }
        if let Some(record) = state.records.get_mut(&proxy.address) {
            update(record);
        }
    }

    /// Overwrite the proxy's latency with the latest observation (seconds)
    pub async fn record_latency(&self, proxy: &SampledProxy, seconds: f64) {
        self.update(proxy, |rec| rec.record_latency(seconds)).await;
    }

    pub async fn record_success(&self, proxy: &SampledProxy) {
        self.update(proxy, ProxyRecord::record_success).await;
    }

    pub async fn record_failure(&self, proxy: &SampledProxy) {
        self.update(proxy, ProxyRecord::record_failure).await;
    }

    /// Permanently stop sampling this record
    pub async fn mark_excluded(&self, proxy: &SampledProxy) {
        self.update(proxy, ProxyRecord::mark_excluded).await;
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.records.is_empty()
    }

    pub async fn summary(&self) -> PoolSummary {
        let state = self.state.lock().await;
        PoolSummary {
            total: state.records.len(),
            good: state
                .records
                .values()
                .filter(|r| r.is_good(self.max_failrate))
                .count(),
            refreshes: state.refreshes,
        }
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock().await;
        let proxies: Vec<ProxySnapshot> = state
            .records
            .values()
            .map(|r| r.snapshot(self.max_failrate))
            .collect();
        PoolSnapshot {
            summary: PoolSummary {
                total: proxies.len(),
                good: proxies.iter().filter(|p| p.good).count(),
                refreshes: state.refreshes,
            },
            proxies,
        }
    }
}
