//! Proxypool runner - Entry Point
//!
//! Fetches the configured targets through the proxy pool from a set of
//! background workers, then prints the pool's state.

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxypool::config::{Config, LogConfig};
use proxypool::error::Result;
use proxypool::{ProviderRegistry, RequestOptions, WorkerPool};

const USER_AGENT: &str =
    "Mozilla/5.0 (compatible; U; ABrowse 0.6; Syllable) AppleWebKit/420+ (KHTML, like Gecko)";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    init_tracing(&config.log);
    info!("Starting proxypool runner");

    let providers = ProviderRegistry::from_config(&config.providers)?;
    info!("Using {} proxy providers", providers.len());

    let dispatcher = Arc::new(proxypool::build(providers, &config.pool)?);
    let workers = WorkerPool::new(config.runner.workers);

    let options = RequestOptions::new().header("User-Agent", USER_AGENT)?;

    for target in &config.runner.targets {
        for _ in 0..config.runner.requests_per_target {
            let dispatcher = dispatcher.clone();
            let target = target.clone();
            let options = options.clone();
            workers.put(
                async move { dispatcher.get(&target, options).await },
                |response| {
                    println!(
                        "{} via {}: {} {}",
                        response.status,
                        response.proxy,
                        response.elapsed.as_millis(),
                        response.text().trim()
                    );
                },
            );
        }
    }

    info!(
        "Queued {} requests on {} workers",
        workers.pending(),
        workers.num_workers()
    );

    tokio::select! {
        _ = workers.wait() => {
            info!("All requests finished");
        }
        _ = shutdown_signal() => {
            warn!("Shutdown signal received, abandoning queued requests");
        }
    }
    workers.shutdown().await;

    let pool = dispatcher.pool();
    println!("{}", pool.summary().await);
    match serde_json::to_string_pretty(&pool.snapshot().await) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize pool snapshot: {}", e),
    }

    info!("Proxypool runner stopped");
    Ok(())
}

/// Initialize tracing from `RUST_LOG`, falling back to the configured level
fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxypool={}", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
