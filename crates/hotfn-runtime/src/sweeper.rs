//! Idle sweeper — periodically reclaims expired warm containers.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::pool::ContainerPoolCache;

/// Call [`ContainerPoolCache::evict_expired`] every `interval` until shutdown.
///
/// Runs regardless of the current mode; each sweep is a no-op while rest
/// mode is off, so toggling the mode at runtime needs no restart.
pub async fn run_sweeper(
    pool: ContainerPoolCache,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_ms = interval.as_millis() as u64, "idle sweeper started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let evicted = pool.evict_expired().await;
                if evicted > 0 {
                    debug!(evicted, "idle sweep");
                }
            }
            _ = shutdown.changed() => {
                info!("idle sweeper shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hotfn_core::{CachingOptions, CachingOptionsUpdate, FunctionSpec};

    use super::*;
    use crate::pool::PoolConfig;
    use crate::simulated::SimulatedDriver;

    fn pool(driver: &Arc<SimulatedDriver>) -> ContainerPoolCache {
        ContainerPoolCache::new(
            driver.clone(),
            PoolConfig {
                options: CachingOptions {
                    using_rest_mode: true,
                    rest_container_life_time: 5,
                    ..CachingOptions::default()
                },
                functions: vec![FunctionSpec::named("f")],
                ..PoolConfig::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_after_lifetime() {
        let driver = Arc::new(SimulatedDriver::new());
        let pool = pool(&driver);
        let lease = pool.acquire("f").await.unwrap();
        pool.release(lease, true).await;

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_sweeper(pool.clone(), Duration::from_secs(1), rx));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(pool.resident("f"), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(pool.resident("f"), 0);
        assert_eq!(driver.live_containers(), 0);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_keeps_containers_after_rest_mode_is_disabled() {
        let driver = Arc::new(SimulatedDriver::new());
        let pool = pool(&driver);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_sweeper(pool.clone(), Duration::from_secs(1), rx));

        pool.configure(&CachingOptionsUpdate {
            using_rest_mode: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();
        let lease = pool.acquire("f").await.unwrap();
        pool.release(lease, true).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(pool.resident("f"), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
