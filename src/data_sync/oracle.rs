use crate::data_sync::registry::RouterRegistry;
use crate::data_sync::rpc::JsonRpcClient;
use crate::data_sync::store::PoolStateStore;
use crate::errors::{MirrorError, MirrorResult};
use alloy_primitives::{Address, U256};
use alloy_sol_types::sol;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

sol! {
    interface IPriceOracle {
        function getAssetPrice(address asset) external view returns (uint256);
    }
}

/// Shared price source for every asset.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_asset_price(&self, asset: Address) -> MirrorResult<U256>;
}

/// [`PriceOracle`] over JSON-RPC `eth_call`.
#[derive(Debug, Clone)]
pub struct RpcPriceOracle {
    client: JsonRpcClient,
    oracle_address: Address,
}

impl RpcPriceOracle {
    pub fn new(client: JsonRpcClient, oracle_address: Address) -> Self {
        Self { client, oracle_address }
    }
}

#[async_trait]
impl PriceOracle for RpcPriceOracle {
    async fn get_asset_price(&self, asset: Address) -> MirrorResult<U256> {
        self.client.call(self.oracle_address, IPriceOracle::getAssetPriceCall { asset }).await
    }
}

#[derive(Debug, Default)]
pub struct SamplerStats {
    pub passes: AtomicU64,
    pub skipped_ticks: AtomicU64,
    pub price_failures: AtomicU64,
}

impl SamplerStats {
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::Relaxed)
    }

    pub fn price_failures(&self) -> u64 {
        self.price_failures.load(Ordering::Relaxed)
    }
}

/// Result of one sampling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleReport {
    pub updated_pools: usize,
    pub failed_assets: Vec<Address>,
}

/// Polls the oracle for every tracked pool's asset on a fixed cadence.
///
/// A pass runs as its own task. When a tick fires while the previous pass is still in
/// flight the tick is skipped, never queued. A failing asset keeps its previous price.
pub struct OracleSampler {
    oracle: Arc<dyn PriceOracle>,
    registry: Arc<RouterRegistry>,
    store: Arc<PoolStateStore>,
    interval: Duration,
    price_timeout: Duration,
    stats: Arc<SamplerStats>,
}

impl OracleSampler {
    pub fn new(
        oracle: Arc<dyn PriceOracle>,
        registry: Arc<RouterRegistry>,
        store: Arc<PoolStateStore>,
        interval: Duration,
        price_timeout: Duration,
    ) -> Self {
        Self { oracle, registry, store, interval, price_timeout, stats: Arc::new(SamplerStats::default()) }
    }

    pub fn stats(&self) -> Arc<SamplerStats> {
        Arc::clone(&self.stats)
    }

    /// Fetch one price per tracked asset and write it into every pool holding that asset.
    pub async fn sample_once(&self) -> SampleReport {
        let start_time = Instant::now();

        let mut pools_by_asset: BTreeMap<Address, Vec<Address>> = BTreeMap::new();
        for entry in self.registry.tracked_pools() {
            pools_by_asset.entry(entry.asset).or_default().push(entry.pool);
        }

        let fetches = pools_by_asset.keys().map(|asset| async move {
            let price = match timeout(self.price_timeout, self.oracle.get_asset_price(*asset)).await {
                Ok(result) => result,
                Err(_) => Err(MirrorError::Rpc(format!("price request timed out after {:?}", self.price_timeout))),
            };
            (*asset, price)
        });
        let prices = join_all(fetches).await;

        let updated_at = unix_now();
        let mut report = SampleReport::default();

        for (asset, price) in prices {
            match price {
                Ok(price) => {
                    for pool in pools_by_asset.get(&asset).into_iter().flatten() {
                        if self.store.set_price(*pool, price, updated_at) {
                            report.updated_pools += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!("Price for asset {} unavailable, keeping previous value: {}", asset, e);
                    self.stats.price_failures.fetch_add(1, Ordering::Relaxed);
                    report.failed_assets.push(asset);
                }
            }
        }

        self.stats.passes.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Price pass completed in {:?}: {} assets, {} pools updated, {} failures",
            start_time.elapsed(),
            pools_by_asset.len(),
            report.updated_pools,
            report.failed_assets.len()
        );

        report
    }

    /// Run passes every `interval` until `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Price sampler started, interval {:?}", self.interval);

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut in_flight: Option<JoinHandle<SampleReport>> = None;

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if in_flight.as_ref().is_some_and(|pass| !pass.is_finished()) {
                            debug!("Price pass still running, skipping tick");
                            self.stats.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        let sampler = Arc::clone(&self);
                        in_flight = Some(tokio::spawn(async move { sampler.sample_once().await }));
                    }
                }
            }

            // each price request is bounded by `price_timeout`, so the pass is too
            if let Some(mut pass) = in_flight {
                if timeout(self.price_timeout, &mut pass).await.is_err() {
                    warn!("Price pass still running after {:?}, aborting", self.price_timeout);
                    pass.abort();
                }
            }
            info!("Price sampler stopped after {} passes", self.stats.passes());
        })
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_sync::mock::{MockChain, MockOracle};
    use crate::pool::{Price, RouterPool};

    const ROUTER: Address = Address::repeat_byte(0x0a);

    async fn setup(oracle: MockOracle) -> (Arc<OracleSampler>, Arc<PoolStateStore>) {
        let chain = MockChain::with_default_pools(
            ROUTER,
            vec![
                RouterPool::new(Address::repeat_byte(0xaa), Address::repeat_byte(0x01)),
                RouterPool::new(Address::repeat_byte(0xbb), Address::repeat_byte(0x02)),
            ],
        );
        let registry = Arc::new(RouterRegistry::new());
        registry.discover(&chain).await.unwrap();

        let store = Arc::new(PoolStateStore::new());
        for entry in registry.tracked_pools() {
            store.register(entry.pool, entry.asset);
            store.initialize(&chain, entry.pool).await.unwrap();
        }

        let sampler = OracleSampler::new(Arc::new(oracle), registry, Arc::clone(&store), Duration::from_millis(20), Duration::from_millis(200));
        (Arc::new(sampler), store)
    }

    #[tokio::test]
    async fn test_sample_once_writes_prices() {
        let oracle = MockOracle::new();
        oracle.set_price(Address::repeat_byte(0xaa), U256::from(100));
        oracle.set_price(Address::repeat_byte(0xbb), U256::from(200));
        let (sampler, store) = setup(oracle).await;

        let report = sampler.sample_once().await;
        assert_eq!(report.updated_pools, 2);
        assert!(report.failed_assets.is_empty());
        assert_eq!(store.dynamic_state(&Address::repeat_byte(0x01)).unwrap().price, Price::Known(U256::from(100)));
        assert_eq!(store.dynamic_state(&Address::repeat_byte(0x02)).unwrap().price, Price::Known(U256::from(200)));
    }

    #[tokio::test]
    async fn test_failing_asset_keeps_previous_price() {
        let oracle = MockOracle::new();
        oracle.set_price(Address::repeat_byte(0xaa), U256::from(100));
        oracle.set_price(Address::repeat_byte(0xbb), U256::from(200));
        let (sampler, store) = setup(oracle.clone()).await;
        sampler.sample_once().await;

        oracle.fail_asset(Address::repeat_byte(0xbb));
        oracle.set_price(Address::repeat_byte(0xaa), U256::from(110));
        let report = sampler.sample_once().await;

        assert_eq!(report.failed_assets, vec![Address::repeat_byte(0xbb)]);
        assert_eq!(store.dynamic_state(&Address::repeat_byte(0x01)).unwrap().price, Price::Known(U256::from(110)));
        assert_eq!(store.dynamic_state(&Address::repeat_byte(0x02)).unwrap().price, Price::Known(U256::from(200)));
        assert_eq!(sampler.stats().price_failures(), 1);
    }

    #[tokio::test]
    async fn test_slow_pass_skips_ticks() {
        let oracle = MockOracle::new();
        oracle.set_price(Address::repeat_byte(0xaa), U256::from(100));
        oracle.set_price(Address::repeat_byte(0xbb), U256::from(200));
        oracle.set_delay(Duration::from_millis(90));
        let (sampler, _store) = setup(oracle).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::clone(&sampler).spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(250)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let stats = sampler.stats();
        assert!(stats.skipped_ticks() > 0);
        assert!(stats.passes() <= 3);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_pass() {
        let oracle = MockOracle::new();
        oracle.set_price(Address::repeat_byte(0xaa), U256::from(100));
        oracle.set_price(Address::repeat_byte(0xbb), U256::from(200));
        oracle.set_delay(Duration::from_millis(100));
        let (sampler, store) = setup(oracle).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::clone(&sampler).spawn(shutdown_rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        assert_eq!(sampler.stats().passes(), 1);
        assert_eq!(store.dynamic_state(&Address::repeat_byte(0x01)).unwrap().price, Price::Known(U256::from(100)));
        assert_eq!(store.dynamic_state(&Address::repeat_byte(0x02)).unwrap().price, Price::Known(U256::from(200)));
    }

    #[tokio::test]
    async fn test_sampler_stops_on_shutdown() {
        let oracle = MockOracle::new();
        oracle.set_price(Address::repeat_byte(0xaa), U256::from(100));
        let (sampler, _store) = setup(oracle).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::clone(&sampler).spawn(shutdown_rx);
        drop(shutdown_tx);

        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
