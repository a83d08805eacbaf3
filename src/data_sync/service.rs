use crate::data_sync::{
    chain::{ChainReader, RpcChainReader},
    config::MirrorConfig,
    oracle::{OracleSampler, PriceOracle, RpcPriceOracle, SamplerStats, unix_now},
    pipeline::{EventIngestionPipeline, PipelineHandle, PipelineStats, ReconcileReport},
    registry::RouterRegistry,
    rpc::JsonRpcClient,
    store::PoolStateStore,
    websocket::{EventSource, LogSubscriber},
};
use crate::errors::{MirrorError, MirrorResult};
use crate::execution::SwapRequest;
use crate::logic::{Quote, QuoteSimulator, RouteFinder, SlippageCurve};
use crate::pool::{PoolSnapshot, Router};
use crate::utils::constants::DEFAULT_MAX_HOPS;
use alloy_primitives::{Address, U256};
use eyre::{Result, eyre};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Keeps a local copy of every router's pools in sync with the chain.
///
/// Start order: subscribe to logs, discover routers, initialize every pool, then start
/// the ingestion pipeline and the price sampler. Logs emitted while discovery runs wait
/// in the subscription channel and are filtered by position once the pipeline starts.
pub struct MirrorService {
    config: MirrorConfig,
    chain: Arc<dyn ChainReader>,
    events: Arc<dyn EventSource>,
    registry: Arc<RouterRegistry>,
    store: Arc<PoolStateStore>,
    pipeline: Arc<EventIngestionPipeline>,
    sampler: Arc<OracleSampler>,
    simulator: Option<QuoteSimulator>,

    // Task handles
    subscription_task: Option<JoinHandle<()>>,
    pipeline_handle: Option<PipelineHandle>,
    sampler_task: Option<JoinHandle<()>>,

    // Shutdown coordination
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl MirrorService {
    pub fn new(
        config: MirrorConfig,
        chain: Arc<dyn ChainReader>,
        oracle: Arc<dyn PriceOracle>,
        events: Arc<dyn EventSource>,
        curve: Option<Arc<dyn SlippageCurve>>,
    ) -> Self {
        let registry = Arc::new(RouterRegistry::new());
        let store = Arc::new(PoolStateStore::new());

        let pipeline = Arc::new(EventIngestionPipeline::new(
            Arc::clone(&chain),
            Arc::clone(&registry),
            Arc::clone(&store),
            config.ingest_shards,
            config.channel_buffer_size,
        ));
        let sampler = Arc::new(OracleSampler::new(oracle, Arc::clone(&registry), Arc::clone(&store), config.price_interval(), config.price_timeout()));

        Self {
            config,
            chain,
            events,
            registry,
            store,
            pipeline,
            sampler,
            simulator: curve.map(QuoteSimulator::new),
            subscription_task: None,
            pipeline_handle: None,
            sampler_task: None,
            shutdown_tx: None,
        }
    }

    /// Start mirroring. Fails without starting anything if discovery fails.
    pub async fn start(&mut self) -> Result<Vec<Router>> {
        if self.shutdown_tx.is_some() {
            return Err(eyre!("MirrorService already started"));
        }
        info!("Starting MirrorService");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (items_tx, items_rx) = mpsc::channel(self.config.channel_buffer_size);

        let subscription_task = self.events.subscribe(items_tx, shutdown_rx.clone());

        let routers = match self.registry.discover(self.chain.as_ref()).await {
            Ok(routers) => routers,
            Err(e) => {
                let _ = shutdown_tx.send(true);
                if let Err(join_err) = subscription_task.await {
                    warn!("Subscription task error during shutdown: {}", join_err);
                }
                return Err(eyre!("Discovery failed: {}", e));
            }
        };

        self.initialize_pools().await;

        self.pipeline_handle = Some(Arc::clone(&self.pipeline).start(items_rx, shutdown_rx.clone()));
        self.sampler_task = Some(Arc::clone(&self.sampler).spawn(shutdown_rx));
        self.subscription_task = Some(subscription_task);
        self.shutdown_tx = Some(shutdown_tx);

        info!("MirrorService started successfully");
        Ok(routers)
    }

    /// Register and read every discovered pool. A pool that fails stays registered but
    /// uninitialized; the next reconciliation retries it.
    async fn initialize_pools(&self) -> usize {
        let start_time = Instant::now();
        let pools = self.registry.tracked_pools();
        for entry in &pools {
            self.store.register(entry.pool, entry.asset);
        }

        let results = join_all(pools.iter().map(|entry| self.store.initialize(self.chain.as_ref(), entry.pool))).await;

        let mut initialized = 0;
        for (entry, result) in pools.iter().zip(results) {
            match result {
                Ok(_) => initialized += 1,
                Err(e) => warn!("Failed to initialize pool {}: {}", entry.pool, e),
            }
        }

        info!("Initialized {}/{} pools in {:?}", initialized, pools.len(), start_time.elapsed());
        initialized
    }

    /// Stop every task. Already applied state stays readable.
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping MirrorService");

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        if let Some(subscription_task) = self.subscription_task.take() {
            if let Err(e) = subscription_task.await {
                warn!("Subscription task error during shutdown: {}", e);
            }
        }

        if let Some(pipeline_handle) = self.pipeline_handle.take() {
            pipeline_handle.join().await;
        }

        if let Some(sampler_task) = self.sampler_task.take() {
            if let Err(e) = sampler_task.await {
                warn!("Sampler task error during shutdown: {}", e);
            }
        }

        info!("MirrorService stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.pipeline_handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn registry(&self) -> Arc<RouterRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn store(&self) -> Arc<PoolStateStore> {
        Arc::clone(&self.store)
    }

    pub fn pipeline_stats(&self) -> Arc<PipelineStats> {
        self.pipeline.stats()
    }

    pub fn sampler_stats(&self) -> Arc<SamplerStats> {
        self.sampler.stats()
    }

    pub fn get_config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn snapshot(&self, pool: &Address) -> Option<PoolSnapshot> {
        self.store.snapshot(pool)
    }

    pub async fn reconcile_pool(&self, pool: Address) -> MirrorResult<u64> {
        self.pipeline.reconcile_pool(pool).await
    }

    pub async fn reconcile_all(&self) -> MirrorResult<ReconcileReport> {
        self.pipeline.reconcile_all().await
    }

    /// Route graph over the current topology.
    pub fn route_finder(&self) -> RouteFinder {
        RouteFinder::new(&self.registry.routers())
    }

    /// Find the shortest route from `asset_in` to `asset_out` and price it against the cache.
    /// `max_hops` defaults to [`DEFAULT_MAX_HOPS`].
    pub fn quote(&self, asset_in: Address, asset_out: Address, amount_in: U256, max_hops: Option<usize>) -> MirrorResult<Quote> {
        let simulator = self.simulator.as_ref().ok_or_else(|| MirrorError::Curve("no slippage curve configured".to_string()))?;
        let route = self.route_finder().find_route(asset_in, asset_out, max_hops.unwrap_or(DEFAULT_MAX_HOPS))?;
        simulator.quote(&self.store, &route, amount_in)
    }

    /// Swap inputs for `quote` using the configured slippage and deadline.
    pub fn swap_request(&self, quote: &Quote, recipient: Address) -> MirrorResult<SwapRequest> {
        SwapRequest::from_quote(quote, self.config.default_slippage_bps, recipient, unix_now(), self.config.deadline_secs)
    }
}

impl Drop for MirrorService {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("MirrorService dropped while running, tasks may be orphaned");
        }
    }
}

/// Builder for MirrorService. Collaborators that are not set are created from the config.
#[derive(Default)]
pub struct MirrorServiceBuilder {
    config: Option<MirrorConfig>,
    chain: Option<Arc<dyn ChainReader>>,
    oracle: Option<Arc<dyn PriceOracle>>,
    events: Option<Arc<dyn EventSource>>,
    curve: Option<Arc<dyn SlippageCurve>>,
}

impl MirrorServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: MirrorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_chain(mut self, chain: Arc<dyn ChainReader>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn PriceOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_event_source(mut self, events: Arc<dyn EventSource>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_curve(mut self, curve: Arc<dyn SlippageCurve>) -> Self {
        self.curve = Some(curve);
        self
    }

    pub fn build(self) -> Result<MirrorService> {
        let config = match self.config {
            Some(config) => config,
            None => MirrorConfig::from_env()?,
        };
        config.validate()?;

        let client = JsonRpcClient::new(config.rpc_http_url.clone(), config.http_timeout())?;

        let chain = match self.chain {
            Some(chain) => chain,
            None => Arc::new(RpcChainReader::new(client.clone(), config.portal_address()?)),
        };
        let oracle = match self.oracle {
            Some(oracle) => oracle,
            None => Arc::new(RpcPriceOracle::new(client, config.oracle_address()?)),
        };
        let events = match self.events {
            Some(events) => events,
            None => Arc::new(LogSubscriber::new(
                config.rpc_wss_url.clone(),
                config.ws_connection_timeout(),
                config.max_reconnect_attempts,
                config.reconnect_delay(),
            )),
        };

        Ok(MirrorService::new(config, chain, oracle, events, self.curve))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_sync::mock::{MockChain, MockEventSource, MockOracle};
    use crate::data_sync::websocket::StreamItem;
    use crate::pool::RouterPool;

    // the feed sender keeps the mock subscription open
    fn mock_builder(chain: MockChain) -> (MirrorServiceBuilder, mpsc::Sender<StreamItem>) {
        let (events, feed) = MockEventSource::new(8);
        let builder = MirrorServiceBuilder::new()
            .with_config(MirrorConfig::default())
            .with_chain(Arc::new(chain))
            .with_oracle(Arc::new(MockOracle::new()))
            .with_event_source(Arc::new(events));
        (builder, feed)
    }

    #[test]
    fn test_builder_creates_rpc_collaborators() {
        let service = MirrorServiceBuilder::new().with_config(MirrorConfig::default()).build();
        assert!(service.is_ok());

        let service = service.unwrap();
        assert!(!service.is_running());
        assert!(service.registry().routers().is_empty());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = MirrorConfig { ingest_shards: 0, ..Default::default() };
        assert!(MirrorServiceBuilder::new().with_config(config).build().is_err());
    }

    #[tokio::test]
    async fn test_discovery_failure_is_fatal() {
        let chain = MockChain::new();
        chain.add_router(Address::repeat_byte(0x0a), vec![RouterPool::new(Address::repeat_byte(0xaa), Address::repeat_byte(0x01))]);
        chain.fail_router_pools(Address::repeat_byte(0x0a));

        let (builder, _feed) = mock_builder(chain);
        let mut service = builder.build().unwrap();
        assert!(service.start().await.is_err());
        assert!(!service.is_running());
        assert!(!service.registry().is_discovered());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let chain = MockChain::with_default_pools(Address::repeat_byte(0x0a), vec![RouterPool::new(Address::repeat_byte(0xaa), Address::repeat_byte(0x01))]);
        let (builder, _feed) = mock_builder(chain);
        let mut service = builder.build().unwrap();

        let routers = service.start().await.unwrap();
        assert_eq!(routers.len(), 1);
        assert!(service.is_running());
        assert!(service.start().await.is_err());
        assert!(service.snapshot(&Address::repeat_byte(0x01)).unwrap().is_initialized());

        service.stop().await.unwrap();
        assert!(!service.is_running());
        assert!(service.snapshot(&Address::repeat_byte(0x01)).unwrap().is_initialized());
    }

    #[tokio::test]
    async fn test_quote_without_curve() {
        let chain = MockChain::with_default_pools(Address::repeat_byte(0x0a), vec![]);
        let (builder, _feed) = mock_builder(chain);
        let service = builder.build().unwrap();
        let result = service.quote(Address::repeat_byte(0xaa), Address::repeat_byte(0xbb), U256::from(1), Some(2));
        assert!(matches!(result, Err(MirrorError::Curve(_))));
    }
}
