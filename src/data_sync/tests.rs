/// Integration tests for the data synchronization layer
///
/// These tests run the whole service against in-memory collaborators: discovery,
/// initialization, event ingestion, price sampling and quoting.

#[cfg(test)]
mod integration_tests {
    use super::super::*;
    use crate::data_sync::events::{ChainEvent, EventPosition, PositionedEvent};
    use crate::data_sync::mock::{MockChain, MockEventSource, MockOracle};
    use crate::errors::{MirrorError, MissingData};
    use crate::logic::{LinearCurve, QuoteSimulator};
    use crate::pool::{Price, ReserveTriple, RouterPool};
    use alloy_primitives::{Address, U256};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio::time::{Duration, sleep, timeout};

    const ROUTER: Address = Address::repeat_byte(0x0a);
    const POOL_1: Address = Address::repeat_byte(0x01);
    const POOL_2: Address = Address::repeat_byte(0x02);
    const ASSET_1: Address = Address::repeat_byte(0xaa);
    const ASSET_2: Address = Address::repeat_byte(0xbb);

    struct TestMirror {
        service: MirrorService,
        chain: Arc<MockChain>,
        oracle: MockOracle,
        feed: mpsc::Sender<StreamItem>,
    }

    fn test_config() -> MirrorConfig {
        MirrorConfig { ingest_shards: 2, channel_buffer_size: 16, price_interval_ms: 20, price_timeout_ms: 200, ..Default::default() }
    }

    fn build_mirror() -> TestMirror {
        let chain = Arc::new(MockChain::with_default_pools(ROUTER, vec![RouterPool::new(ASSET_1, POOL_1), RouterPool::new(ASSET_2, POOL_2)]));
        chain.set_block_number(10);

        let oracle = MockOracle::new();
        oracle.set_price(ASSET_1, U256::from(100));
        oracle.set_price(ASSET_2, U256::from(200));

        let (events, feed) = MockEventSource::new(16);
        let service = MirrorServiceBuilder::new()
            .with_config(test_config())
            .with_chain(chain.clone())
            .with_oracle(Arc::new(oracle.clone()))
            .with_event_source(Arc::new(events))
            .with_curve(Arc::new(LinearCurve))
            .build()
            .unwrap();

        TestMirror { service, chain, oracle, feed }
    }

    fn event(block: u64, index: u64, event: ChainEvent) -> StreamItem {
        StreamItem::Event(PositionedEvent { position: EventPosition::new(block, index), event, removed: false })
    }

    fn triple(a: u64, b: u64, c: u64) -> ReserveTriple {
        ReserveTriple::new(U256::from(a), U256::from(b), U256::from(c))
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(3), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_reserve_update_then_unregister() {
        let mut mirror = build_mirror();
        let routers = mirror.service.start().await.unwrap();
        assert_eq!(routers[0].pool_addresses(), vec![POOL_1, POOL_2]);

        mirror.feed.send(event(11, 0, ChainEvent::ReserveUpdated { pool: POOL_1, reserves: triple(1000, 990, 500) })).await.unwrap();
        mirror.feed.send(event(12, 0, ChainEvent::AssetUnregistered { router: ROUTER, asset: ASSET_1, pool: POOL_1 })).await.unwrap();

        let registry = mirror.service.registry();
        wait_for(|| !registry.is_tracked(&POOL_1)).await;

        assert_eq!(mirror.service.store().dynamic_state(&POOL_1).unwrap().reserves, triple(1000, 990, 500));
        assert_eq!(registry.router(&ROUTER).unwrap().pool_addresses(), vec![POOL_2]);

        mirror.service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_full_flow_quote() {
        let mut mirror = build_mirror();
        mirror.service.start().await.unwrap();

        let store = mirror.service.store();
        wait_for(|| [POOL_1, POOL_2].iter().all(|pool| store.dynamic_state(pool).is_some_and(|s| s.price.is_known()))).await;

        let amount_in = U256::from(10).pow(U256::from(18));
        let quote = mirror.service.quote(ASSET_1, ASSET_2, amount_in, Some(3)).unwrap();
        assert_eq!(quote.route.token_path(), vec![ASSET_1, ASSET_2]);
        assert_eq!(quote.route.router_path(), vec![ROUTER]);

        let expected = QuoteSimulator::new(Arc::new(LinearCurve))
            .simulate(&store.snapshot(&POOL_1).unwrap(), &store.snapshot(&POOL_2).unwrap(), amount_in)
            .unwrap();
        assert_eq!(quote.amount_out, expected);
        // half the price, minus 200 ppm of fees
        assert_eq!(quote.amount_out, U256::from(499_900_000_000_000_000u64));

        let request = mirror.service.swap_request(&quote, Address::repeat_byte(0xee)).unwrap();
        assert_eq!(request.token_path, vec![ASSET_1, ASSET_2]);
        assert!(request.amount_out_min < quote.amount_out);

        mirror.service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_quote_before_first_price_is_not_ready() {
        let mut mirror = build_mirror();
        mirror.oracle.fail_asset(ASSET_2);
        mirror.service.start().await.unwrap();

        let sampler_stats = mirror.service.sampler_stats();
        wait_for(|| sampler_stats.passes() > 0).await;

        let result = mirror.service.quote(ASSET_1, ASSET_2, U256::from(1_000), None);
        assert!(matches!(result, Err(MirrorError::NotReady { missing: MissingData::Price, .. })));

        mirror.service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_events_during_discovery_are_kept() {
        let mut mirror = build_mirror();
        mirror.feed.send(event(11, 0, ChainEvent::ReserveUpdated { pool: POOL_2, reserves: triple(7, 7, 7) })).await.unwrap();
        // already reflected by the initial read at block 10
        mirror.feed.send(event(9, 0, ChainEvent::ReserveUpdated { pool: POOL_1, reserves: triple(1, 1, 1) })).await.unwrap();

        mirror.service.start().await.unwrap();

        let stats = mirror.service.pipeline_stats();
        wait_for(|| stats.applied() + stats.dropped() == 2).await;

        let store = mirror.service.store();
        assert_eq!(store.dynamic_state(&POOL_2).unwrap().reserves, triple(7, 7, 7));
        assert_eq!(store.dynamic_state(&POOL_1).unwrap().reserves, MockChain::default_reserves());

        mirror.service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_gap_reconciles_topology_and_state() {
        let mut mirror = build_mirror();
        mirror.service.start().await.unwrap();

        let pool_3 = Address::repeat_byte(0x03);
        mirror.chain.set_block_number(40);
        mirror.chain.set_reserves(POOL_1, triple(11, 11, 11));
        mirror.chain.remove_router_pool(ROUTER, POOL_2);
        mirror.chain.add_router_pool(ROUTER, RouterPool::new(Address::repeat_byte(0xcc), pool_3));

        mirror.feed.send(StreamItem::Gap { last_confirmed: Some(EventPosition::new(10, 0)) }).await.unwrap();

        let store = mirror.service.store();
        wait_for(|| store.snapshot(&pool_3).is_some_and(|s| s.is_initialized())).await;
        wait_for(|| store.dynamic_state(&POOL_1).is_some_and(|s| s.reserves == triple(11, 11, 11))).await;

        let registry = mirror.service.registry();
        assert_eq!(registry.router(&ROUTER).unwrap().pool_addresses(), vec![POOL_1, pool_3]);
        // untracked pools keep their last state for late readers
        assert!(store.snapshot(&POOL_2).unwrap().is_initialized());

        mirror.service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_oracle_failure_keeps_price_and_reserves() {
        let mut mirror = build_mirror();
        mirror.service.start().await.unwrap();

        let store = mirror.service.store();
        wait_for(|| store.dynamic_state(&POOL_2).is_some_and(|s| s.price == Price::Known(U256::from(200)))).await;

        mirror.oracle.fail_asset(ASSET_2);
        mirror.oracle.set_price(ASSET_1, U256::from(150));
        wait_for(|| store.dynamic_state(&POOL_1).is_some_and(|s| s.price == Price::Known(U256::from(150)))).await;

        let state = store.dynamic_state(&POOL_2).unwrap();
        assert_eq!(state.price, Price::Known(U256::from(200)));
        assert_eq!(state.reserves, MockChain::default_reserves());
        assert!(mirror.service.sampler_stats().price_failures() > 0);

        mirror.service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_pool_is_no_longer_sampled() {
        let mut mirror = build_mirror();
        mirror.service.start().await.unwrap();

        let store = mirror.service.store();
        wait_for(|| store.dynamic_state(&POOL_1).is_some_and(|s| s.price.is_known())).await;

        mirror.feed.send(event(11, 0, ChainEvent::AssetUnregistered { router: ROUTER, asset: ASSET_1, pool: POOL_1 })).await.unwrap();
        let registry = mirror.service.registry();
        wait_for(|| !registry.is_tracked(&POOL_1)).await;

        // let any pass that started before the unregister finish
        let stats = mirror.service.sampler_stats();
        let passes = stats.passes();
        wait_for(|| stats.passes() > passes).await;

        let passes = stats.passes();
        let before = store.dynamic_state(&POOL_1).unwrap().price;

        mirror.oracle.set_price(ASSET_1, U256::from(999));
        wait_for(|| stats.passes() >= passes + 2).await;
        assert_eq!(store.dynamic_state(&POOL_1).unwrap().price, before);

        mirror.service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_keeps_applied_state() {
        let mut mirror = build_mirror();
        mirror.service.start().await.unwrap();

        mirror.feed.send(event(11, 0, ChainEvent::ReserveUpdated { pool: POOL_1, reserves: triple(5, 4, 3) })).await.unwrap();
        let stats = mirror.service.pipeline_stats();
        wait_for(|| stats.applied() == 1).await;

        mirror.service.stop().await.unwrap();
        assert!(!mirror.service.is_running());
        assert_eq!(mirror.service.store().dynamic_state(&POOL_1).unwrap().reserves, triple(5, 4, 3));
        assert!(mirror.service.stop().await.is_ok());
    }
}
