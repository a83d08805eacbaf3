//! In-memory collaborators for tests, benches and demos.

use crate::data_sync::chain::ChainReader;
use crate::data_sync::oracle::PriceOracle;
use crate::data_sync::websocket::{EventSource, StreamItem};
use crate::errors::{MirrorError, MirrorResult};
use crate::pool::{CurveParams, ReserveTriple, RouterPool, SwapFees};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Copy)]
struct MockPool {
    fees: SwapFees,
    curve: CurveParams,
    reserves: ReserveTriple,
}

#[derive(Default)]
struct MockChainState {
    block_number: u64,
    routers: Vec<(Address, Vec<RouterPool>)>,
    pools: HashMap<Address, MockPool>,
    decimals: HashMap<Address, u8>,
    failing_routers: HashSet<Address>,
    failing_pools: HashSet<Address>,
    // applied after the reserves are read
    reserve_delay: Duration,
}

/// [`ChainReader`] answering from in-memory tables.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockChainState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// One router whose pools all carry default state: 18 decimals, fees of 100/50/50
    /// parts per million, reserves of 1e24.
    pub fn with_default_pools(router: Address, pools: Vec<RouterPool>) -> Self {
        let chain = Self::new();
        for entry in &pools {
            chain.add_default_pool(entry.pool, entry.asset);
        }
        chain.add_router(router, pools);
        chain
    }

    pub fn default_reserves() -> ReserveTriple {
        let amount = U256::from(10).pow(U256::from(24));
        ReserveTriple::new(amount, amount, amount)
    }

    pub fn add_router(&self, router: Address, pools: Vec<RouterPool>) {
        let mut state = lock(&self.state);
        match state.routers.iter_mut().find(|(address, _)| *address == router) {
            Some((_, existing)) => *existing = pools,
            None => state.routers.push((router, pools)),
        }
    }

    /// Append a pool to a router's on-chain listing, giving it default state if it has none.
    pub fn add_router_pool(&self, router: Address, entry: RouterPool) {
        if !lock(&self.state).pools.contains_key(&entry.pool) {
            self.add_default_pool(entry.pool, entry.asset);
        }
        let mut state = lock(&self.state);
        match state.routers.iter_mut().find(|(address, _)| *address == router) {
            Some((_, pools)) => pools.push(entry),
            None => state.routers.push((router, vec![entry])),
        }
    }

    pub fn remove_router_pool(&self, router: Address, pool: Address) {
        let mut state = lock(&self.state);
        if let Some((_, pools)) = state.routers.iter_mut().find(|(address, _)| *address == router) {
            pools.retain(|p| p.pool != pool);
        }
    }

    /// Readable pool state without any router listing.
    pub fn add_default_pool(&self, pool: Address, asset: Address) {
        self.set_decimals(asset, 18);
        self.set_pool_state(pool, SwapFees::new(U256::from(100), U256::from(50), U256::from(50)), CurveParams::default(), Self::default_reserves());
    }

    pub fn set_decimals(&self, token: Address, decimals: u8) {
        lock(&self.state).decimals.insert(token, decimals);
    }

    pub fn set_pool_state(&self, pool: Address, fees: SwapFees, curve: CurveParams, reserves: ReserveTriple) {
        lock(&self.state).pools.insert(pool, MockPool { fees, curve, reserves });
    }

    pub fn set_reserves(&self, pool: Address, reserves: ReserveTriple) {
        if let Some(entry) = lock(&self.state).pools.get_mut(&pool) {
            entry.reserves = reserves;
        }
    }

    pub fn set_swap_fees(&self, pool: Address, fees: SwapFees) {
        if let Some(entry) = lock(&self.state).pools.get_mut(&pool) {
            entry.fees = fees;
        }
    }

    pub fn set_block_number(&self, block_number: u64) {
        lock(&self.state).block_number = block_number;
    }

    pub fn fail_router_pools(&self, router: Address) {
        lock(&self.state).failing_routers.insert(router);
    }

    /// Make every direct read of `pool` fail.
    pub fn fail_pool_reads(&self, pool: Address) {
        lock(&self.state).failing_pools.insert(pool);
    }

    pub fn restore_pool_reads(&self, pool: Address) {
        lock(&self.state).failing_pools.remove(&pool);
    }

    /// Hold every reserve read for `delay` after the value was taken.
    pub fn set_reserve_delay(&self, delay: Duration) {
        lock(&self.state).reserve_delay = delay;
    }

    fn pool(&self, pool: Address) -> MirrorResult<MockPool> {
        let state = lock(&self.state);
        if state.failing_pools.contains(&pool) {
            return Err(MirrorError::Rpc(format!("execution reverted: pool {}", pool)));
        }
        state.pools.get(&pool).copied().ok_or_else(|| MirrorError::Rpc(format!("no contract at {}", pool)))
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn block_number(&self) -> MirrorResult<u64> {
        Ok(lock(&self.state).block_number)
    }

    async fn routers(&self) -> MirrorResult<Vec<Address>> {
        Ok(lock(&self.state).routers.iter().map(|(router, _)| *router).collect())
    }

    async fn router_pools(&self, router: Address) -> MirrorResult<Vec<RouterPool>> {
        let state = lock(&self.state);
        if state.failing_routers.contains(&router) {
            return Err(MirrorError::Rpc(format!("execution reverted: router {}", router)));
        }
        Ok(state.routers.iter().find(|(address, _)| *address == router).map(|(_, pools)| pools.clone()).unwrap_or_default())
    }

    async fn swap_fees(&self, pool: Address) -> MirrorResult<SwapFees> {
        Ok(self.pool(pool)?.fees)
    }

    async fn curve_params(&self, pool: Address) -> MirrorResult<CurveParams> {
        Ok(self.pool(pool)?.curve)
    }

    async fn reserves(&self, pool: Address) -> MirrorResult<ReserveTriple> {
        let reserves = self.pool(pool)?.reserves;
        let delay = lock(&self.state).reserve_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(reserves)
    }

    async fn decimals(&self, token: Address) -> MirrorResult<u8> {
        lock(&self.state).decimals.get(&token).copied().ok_or_else(|| MirrorError::Rpc(format!("no token at {}", token)))
    }
}

#[derive(Default)]
struct MockOracleState {
    prices: HashMap<Address, U256>,
    failing: HashSet<Address>,
    delay: Duration,
}

/// [`PriceOracle`] answering from an in-memory price table. Clones share the table.
#[derive(Clone, Default)]
pub struct MockOracle {
    state: Arc<Mutex<MockOracleState>>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, asset: Address, price: U256) {
        lock(&self.state).prices.insert(asset, price);
    }

    pub fn fail_asset(&self, asset: Address) {
        lock(&self.state).failing.insert(asset);
    }

    pub fn restore_asset(&self, asset: Address) {
        lock(&self.state).failing.remove(&asset);
    }

    /// Delay every answer, to simulate a slow oracle.
    pub fn set_delay(&self, delay: Duration) {
        lock(&self.state).delay = delay;
    }
}

#[async_trait]
impl PriceOracle for MockOracle {
    async fn get_asset_price(&self, asset: Address) -> MirrorResult<U256> {
        let delay = lock(&self.state).delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let state = lock(&self.state);
        if state.failing.contains(&asset) {
            return Err(MirrorError::Rpc(format!("oracle reverted for {}", asset)));
        }
        state.prices.get(&asset).copied().ok_or_else(|| MirrorError::Rpc(format!("no price for {}", asset)))
    }
}

/// [`EventSource`] fed by hand through the sender returned from [`MockEventSource::new`].
pub struct MockEventSource {
    feed: Mutex<Option<mpsc::Receiver<StreamItem>>>,
}

impl MockEventSource {
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<StreamItem>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { feed: Mutex::new(Some(rx)) }, tx)
    }
}

impl EventSource for MockEventSource {
    /// Forward fed items until the feed closes or shutdown. Only the first subscription
    /// receives anything.
    fn subscribe(&self, items: mpsc::Sender<StreamItem>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let feed = lock(&self.feed).take();

        tokio::spawn(async move {
            let Some(mut feed) = feed else {
                return;
            };
            loop {
                tokio::select! {
                    item = feed.recv() => {
                        let Some(item) = item else { break };
                        if items.send(item).await.is_err() {
                            break;
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
