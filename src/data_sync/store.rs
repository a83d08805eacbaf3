use crate::data_sync::chain::ChainReader;
use crate::errors::{MirrorError, MirrorResult};
use crate::pool::{PoolDynamicState, PoolMetadata, PoolSnapshot, Price, ReserveTriple, SwapFees};
use alloy_primitives::{Address, U256};
use dashmap::DashMap;
use tracing::{debug, info};

/// Per-pool cache of metadata and dynamic state.
///
/// Each pool lives in its own map entry, so a reserve triple is always replaced under one
/// entry lock and a reader never sees a mix of two events. Reads hand out copies.
///
/// Writers are split by field: the event pipeline owns metadata and reserves, the oracle
/// sampler owns the price.
#[derive(Debug, Default)]
pub struct PoolStateStore {
    pools: DashMap<Address, PoolSnapshot>,
    // pool -> block at which metadata and reserves were last read directly from the chain
    synced_at: DashMap<Address, u64>,
}

impl PoolStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a pool without any data. No-op if the pool is already known.
    pub fn register(&self, pool: Address, asset: Address) {
        self.pools.entry(pool).or_insert_with(|| PoolSnapshot::new(pool, asset));
    }

    pub fn contains(&self, pool: &Address) -> bool {
        self.pools.contains_key(pool)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Read metadata and reserves directly from the chain and install them.
    /// The price is reset to [`Price::Unknown`]; only the sampler sets real prices.
    pub async fn initialize(&self, chain: &dyn ChainReader, pool: Address) -> MirrorResult<(PoolMetadata, PoolDynamicState)> {
        let (metadata, state, block) = self.fetch(chain, pool).await?;
        self.install(pool, metadata, state, block, false)?;
        info!("Initialized pool {} at block {}", pool, block);
        Ok((metadata, state))
    }

    /// Re-read metadata and reserves after a gap, keeping the last sampled price.
    pub async fn reconcile(&self, chain: &dyn ChainReader, pool: Address) -> MirrorResult<u64> {
        let (metadata, state, block) = self.fetch(chain, pool).await?;
        self.install(pool, metadata, state, block, true)?;
        debug!("Reconciled pool {} at block {}", pool, block);
        Ok(block)
    }

    async fn fetch(&self, chain: &dyn ChainReader, pool: Address) -> MirrorResult<(PoolMetadata, PoolDynamicState, u64)> {
        let asset = self.pools.get(&pool).map(|entry| entry.asset).ok_or(MirrorError::UnknownPool(pool))?;

        // every direct read happens at or after this block
        let block = chain.block_number().await?;

        let (fees, curve, decimals, reserves) =
            tokio::try_join!(chain.swap_fees(pool), chain.curve_params(pool), chain.decimals(asset), chain.reserves(pool))?;

        let metadata = PoolMetadata { decimals, curve, fees };
        let state = PoolDynamicState::new(reserves, Some(block));
        Ok((metadata, state, block))
    }

    fn install(&self, pool: Address, metadata: PoolMetadata, mut state: PoolDynamicState, block: u64, keep_price: bool) -> MirrorResult<()> {
        let mut entry = self.pools.get_mut(&pool).ok_or(MirrorError::UnknownPool(pool))?;

        if keep_price {
            if let Some(previous) = entry.state {
                state.price = previous.price;
                state.price_updated_at = previous.price_updated_at;
            }
        }

        entry.metadata = Some(metadata);
        entry.state = Some(state);
        drop(entry);

        self.synced_at.insert(pool, block);
        Ok(())
    }

    /// Block of the last direct read for `pool`. Events at or before it are already reflected.
    pub fn synced_block(&self, pool: &Address) -> Option<u64> {
        self.synced_at.get(pool).map(|block| *block)
    }

    /// Replace the reserve triple. Values are absolute; the price is left untouched.
    /// Returns `false` when the pool has no dynamic state yet and the update was dropped.
    pub fn apply_reserve_updated(&self, pool: Address, reserves: ReserveTriple, block: Option<u64>) -> bool {
        let Some(mut entry) = self.pools.get_mut(&pool) else {
            debug!("ReserveUpdated for unknown pool {} dropped", pool);
            return false;
        };
        let Some(state) = entry.state.as_mut() else {
            debug!("ReserveUpdated for uninitialized pool {} dropped", pool);
            return false;
        };

        state.reserves = reserves;
        state.reserves_block = block;
        true
    }

    /// Patch the fee rates. Returns `false` when the pool has no metadata; no partial
    /// metadata is ever built from a fee event.
    pub fn apply_swap_fees_set(&self, pool: Address, fees: SwapFees) -> bool {
        let Some(mut entry) = self.pools.get_mut(&pool) else {
            debug!("SwapFeesSet for unknown pool {} dropped", pool);
            return false;
        };
        let Some(metadata) = entry.metadata.as_mut() else {
            debug!("SwapFeesSet for uninitialized pool {} dropped", pool);
            return false;
        };

        metadata.fees = fees;
        true
    }

    /// Write a sampled price. Reserve fields are never touched.
    pub fn set_price(&self, pool: Address, price: U256, updated_at: u64) -> bool {
        let Some(mut entry) = self.pools.get_mut(&pool) else {
            return false;
        };
        let Some(state) = entry.state.as_mut() else {
            debug!("Price for uninitialized pool {} dropped", pool);
            return false;
        };

        state.price = Price::Known(price);
        state.price_updated_at = Some(updated_at);
        true
    }

    pub fn snapshot(&self, pool: &Address) -> Option<PoolSnapshot> {
        self.pools.get(pool).map(|entry| entry.clone())
    }

    pub fn metadata(&self, pool: &Address) -> Option<PoolMetadata> {
        self.pools.get(pool).and_then(|entry| entry.metadata)
    }

    pub fn dynamic_state(&self, pool: &Address) -> Option<PoolDynamicState> {
        self.pools.get(pool).and_then(|entry| entry.state)
    }

    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        self.pools.iter().map(|entry| entry.value().clone()).collect()
    }
}
