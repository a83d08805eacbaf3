use crate::asset::Asset;
use crate::errors::{MirrorError, MissingData};
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// The three fee rates charged on a swap, as raw on-chain values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapFees {
    pub lp: U256,
    pub backstop: U256,
    pub protocol: U256,
}

impl SwapFees {
    pub fn new(lp: U256, backstop: U256, protocol: U256) -> Self {
        Self { lp, backstop, protocol }
    }

    pub fn total(&self) -> U256 {
        self.lp.saturating_add(self.backstop).saturating_add(self.protocol)
    }
}

/// Slippage curve parameters. Opaque to this crate, only carried to the curve evaluator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveParams {
    pub beta: U256,
    pub c: U256,
}

/// Pool metadata read once at initialization and patched only by `SwapFeesSet`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetadata {
    pub decimals: u8,
    pub curve: CurveParams,
    pub fees: SwapFees,
}

/// Reserve, reserve-with-slippage and total liabilities as reported by a single
/// `ReserveUpdated` event (or a single direct read). Always absolute values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveTriple {
    pub reserve: U256,
    pub reserve_with_slippage: U256,
    pub total_liabilities: U256,
}

impl ReserveTriple {
    pub fn new(reserve: U256, reserve_with_slippage: U256, total_liabilities: U256) -> Self {
        Self { reserve, reserve_with_slippage, total_liabilities }
    }
}

/// Last known oracle price. `Unknown` until the sampler has written a value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Price {
    #[default]
    Unknown,
    Known(U256),
}

impl Price {
    pub fn value(&self) -> Option<U256> {
        match self {
            Price::Unknown => None,
            Price::Known(price) => Some(*price),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Price::Known(_))
    }
}

/// Dynamic pool state. Reserves and price are written by different producers and
/// age independently; `reserves_block` and `price_updated_at` tell how old each one is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDynamicState {
    pub reserves: ReserveTriple,
    pub reserves_block: Option<u64>,
    pub price: Price,
    pub price_updated_at: Option<u64>,
}

impl PoolDynamicState {
    pub fn new(reserves: ReserveTriple, reserves_block: Option<u64>) -> Self {
        Self { reserves, reserves_block, price: Price::Unknown, price_updated_at: None }
    }
}

/// A pool as listed by its router: the pool contract and the asset it holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouterPool {
    pub pool: Address,
    pub asset: Address,
}

impl RouterPool {
    pub fn new(asset: Address, pool: Address) -> Self {
        Self { pool, asset }
    }
}

/// A router and its pools, in discovery order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Router {
    pub address: Address,
    pub pools: Vec<RouterPool>,
}

impl Router {
    pub fn new(address: Address) -> Self {
        Self { address, pools: Vec::new() }
    }

    pub fn contains_pool(&self, pool: &Address) -> bool {
        self.pools.iter().any(|p| p.pool == *pool)
    }

    pub fn pool_for_asset(&self, asset: &Address) -> Option<Address> {
        self.pools.iter().find(|p| p.asset == *asset).map(|p| p.pool)
    }

    pub fn pool_addresses(&self) -> Vec<Address> {
        self.pools.iter().map(|p| p.pool).collect()
    }
}

/// Point-in-time copy of everything cached for one pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool: Address,
    pub asset: Address,
    pub metadata: Option<PoolMetadata>,
    pub state: Option<PoolDynamicState>,
}

impl PoolSnapshot {
    pub fn new(pool: Address, asset: Address) -> Self {
        Self { pool, asset, metadata: None, state: None }
    }

    pub fn is_initialized(&self) -> bool {
        self.metadata.is_some() && self.state.is_some()
    }

    /// Borrow the snapshot as a quote input. Fails with `NotReady` naming the first
    /// missing part, so callers never price against absent data.
    pub fn ready(&self) -> Result<ReadyPool<'_>, MirrorError> {
        let not_ready = |missing| MirrorError::NotReady { pool: self.pool, missing };

        let metadata = self.metadata.as_ref().ok_or_else(|| not_ready(MissingData::Metadata))?;
        let state = self.state.as_ref().ok_or_else(|| not_ready(MissingData::DynamicState))?;
        let price = state.price.value().ok_or_else(|| not_ready(MissingData::Price))?;

        Ok(ReadyPool { pool: self.pool, asset: Asset::new(self.asset, metadata.decimals), metadata, state, price })
    }
}

/// A pool that has metadata, reserves and a known price.
#[derive(Clone, Copy, Debug)]
pub struct ReadyPool<'a> {
    pub pool: Address,
    pub asset: Asset,
    pub metadata: &'a PoolMetadata,
    pub state: &'a PoolDynamicState,
    pub price: U256,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> PoolMetadata {
        PoolMetadata { decimals: 6, curve: CurveParams::default(), fees: SwapFees::new(U256::from(1), U256::from(2), U256::from(3)) }
    }

    #[test]
    fn test_ready_requires_every_part() {
        let mut snapshot = PoolSnapshot::new(Address::repeat_byte(0x01), Address::repeat_byte(0xaa));
        assert!(matches!(snapshot.ready(), Err(MirrorError::NotReady { missing: MissingData::Metadata, .. })));

        snapshot.metadata = Some(metadata());
        assert!(matches!(snapshot.ready(), Err(MirrorError::NotReady { missing: MissingData::DynamicState, .. })));

        snapshot.state = Some(PoolDynamicState::new(ReserveTriple::new(U256::from(10), U256::from(9), U256::from(8)), Some(1)));
        assert!(matches!(snapshot.ready(), Err(MirrorError::NotReady { missing: MissingData::Price, .. })));

        if let Some(state) = snapshot.state.as_mut() {
            state.price = Price::Known(U256::from(100));
        }
        let ready = snapshot.ready().unwrap();
        assert_eq!(ready.price, U256::from(100));
        assert_eq!(ready.asset.get_decimals(), 6);
    }

    #[test]
    fn test_total_fees() {
        assert_eq!(metadata().fees.total(), U256::from(6));
    }

    #[test]
    fn test_router_lookup() {
        let mut router = Router::new(Address::repeat_byte(0x0a));
        router.pools.push(RouterPool::new(Address::repeat_byte(0xaa), Address::repeat_byte(0x01)));
        assert!(router.contains_pool(&Address::repeat_byte(0x01)));
        assert_eq!(router.pool_for_asset(&Address::repeat_byte(0xaa)), Some(Address::repeat_byte(0x01)));
        assert_eq!(router.pool_for_asset(&Address::repeat_byte(0xbb)), None);
    }
}
