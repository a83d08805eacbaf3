use crate::data_sync::store::PoolStateStore;
use crate::errors::{MirrorError, MirrorResult};
use crate::logic::route_finder::Route;
use crate::pool::{PoolSnapshot, ReadyPool};
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// The protocol's slippage curve, evaluated off-chain.
///
/// Implementations get two quote-ready pools and must not keep references to them.
pub trait SlippageCurve: Debug + Send + Sync {
    fn amount_out(&self, pool_in: &ReadyPool<'_>, pool_out: &ReadyPool<'_>, amount_in: U256) -> MirrorResult<U256>;
}

/// Estimated result of swapping along a route.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub route: Route,
    pub amount_in: U256,
    /// Output of every hop, in order. The last entry equals `amount_out`.
    pub hop_amounts: Vec<U256>,
    pub amount_out: U256,
}

/// Prices swaps against cached pool snapshots, without any network access.
#[derive(Clone, Debug)]
pub struct QuoteSimulator {
    curve: Arc<dyn SlippageCurve>,
}

impl QuoteSimulator {
    pub fn new(curve: Arc<dyn SlippageCurve>) -> Self {
        Self { curve }
    }

    /// Single hop from `pool_in`'s asset to `pool_out`'s asset.
    pub fn simulate(&self, pool_in: &PoolSnapshot, pool_out: &PoolSnapshot, amount_in: U256) -> MirrorResult<U256> {
        if pool_in.pool == pool_out.pool {
            return Err(MirrorError::InvalidPath(format!("pool {} swaps into itself", pool_in.pool)));
        }

        let ready_in = pool_in.ready()?;
        let ready_out = pool_out.ready()?;
        self.curve.amount_out(&ready_in, &ready_out, amount_in)
    }

    /// Hops through `pools` in order, feeding each hop's output into the next one.
    /// Returns the output of every hop.
    pub fn simulate_path(&self, pools: &[PoolSnapshot], amount_in: U256) -> MirrorResult<Vec<U256>> {
        if pools.len() < 2 {
            return Err(MirrorError::InvalidPath(format!("a path needs at least two pools, got {}", pools.len())));
        }

        let mut amounts = Vec::with_capacity(pools.len() - 1);
        let mut amount = amount_in;
        for hop in pools.windows(2) {
            amount = self.simulate(&hop[0], &hop[1], amount)?;
            amounts.push(amount);
        }
        Ok(amounts)
    }

    /// Quote a route against point-in-time copies of its pools taken from `store`.
    pub fn quote(&self, store: &PoolStateStore, route: &Route, amount_in: U256) -> MirrorResult<Quote> {
        let snapshot = |pool: Address| store.snapshot(&pool).ok_or(MirrorError::UnknownPool(pool));

        let mut hop_amounts = Vec::with_capacity(route.hops.len());
        let mut amount = amount_in;
        for hop in &route.hops {
            amount = self.simulate(&snapshot(hop.pool_in)?, &snapshot(hop.pool_out)?, amount)?;
            hop_amounts.push(amount);
        }

        if hop_amounts.is_empty() {
            return Err(MirrorError::InvalidPath("route has no hops".to_string()));
        }

        Ok(Quote { route: route.clone(), amount_in, hop_amounts, amount_out: amount })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MissingData;
    use crate::logic::linear_curve::LinearCurve;
    use crate::logic::route_finder::Hop;
    use crate::pool::{CurveParams, PoolDynamicState, PoolMetadata, Price, ReserveTriple, SwapFees};

    fn e18(value: u64) -> U256 {
        U256::from(value) * U256::from(10).pow(U256::from(18))
    }

    fn ready_snapshot(byte: u8, price: u64, lp_fee: u64) -> PoolSnapshot {
        let mut snapshot = PoolSnapshot::new(Address::repeat_byte(byte), Address::repeat_byte(byte.wrapping_add(0xa0)));
        snapshot.metadata = Some(PoolMetadata { decimals: 18, curve: CurveParams::default(), fees: SwapFees::new(U256::from(lp_fee), U256::ZERO, U256::ZERO) });
        let mut state = PoolDynamicState::new(ReserveTriple::new(e18(1_000_000), e18(1_000_000), e18(1_000_000)), Some(1));
        state.price = Price::Known(U256::from(price));
        snapshot.state = Some(state);
        snapshot
    }

    fn simulator() -> QuoteSimulator {
        QuoteSimulator::new(Arc::new(LinearCurve))
    }

    #[test]
    fn test_two_hops_compose_sequentially() {
        let simulator = simulator();
        let a = ready_snapshot(0x01, 100, 1_000);
        let b = ready_snapshot(0x02, 200, 2_000);
        let c = ready_snapshot(0x03, 50, 500);
        let amount_in = U256::from(100);

        let amounts = simulator.simulate_path(&[a.clone(), b.clone(), c.clone()], amount_in).unwrap();

        let first = simulator.simulate(&a, &b, amount_in).unwrap();
        let second = simulator.simulate(&b, &c, first).unwrap();
        assert_eq!(amounts, vec![first, second]);
    }

    #[test]
    fn test_missing_state_is_not_ready() {
        let simulator = simulator();
        let mut pool_in = ready_snapshot(0x01, 100, 0);
        pool_in.state = None;
        let pool_out = ready_snapshot(0x02, 100, 0);

        let result = simulator.simulate(&pool_in, &pool_out, e18(1));
        assert!(matches!(result, Err(MirrorError::NotReady { missing: MissingData::DynamicState, .. })));
    }

    #[test]
    fn test_unknown_price_is_not_ready() {
        let simulator = simulator();
        let pool_in = ready_snapshot(0x01, 100, 0);
        let mut pool_out = ready_snapshot(0x02, 100, 0);
        if let Some(state) = pool_out.state.as_mut() {
            state.price = Price::Unknown;
        }

        let result = simulator.simulate(&pool_in, &pool_out, e18(1));
        assert!(matches!(result, Err(MirrorError::NotReady { missing: MissingData::Price, .. })));
    }

    #[test]
    fn test_same_pool_is_rejected() {
        let pool = ready_snapshot(0x01, 100, 0);
        assert!(matches!(simulator().simulate(&pool, &pool, e18(1)), Err(MirrorError::InvalidPath(_))));
        assert!(matches!(simulator().simulate_path(&[pool], e18(1)), Err(MirrorError::InvalidPath(_))));
    }

    #[test]
    fn test_quote_reads_from_store() {
        let store = PoolStateStore::new();
        let a = ready_snapshot(0x01, 100, 0);
        let b = ready_snapshot(0x02, 100, 0);
        for snapshot in [&a, &b] {
            store.register(snapshot.pool, snapshot.asset);
        }

        let route = Route {
            hops: vec![Hop { router: Address::repeat_byte(0x0a), asset_in: a.asset, asset_out: b.asset, pool_in: a.pool, pool_out: b.pool }],
        };

        // registered but not initialized
        assert!(matches!(simulator().quote(&store, &route, e18(1)), Err(MirrorError::NotReady { missing: MissingData::Metadata, .. })));

        let unknown = Route { hops: vec![Hop { pool_out: Address::repeat_byte(0x09), ..route.hops[0] }] };
        assert!(matches!(simulator().quote(&store, &unknown, e18(1)), Err(MirrorError::UnknownPool(_))));
    }
}
