use crate::errors::{MirrorError, MirrorResult};
use crate::logic::simulator::SlippageCurve;
use crate::pool::ReadyPool;
use crate::utils::constants::FEE_DENOMINATOR;
use alloy_primitives::U256;

/// Slippage-free stand-in for the protocol curve.
///
/// Converts at the oracle price ratio, adjusts for decimals and takes the output pool's
/// total fee (in parts per [`FEE_DENOMINATOR`]). Fails when the output pool's reserve
/// cannot cover the result. Useful for tests, benches and demos only.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearCurve;

fn overflow() -> MirrorError {
    MirrorError::Curve("arithmetic overflow".to_string())
}

impl SlippageCurve for LinearCurve {
    fn amount_out(&self, pool_in: &ReadyPool<'_>, pool_out: &ReadyPool<'_>, amount_in: U256) -> MirrorResult<U256> {
        if pool_out.price.is_zero() {
            return Err(MirrorError::Curve(format!("zero price for pool {}", pool_out.pool)));
        }

        let numerator = amount_in.checked_mul(pool_in.price).and_then(|v| v.checked_mul(pool_out.asset.get_exp())).ok_or_else(overflow)?;
        let denominator = pool_out.price.checked_mul(pool_in.asset.get_exp()).ok_or_else(overflow)?;
        let gross = numerator / denominator;

        let fee_rate = pool_out.metadata.fees.total().min(U256::from(FEE_DENOMINATOR));
        let fee = gross.checked_mul(fee_rate).ok_or_else(overflow)? / U256::from(FEE_DENOMINATOR);
        let amount_out = gross - fee;

        if amount_out > pool_out.state.reserves.reserve {
            return Err(MirrorError::Curve(format!("pool {} cannot cover {} out", pool_out.pool, amount_out)));
        }
        Ok(amount_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{CurveParams, PoolDynamicState, PoolMetadata, PoolSnapshot, Price, ReserveTriple, SwapFees};
    use alloy_primitives::Address;

    fn snapshot(byte: u8, decimals: u8, price: u64, fee: u64, reserve: u64) -> PoolSnapshot {
        let mut snapshot = PoolSnapshot::new(Address::repeat_byte(byte), Address::repeat_byte(byte + 0x10));
        snapshot.metadata = Some(PoolMetadata { decimals, curve: CurveParams::default(), fees: SwapFees::new(U256::from(fee), U256::ZERO, U256::ZERO) });
        let mut state = PoolDynamicState::new(ReserveTriple::new(U256::from(reserve), U256::from(reserve), U256::from(reserve)), Some(1));
        state.price = Price::Known(U256::from(price));
        snapshot.state = Some(state);
        snapshot
    }

    #[test]
    fn test_converts_decimals_and_price() {
        // 1.0 of a 6-decimal asset worth 2 into an 18-decimal asset worth 1
        let pool_in = snapshot(0x01, 6, 200, 0, 0);
        let pool_out = snapshot(0x02, 18, 100, 0, u64::MAX);
        let out = LinearCurve.amount_out(&pool_in.ready().unwrap(), &pool_out.ready().unwrap(), U256::from(1_000_000)).unwrap();
        assert_eq!(out, U256::from(2_000_000_000_000_000_000u64));
    }

    #[test]
    fn test_takes_output_fee() {
        let pool_in = snapshot(0x01, 18, 100, 0, 0);
        let pool_out = snapshot(0x02, 18, 100, 3_000, 1_000_000);
        let out = LinearCurve.amount_out(&pool_in.ready().unwrap(), &pool_out.ready().unwrap(), U256::from(10_000)).unwrap();
        assert_eq!(out, U256::from(9_970));
    }

    #[test]
    fn test_reserve_limit() {
        let pool_in = snapshot(0x01, 18, 100, 0, 0);
        let pool_out = snapshot(0x02, 18, 100, 0, 500);
        let result = LinearCurve.amount_out(&pool_in.ready().unwrap(), &pool_out.ready().unwrap(), U256::from(501));
        assert!(matches!(result, Err(MirrorError::Curve(_))));
    }
}
