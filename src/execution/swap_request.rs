use crate::errors::{MirrorError, MirrorResult};
use crate::logic::simulator::Quote;
use crate::utils::constants::BPS_DENOMINATOR;
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{SolCall, sol};
use serde::{Deserialize, Serialize};

sol! {
    interface ISwapRouter {
        function swapExactTokensForTokens(
            uint256 amountIn,
            uint256 amountOutMin,
            address[] tokenPath,
            address[] routerPath,
            address to,
            uint256 deadline
        ) external returns (uint256 amountOut);
    }
}

/// `amount_out` reduced by `slippage_bps`, rounded down.
pub fn min_amount_out(amount_out: U256, slippage_bps: u64) -> MirrorResult<U256> {
    if slippage_bps > BPS_DENOMINATOR {
        return Err(MirrorError::InvalidPath(format!("slippage of {} bps exceeds {}", slippage_bps, BPS_DENOMINATOR)));
    }
    let kept = U256::from(BPS_DENOMINATOR - slippage_bps);
    let scaled = amount_out.checked_mul(kept).ok_or_else(|| MirrorError::Curve("amount out overflows".to_string()))?;
    Ok(scaled / U256::from(BPS_DENOMINATOR))
}

/// Inputs of `swapExactTokensForTokens` for a simulated quote. Not signed or sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub amount_in: U256,
    pub amount_out_min: U256,
    pub token_path: Vec<Address>,
    pub router_path: Vec<Address>,
    pub recipient: Address,
    pub deadline: U256,
}

impl SwapRequest {
    /// `now` and `deadline_secs` are unix seconds.
    pub fn from_quote(quote: &Quote, slippage_bps: u64, recipient: Address, now: u64, deadline_secs: u64) -> MirrorResult<Self> {
        if quote.route.is_empty() {
            return Err(MirrorError::InvalidPath("quote has an empty route".to_string()));
        }

        let token_path = quote.route.token_path();
        let router_path = quote.route.router_path();
        debug_assert_eq!(token_path.len(), router_path.len() + 1);

        Ok(Self {
            amount_in: quote.amount_in,
            amount_out_min: min_amount_out(quote.amount_out, slippage_bps)?,
            token_path,
            router_path,
            recipient,
            deadline: U256::from(now.saturating_add(deadline_secs)),
        })
    }

    pub fn to_call(&self) -> ISwapRouter::swapExactTokensForTokensCall {
        ISwapRouter::swapExactTokensForTokensCall {
            amountIn: self.amount_in,
            amountOutMin: self.amount_out_min,
            tokenPath: self.token_path.clone(),
            routerPath: self.router_path.clone(),
            to: self.recipient,
            deadline: self.deadline,
        }
    }

    /// Calldata for the first router of the path.
    pub fn encode(&self) -> Bytes {
        self.to_call().abi_encode().into()
    }
}
