/// Execution Layer
///
/// Turns a simulated quote into the inputs of `swapExactTokensForTokens`: amount in,
/// slippage-adjusted minimum out, token and router paths, deadline. Signing and
/// broadcasting stay with the caller.
pub mod swap_request;

pub use swap_request::{ISwapRouter, SwapRequest, min_amount_out};
