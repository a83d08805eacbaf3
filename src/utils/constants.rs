/// Denominator for slippage tolerances given in basis points.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Denominator of the fee rates used by [`crate::logic::LinearCurve`].
pub const FEE_DENOMINATOR: u64 = 1_000_000;

pub const DEFAULT_SLIPPAGE_BPS: u64 = 50;

pub const DEFAULT_DEADLINE_SECS: u64 = 300;

/// Upper bound for route search.
pub const DEFAULT_MAX_HOPS: usize = 4;
