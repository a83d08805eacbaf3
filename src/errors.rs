use alloy_primitives::Address;
use eyre::Report;
use strum_macros::Display;

/// The part of a pool's cached data that a quote needed but did not find.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum MissingData {
    Metadata,
    DynamicState,
    Price,
}

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("pool {pool} not ready: {missing} missing")]
    NotReady { pool: Address, missing: MissingData },
    #[error("unknown pool {0}")]
    UnknownPool(Address),
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("registry not discovered yet")]
    DiscoveryIncomplete,
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("abi decode error: {0}")]
    AbiDecode(#[from] alloy_sol_types::Error),
    #[error("slippage curve error: {0}")]
    Curve(String),
    #[error("no route from {from} to {to}")]
    NoRoute { from: Address, to: Address },
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error(transparent)]
    Internal(#[from] Report),
}

impl MirrorError {
    /// Errors that only concern one pool and must not stop processing of other pools.
    pub fn is_pool_local(&self) -> bool {
        matches!(self, MirrorError::NotReady { .. } | MirrorError::UnknownPool(_) | MirrorError::AbiDecode(_) | MirrorError::Rpc(_))
    }
}

pub type MirrorResult<T> = Result<T, MirrorError>;
