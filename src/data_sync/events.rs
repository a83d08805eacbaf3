use crate::data_sync::rpc::parse_hex_u64;
use crate::errors::MirrorResult;
use crate::pool::{ReserveTriple, SwapFees};
use alloy_primitives::{Address, B256, Bytes};
use alloy_sol_types::{sol, SolEvent};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use strum_macros::Display as StrumDisplay;

sol! {
    /// Emitted by a router.
    event AssetRegistered(address indexed sender, address indexed asset, address indexed pool);
    /// Emitted by a router.
    event AssetUnregistered(address indexed sender, address indexed asset, address indexed pool);
    /// Emitted by a pool with absolute values.
    event ReserveUpdated(uint256 newReserve, uint256 newReserveWithSlippage, uint256 newTotalLiabilities);
    /// Emitted by a pool.
    event SwapFeesSet(address indexed sender, uint256 lpFee, uint256 backstopFee, uint256 protocolFee);
}

/// Topic0 of every event the mirror subscribes to.
pub fn subscribed_topics() -> Vec<B256> {
    vec![AssetRegistered::SIGNATURE_HASH, AssetUnregistered::SIGNATURE_HASH, ReserveUpdated::SIGNATURE_HASH, SwapFeesSet::SIGNATURE_HASH]
}

/// Position of a log in the finalized chain. Orders logs totally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventPosition {
    pub block_number: u64,
    pub log_index: u64,
}

impl EventPosition {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self { block_number, log_index }
    }

    /// A position after every log of `block_number`.
    pub fn end_of_block(block_number: u64) -> Self {
        Self { block_number, log_index: u64::MAX }
    }
}

impl Display for EventPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

#[derive(Copy, Clone, Debug, StrumDisplay, PartialEq, Eq, Hash)]
#[strum(serialize_all = "PascalCase")]
pub enum EventKind {
    AssetRegistered,
    AssetUnregistered,
    ReserveUpdated,
    SwapFeesSet,
}

/// A decoded protocol event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainEvent {
    AssetRegistered { router: Address, asset: Address, pool: Address },
    AssetUnregistered { router: Address, asset: Address, pool: Address },
    ReserveUpdated { pool: Address, reserves: ReserveTriple },
    SwapFeesSet { pool: Address, fees: SwapFees },
}

impl ChainEvent {
    /// The pool whose ordered sub-stream this event belongs to.
    pub fn pool(&self) -> Address {
        match self {
            ChainEvent::AssetRegistered { pool, .. }
            | ChainEvent::AssetUnregistered { pool, .. }
            | ChainEvent::ReserveUpdated { pool, .. }
            | ChainEvent::SwapFeesSet { pool, .. } => *pool,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ChainEvent::AssetRegistered { .. } => EventKind::AssetRegistered,
            ChainEvent::AssetUnregistered { .. } => EventKind::AssetUnregistered,
            ChainEvent::ReserveUpdated { .. } => EventKind::ReserveUpdated,
            ChainEvent::SwapFeesSet { .. } => EventKind::SwapFeesSet,
        }
    }

    pub fn is_topology(&self) -> bool {
        matches!(self, ChainEvent::AssetRegistered { .. } | ChainEvent::AssetUnregistered { .. })
    }
}

/// A decoded event with its chain position. `removed` is set when the log was
/// retracted by a reorg.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionedEvent {
    pub position: EventPosition,
    pub event: ChainEvent,
    pub removed: bool,
}

/// Log object as delivered by `eth_subscribe("logs")` and `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    pub fn position(&self) -> MirrorResult<EventPosition> {
        Ok(EventPosition::new(parse_hex_u64(&self.block_number)?, parse_hex_u64(&self.log_index)?))
    }
}

/// Decode a raw log. Logs with an unrelated topic0 yield `Ok(None)`.
pub fn decode_log(log: &RawLog) -> MirrorResult<Option<PositionedEvent>> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };
    let topics = log.topics.iter().copied();

    let event = if *topic0 == AssetRegistered::SIGNATURE_HASH {
        let decoded = AssetRegistered::decode_raw_log(topics, &log.data)?;
        ChainEvent::AssetRegistered { router: log.address, asset: decoded.asset, pool: decoded.pool }
    } else if *topic0 == AssetUnregistered::SIGNATURE_HASH {
        let decoded = AssetUnregistered::decode_raw_log(topics, &log.data)?;
        ChainEvent::AssetUnregistered { router: log.address, asset: decoded.asset, pool: decoded.pool }
    } else if *topic0 == ReserveUpdated::SIGNATURE_HASH {
        let decoded = ReserveUpdated::decode_raw_log(topics, &log.data)?;
        ChainEvent::ReserveUpdated {
            pool: log.address,
            reserves: ReserveTriple::new(decoded.newReserve, decoded.newReserveWithSlippage, decoded.newTotalLiabilities),
        }
    } else if *topic0 == SwapFeesSet::SIGNATURE_HASH {
        let decoded = SwapFeesSet::decode_raw_log(topics, &log.data)?;
        ChainEvent::SwapFeesSet { pool: log.address, fees: SwapFees::new(decoded.lpFee, decoded.backstopFee, decoded.protocolFee) }
    } else {
        return Ok(None);
    };

    Ok(Some(PositionedEvent { position: log.position()?, event, removed: log.removed }))
}

/// Build the raw log a contract would emit for `event`. `sender` fills the
/// indexed sender topic of router and fee events.
pub fn encode_log(event: &ChainEvent, position: EventPosition, sender: Address) -> RawLog {
    let (address, topics, data): (Address, Vec<B256>, Vec<u8>) = match *event {
        ChainEvent::AssetRegistered { router, asset, pool } => (
            router,
            vec![AssetRegistered::SIGNATURE_HASH, sender.into_word(), asset.into_word(), pool.into_word()],
            Vec::new(),
        ),
        ChainEvent::AssetUnregistered { router, asset, pool } => (
            router,
            vec![AssetUnregistered::SIGNATURE_HASH, sender.into_word(), asset.into_word(), pool.into_word()],
            Vec::new(),
        ),
        ChainEvent::ReserveUpdated { pool, reserves } => (
            pool,
            vec![ReserveUpdated::SIGNATURE_HASH],
            ReserveUpdated {
                newReserve: reserves.reserve,
                newReserveWithSlippage: reserves.reserve_with_slippage,
                newTotalLiabilities: reserves.total_liabilities,
            }
            .encode_data(),
        ),
        ChainEvent::SwapFeesSet { pool, fees } => (
            pool,
            vec![SwapFeesSet::SIGNATURE_HASH, sender.into_word()],
            SwapFeesSet { sender, lpFee: fees.lp, backstopFee: fees.backstop, protocolFee: fees.protocol }.encode_data(),
        ),
    };

    RawLog {
        address,
        topics,
        data: data.into(),
        block_number: format!("0x{:x}", position.block_number),
        log_index: format!("0x{:x}", position.log_index),
        removed: false,
    }
}
