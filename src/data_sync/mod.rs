/// Data Synchronization Layer
///
/// Mirrors router topology and pool state from the chain:
///
/// - Router discovery and topology updates (`registry`)
/// - Per-pool metadata and reserve cache (`store`)
/// - Periodic oracle price sampling (`oracle`)
/// - WebSocket log subscription with reconnects (`websocket`)
/// - Per-pool ordered event ingestion and reconciliation (`pipeline`)
///
/// Chain reads and the price oracle sit behind traits so the whole layer runs against
/// the in-memory collaborators of `mock` as well.

// Chain access
pub mod chain;
pub mod events;
pub mod rpc;
pub mod websocket;

// Mirrored state
pub mod oracle;
pub mod pipeline;
pub mod registry;
pub mod store;

pub mod config;
pub mod mock;
pub mod service;

// Tests
#[cfg(test)]
mod tests;

// Re-export main components for easy usage
pub use chain::{ChainReader, RpcChainReader};
pub use config::MirrorConfig;
pub use events::{ChainEvent, EventKind, EventPosition, PositionedEvent, RawLog};
pub use oracle::{OracleSampler, PriceOracle, RpcPriceOracle, SampleReport, SamplerStats};
pub use pipeline::{EventIngestionPipeline, PipelineHandle, PipelineStats, ReconcileReport};
pub use registry::{RegistryChange, RouterRegistry, TopologyDiff};
pub use rpc::JsonRpcClient;
pub use service::{MirrorService, MirrorServiceBuilder};
pub use store::PoolStateStore;
pub use websocket::{EventSource, LogSubscriber, StreamItem};
