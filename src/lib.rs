// Three-Layer Architecture
pub mod data_sync; // Data Layer: discovery, event ingestion, price sampling, pool cache
pub mod execution; // Execution Layer: swap request building
pub mod logic; // Logic Layer: route finding, quote simulation

// Common types
pub mod asset;
pub mod errors;
pub mod pool;
pub mod utils;

// Re-export key components from each layer
pub use asset::Asset;
pub use data_sync::{
    ChainReader, EventIngestionPipeline, EventSource, MirrorConfig, MirrorService, MirrorServiceBuilder, OracleSampler, PoolStateStore,
    PriceOracle, RouterRegistry, StreamItem,
};
pub use errors::{MirrorError, MirrorResult, MissingData};
pub use execution::SwapRequest;
pub use logic::{Hop, LinearCurve, Quote, QuoteSimulator, Route, RouteFinder, SlippageCurve};
pub use pool::{CurveParams, PoolDynamicState, PoolMetadata, PoolSnapshot, Price, ReadyPool, ReserveTriple, Router, RouterPool, SwapFees};
