/// Logic Layer
///
/// Pure computation over cached snapshots:
/// - Route finding over the router/asset graph
/// - Single and multi hop quote simulation through an injected slippage curve
pub mod linear_curve;
pub mod route_finder;
pub mod simulator;

pub use linear_curve::LinearCurve;
pub use route_finder::{Hop, Route, RouteFinder, RouterEdge};
pub use simulator::{Quote, QuoteSimulator, SlippageCurve};
