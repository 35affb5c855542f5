//! Trade routing across AMM pools.
//!
//! [`math`] prices swaps on constant product, weighted constant mean and stableswap curves.
//! [`solver`] splits a trade between parallel pools and routes it through a graph of pools,
//! charging gas in the output asset.

pub mod config;
pub mod math;
pub mod solver;

pub use config::{ConfigError, RoutingConfig};
pub use math::curve::{CurveError, CurveParams, CurveState};
pub use solver::algorithm::{Distribution, Split, best_distribution, find_best_split_exact_in, optimal_split};
pub use solver::common::{Asset, ExactInSwapRequest, ExactInSwapResult, Pool, Route, RouteError, RouteLeg};
pub use solver::graph::RoutingGraph;
pub use solver::router::{Router, RouterQuote};
