use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::common::u256_to_f64;
use crate::math::curve::{CurveError, CurveParams, CurveState};

/// A tradable asset. `gas_price` is the cost of one unit of gas denominated in this asset.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub address: Address,
    pub gas_price: f64,
}

impl Asset {
    pub fn new(address: Address, gas_price: f64) -> Self {
        Self { address, gas_price }
    }
}

/// A two-asset pool and its pricing state.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "PoolRecord", into = "PoolRecord")]
pub struct Pool {
    pub address: Address,
    pub asset0: Asset,
    pub asset1: Asset,
    pub curve: CurveState,
}

/// Flat, serializable form of a [`Pool`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolRecord {
    pub address: Address,
    pub asset0: Asset,
    pub asset1: Asset,
    pub curve: CurveParams,
    pub reserve0: f64,
    pub reserve1: f64,
    pub fee: f64,
}

impl TryFrom<PoolRecord> for Pool {
    type Error = CurveError;

    fn try_from(record: PoolRecord) -> Result<Self, Self::Error> {
        Ok(Pool {
            address: record.address,
            asset0: record.asset0,
            asset1: record.asset1,
            curve: CurveState::new(record.curve, record.reserve0, record.reserve1, record.fee)?,
        })
    }
}

impl From<Pool> for PoolRecord {
    fn from(pool: Pool) -> Self {
        PoolRecord {
            address: pool.address,
            asset0: pool.asset0,
            asset1: pool.asset1,
            curve: pool.curve.params(),
            reserve0: pool.curve.reserve0(),
            reserve1: pool.curve.reserve1(),
            fee: pool.curve.fee(),
        }
    }
}

impl Pool {
    pub fn new(address: Address, asset0: Asset, asset1: Asset, curve: CurveState) -> Self {
        Self {
            address,
            asset0,
            asset1,
            curve,
        }
    }

    /// Builds a pool from raw on-chain reserves scaled by each asset's decimals.
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw_reserves(
        address: Address,
        asset0: Asset,
        asset1: Asset,
        params: CurveParams,
        raw_reserve0: U256,
        raw_reserve1: U256,
        decimals: (u8, u8),
        fee: f64,
    ) -> Result<Self, CurveError> {
        let curve = CurveState::new(
            params,
            u256_to_f64(raw_reserve0, decimals.0),
            u256_to_f64(raw_reserve1, decimals.1),
            fee,
        )?;
        Ok(Self::new(address, asset0, asset1, curve))
    }

    /// `Some(true)` if `token_in -> token_out` swaps asset0 for asset1, `Some(false)` for the
    /// reverse, `None` if the pool does not connect the pair.
    pub fn swap_direction(&self, token_in: &Address, token_out: &Address) -> Option<bool> {
        if &self.asset0.address == token_in && &self.asset1.address == token_out {
            Some(true)
        } else if &self.asset1.address == token_in && &self.asset0.address == token_out {
            Some(false)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExactInSwapRequest {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: f64,
    /// Increments for graph routing; the configured default when absent.
    #[serde(default)]
    pub steps: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwapAllocation {
    pub pool: Address,
    pub amount_in: f64,
    pub amount_out: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExactInSwapResult {
    pub total_out: f64,
    pub gas: f64,
    pub net_out: f64,
    pub allocations: Vec<SwapAllocation>,
}

/// One instruction of a graph route: send `quantity` of what `asset` holds at this point
/// (or `relative_portion` of everything the asset receives) through `pool`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteLeg {
    pub pool: Address,
    pub asset: Address,
    /// Share of the amount still unsent from `asset` when this leg executes; 1 for the last leg.
    pub quantity: f64,
    /// Share of the total amount leaving `asset`.
    pub relative_portion: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub amount_in: f64,
    pub amount_out: f64,
    pub gas_spent: f64,
    /// Output net of gas, in units of the output asset.
    pub total_amount_out: f64,
    pub legs: Vec<RouteLeg>,
}

/// Accumulated result of the increments routed before a failure.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteProgress {
    pub completed_steps: usize,
    pub amount_out: f64,
    pub gas_spent: f64,
    pub total_amount_out: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum RouteError {
    /// No pool connects the requested pair.
    #[error("no pool connects the requested assets")]
    NoViablePool,
    /// A router combinator was built without children.
    #[error("a router needs at least one child")]
    EmptyRouter,
    #[error("amount_in must be finite and non-negative, got {0}")]
    InvalidAmount(f64),
    #[error("steps must be positive")]
    ZeroSteps,
    #[error("asset {0} is not part of the routing graph")]
    UnknownAsset(Address),
    #[error("gas price of asset {0} must be finite and positive")]
    InvalidGasPrice(Address),
    /// The destination became unreachable; the increments routed so far are reported.
    #[error("no route from {from} to {to} after {} completed steps", progress.completed_steps)]
    NoRoute {
        from: Address,
        to: Address,
        progress: RouteProgress,
    },
}
