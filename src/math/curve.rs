use std::cell::OnceCell;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::common::{revert_positive, solve_quadratic};

/// Maximum Newton iterations when solving the stableswap invariant.
pub const STABLE_INVARIANT_MAX_ITERATIONS: usize = 256;

/// Pricing curve of a pool and its curve-specific parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CurveParams {
    /// `x * y = k`.
    ConstantProduct,
    /// `x^w0 * y^w1 = k`, integer weights summing to 100.
    WeightedConstantMean { weight0: u32, weight1: u32 },
    /// Curve-style two-asset stableswap with amplification coefficient `A`.
    StableSwap { amplification: f64 },
}

#[derive(Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum CurveError {
    #[error("weights must sum to 100, got {weight0} + {weight1}")]
    InvalidWeights { weight0: u32, weight1: u32 },
    #[error("fee must lie in [0, 1), got {0}")]
    InvalidFee(f64),
    #[error("amplification must be finite and positive, got {0}")]
    InvalidAmplification(f64),
    #[error("reserves must be finite and non-negative, got ({reserve0}, {reserve1})")]
    InvalidReserves { reserve0: f64, reserve1: f64 },
    #[error("pool does not use a stableswap curve")]
    NotStableSwap,
}

/// Reserves, fee and curve parameters of one pool.
///
/// The stableswap invariant `D` is computed on first use and kept until the reserves or the
/// amplification are written through a setter.
#[derive(Clone, Debug)]
pub struct CurveState {
    params: CurveParams,
    reserve0: f64,
    reserve1: f64,
    fee: f64,
    invariant: OnceCell<f64>,
}

impl CurveState {
    pub fn new(params: CurveParams, reserve0: f64, reserve1: f64, fee: f64) -> Result<Self, CurveError> {
        validate_params(&params)?;
        validate_reserves(reserve0, reserve1)?;
        if !(0.0..1.0).contains(&fee) {
            return Err(CurveError::InvalidFee(fee));
        }
        Ok(Self {
            params,
            reserve0,
            reserve1,
            fee,
            invariant: OnceCell::new(),
        })
    }

    pub fn constant_product(reserve0: f64, reserve1: f64, fee: f64) -> Result<Self, CurveError> {
        Self::new(CurveParams::ConstantProduct, reserve0, reserve1, fee)
    }

    pub fn weighted(
        weight0: u32,
        weight1: u32,
        reserve0: f64,
        reserve1: f64,
        fee: f64,
    ) -> Result<Self, CurveError> {
        Self::new(
            CurveParams::WeightedConstantMean { weight0, weight1 },
            reserve0,
            reserve1,
            fee,
        )
    }

    pub fn stable_swap(amplification: f64, reserve0: f64, reserve1: f64, fee: f64) -> Result<Self, CurveError> {
        Self::new(CurveParams::StableSwap { amplification }, reserve0, reserve1, fee)
    }

    pub fn params(&self) -> CurveParams {
        self.params
    }

    pub fn reserve0(&self) -> f64 {
        self.reserve0
    }

    pub fn reserve1(&self) -> f64 {
        self.reserve1
    }

    pub fn fee(&self) -> f64 {
        self.fee
    }

    pub fn set_reserves(&mut self, reserve0: f64, reserve1: f64) -> Result<(), CurveError> {
        validate_reserves(reserve0, reserve1)?;
        self.reserve0 = reserve0;
        self.reserve1 = reserve1;
        self.invariant = OnceCell::new();
        Ok(())
    }

    pub fn set_amplification(&mut self, amplification: f64) -> Result<(), CurveError> {
        let CurveParams::StableSwap { .. } = self.params else {
            return Err(CurveError::NotStableSwap);
        };
        let params = CurveParams::StableSwap { amplification };
        validate_params(&params)?;
        self.params = params;
        self.invariant = OnceCell::new();
        Ok(())
    }

    /// Returns the stableswap invariant `D`, or `None` for other curves.
    pub fn stable_invariant(&self) -> Option<f64> {
        match self.params {
            CurveParams::StableSwap { amplification } => Some(
                *self
                    .invariant
                    .get_or_init(|| compute_stable_invariant(amplification, self.reserve0, self.reserve1)),
            ),
            _ => None,
        }
    }

    /// `(reserve_in, reserve_out)` for the given direction.
    fn oriented_reserves(&self, token0_is_input: bool) -> (f64, f64) {
        if token0_is_input {
            (self.reserve0, self.reserve1)
        } else {
            (self.reserve1, self.reserve0)
        }
    }

    /// `weight_in / weight_out` for the given direction. Only meaningful for weighted pools.
    fn weight_ratio(&self, token0_is_input: bool) -> f64 {
        match self.params {
            CurveParams::WeightedConstantMean { weight0, weight1 } if token0_is_input => {
                f64::from(weight0) / f64::from(weight1)
            }
            CurveParams::WeightedConstantMean { weight0, weight1 } => f64::from(weight1) / f64::from(weight0),
            _ => 1.0,
        }
    }

    fn is_empty(&self) -> bool {
        self.reserve0 <= 0.0 || self.reserve1 <= 0.0
    }

    /// Amount of the output asset received for `amount_in` of the input asset.
    pub fn output_given_input(&self, amount_in: f64, token0_is_input: bool) -> f64 {
        if self.is_empty() || !(amount_in > 0.0) {
            return 0.0;
        }
        let (x, y) = self.oriented_reserves(token0_is_input);
        match self.params {
            CurveParams::ConstantProduct => constant_product_out(x, y, self.fee, amount_in),
            CurveParams::WeightedConstantMean { .. } => {
                weighted_out(x, y, self.weight_ratio(token0_is_input), self.fee, amount_in)
            }
            CurveParams::StableSwap { amplification } => {
                let d = self.stable_invariant().unwrap_or_default();
                let y_new = stable_y(amplification, d, x + amount_in);
                ((y - y_new) * (1.0 - self.fee)).max(0.0)
            }
        }
    }

    /// Amount of the input asset required to receive `amount_out` of the output asset.
    ///
    /// Returns `f64::INFINITY` when the output reaches the output reserve.
    pub fn input_given_output(&self, amount_out: f64, token0_is_input: bool) -> f64 {
        if self.is_empty() || !(amount_out > 0.0) {
            return 0.0;
        }
        let (x, y) = self.oriented_reserves(token0_is_input);
        match self.params {
            CurveParams::ConstantProduct => {
                if amount_out >= y {
                    return f64::INFINITY;
                }
                x * amount_out / ((1.0 - self.fee) * (y - amount_out))
            }
            CurveParams::WeightedConstantMean { .. } => {
                if amount_out >= y {
                    return f64::INFINITY;
                }
                let w = self.weight_ratio(token0_is_input);
                x * ((1.0 - amount_out / y).powf(-1.0 / w) - 1.0) / (1.0 - self.fee)
            }
            CurveParams::StableSwap { amplification } => {
                let y_new = y - amount_out / (1.0 - self.fee);
                if y_new <= 0.0 {
                    return f64::INFINITY;
                }
                let d = self.stable_invariant().unwrap_or_default();
                (stable_y(amplification, d, y_new) - x).max(0.0)
            }
        }
    }

    /// Marginal price `d(out)/d(in)` after `amount_in` has been swapped in.
    pub fn marginal_price(&self, amount_in: f64, token0_is_input: bool) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let amount_in = amount_in.max(0.0);
        let (x, y) = self.oriented_reserves(token0_is_input);
        match self.params {
            CurveParams::ConstantProduct => {
                let x_eff = x / (1.0 - self.fee);
                let denominator = x_eff + amount_in;
                y * x_eff / (denominator * denominator)
            }
            CurveParams::WeightedConstantMean { .. } => {
                let w = self.weight_ratio(token0_is_input);
                let x_new = x + amount_in * (1.0 - self.fee);
                y * w * (1.0 - self.fee) * (x / x_new).powf(w) / x_new
            }
            CurveParams::StableSwap { amplification } => {
                let d = self.stable_invariant().unwrap_or_default();
                stable_marginal_price(amplification, d, x + amount_in) * (1.0 - self.fee)
            }
        }
    }

    /// Input amount at which the effective price `1 / marginal_price` reaches `price`.
    ///
    /// Closed-form curves may return a negative amount when the pool is already priced above
    /// `price`. `hint` seeds the numeric inversion used for stableswap pools.
    pub fn input_given_marginal_price(&self, price: f64, token0_is_input: bool, hint: f64) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let (x, y) = self.oriented_reserves(token0_is_input);
        match self.params {
            CurveParams::ConstantProduct => {
                let x_eff = x / (1.0 - self.fee);
                (y * x_eff * price).sqrt() - x_eff
            }
            CurveParams::WeightedConstantMean { .. } => {
                // (x + a(1-fee))^(w+1) = price * y * w * (1-fee) * x^w, solved in log space
                let w = self.weight_ratio(token0_is_input);
                let log_t = price.ln() + y.ln() + w.ln() + (1.0 - self.fee).ln() + w * x.ln();
                let x_new = (log_t / (w + 1.0)).exp();
                (x_new - x) / (1.0 - self.fee)
            }
            CurveParams::StableSwap { .. } => revert_positive(
                |amount| 1.0 / self.marginal_price(amount, token0_is_input),
                price,
                hint,
            ),
        }
    }
}

fn validate_params(params: &CurveParams) -> Result<(), CurveError> {
    match *params {
        CurveParams::ConstantProduct => Ok(()),
        CurveParams::WeightedConstantMean { weight0, weight1 } => {
            if weight0 == 0 || weight1 == 0 || weight0 + weight1 != 100 {
                return Err(CurveError::InvalidWeights { weight0, weight1 });
            }
            Ok(())
        }
        CurveParams::StableSwap { amplification } => {
            if !(amplification.is_finite() && amplification > 0.0) {
                return Err(CurveError::InvalidAmplification(amplification));
            }
            Ok(())
        }
    }
}

fn validate_reserves(reserve0: f64, reserve1: f64) -> Result<(), CurveError> {
    let valid = |r: f64| r.is_finite() && r >= 0.0;
    if !valid(reserve0) || !valid(reserve1) {
        return Err(CurveError::InvalidReserves { reserve0, reserve1 });
    }
    Ok(())
}

/// `y * a / (x / (1 - fee) + a)`
pub fn constant_product_out(x: f64, y: f64, fee: f64, amount_in: f64) -> f64 {
    y * amount_in / (x / (1.0 - fee) + amount_in)
}

/// `y * (1 - (x / (x + a(1 - fee)))^w)`
pub fn weighted_out(x: f64, y: f64, weight_ratio: f64, fee: f64, amount_in: f64) -> f64 {
    let x_new = x + amount_in * (1.0 - fee);
    y * (1.0 - (x / x_new).powf(weight_ratio))
}

/// Solves `4A(x + y) + D = 4AD + D^3 / (4xy)` for `D` by Newton's method.
///
/// Stops when consecutive iterates differ by at most one unit.
pub fn compute_stable_invariant(amplification: f64, x: f64, y: f64) -> f64 {
    if x <= 0.0 || y <= 0.0 {
        return 0.0;
    }
    let s = x + y;
    // A * n^n with n = 2. The `2A` form some implementations use does not solve the curve
    // `stable_y` inverts, so swaps would not conserve D.
    let ann = 4.0 * amplification;
    let mut d = s;
    for _ in 0..STABLE_INVARIANT_MAX_ITERATIONS {
        let d_p = d * d * d / (4.0 * x * y);
        let prev = d;
        d = (ann * s + 2.0 * d_p) * d / ((ann - 1.0) * d + 3.0 * d_p);
        if (d - prev).abs() <= 1.0 {
            break;
        }
    }
    d
}

/// Reserve on the other side of the stableswap curve `D` once one reserve equals `x`.
///
/// Larger root of `16Ax*y^2 + (16Ax^2 + 4Dx - 16ADx)*y - D^3 = 0`.
pub fn stable_y(amplification: f64, d: f64, x: f64) -> f64 {
    if d <= 0.0 || x <= 0.0 {
        return 0.0;
    }
    let a = 16.0 * amplification * x;
    let b = 16.0 * amplification * x * x + 4.0 * d * x - 16.0 * amplification * d * x;
    let c = -d * d * d;
    solve_quadratic(a, b, c).map_or(0.0, |(_, larger)| larger)
}

/// `-dy/dx` along the stableswap curve at reserve `x`, before fees.
pub fn stable_marginal_price(amplification: f64, d: f64, x: f64) -> f64 {
    if d <= 0.0 || x <= 0.0 {
        return 0.0;
    }
    // 4A*y^2 + b*y - c = 0 with c = D^3 / (4x)
    let b = 4.0 * amplification * x + d - 4.0 * amplification * d;
    let c = d * d * d / (4.0 * x);
    let root = (b * b + 16.0 * amplification * c).sqrt();
    0.5 - (b - 2.0 * c / x) / (2.0 * root)
}
