use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RoutingConfig;
use crate::solver::common::{ExactInSwapRequest, ExactInSwapResult, Pool, RouteError, SwapAllocation};
use crate::solver::router::{Router, SingleRouter};
#[cfg(target_arch = "wasm32")]
use serde_wasm_bindgen::{Error, from_value, to_value};
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Bisection passes of [`bisection_split`].
const BISECTION_ITERATIONS: usize = 100;

/// A split of an input between routers, before gas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub amount_out: f64,
    pub gas: f64,
    /// Non-negative shares of the input, summing to 1.
    pub shares: Vec<f64>,
}

/// Result of the gas-aware subset search, with shares indexed like the input routers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub amount_out: f64,
    pub gas: f64,
    /// `amount_out - gas * gas_price_in_output`.
    pub net_amount_out: f64,
    pub shares: Vec<f64>,
}

/// Output and gas of `shares`. Every router in the set is charged its gas, used or not.
fn evaluate(amount_in: f64, routers: &[&Router], shares: Vec<f64>) -> Split {
    let (amount_out, gas) = routers
        .iter()
        .zip(&shares)
        .map(|(router, share)| router.output_for(amount_in * share))
        .fold((0.0, 0.0), |(out, gas), quote| (out + quote.amount_out, gas + quote.gas));
    Split { amount_out, gas, shares }
}

fn one_hot(len: usize, index: usize) -> Vec<f64> {
    let mut shares = vec![0.0; len];
    if let Some(share) = shares.get_mut(index) {
        *share = 1.0;
    }
    shares
}

/// Splits `amount_in` between `routers` by equalizing their effective marginal prices.
///
/// Each router is seeded with its output for an equal share. Every pass normalizes the
/// allocation, takes the worst effective price `p* = max 1/marginal_price` among routers with a
/// positive allocation, and re-allocates each router the input at which it reaches `p*`. Raw
/// allocations may go negative between passes; negatives are clamped only at the end.
///
/// The returned gas covers every router in `routers`, including those left with a zero share.
pub fn optimal_split(amount_in: f64, routers: &[&Router], iterations: usize) -> Split {
    let count = routers.len();
    if count == 0 {
        return Split {
            amount_out: 0.0,
            gas: 0.0,
            shares: Vec::new(),
        };
    }
    if !(amount_in > 0.0) {
        return evaluate(0.0, routers, one_hot(count, 0));
    }
    if count == 1 {
        let quote = routers[0].output_for(amount_in);
        return Split {
            amount_out: quote.amount_out,
            gas: quote.gas,
            shares: vec![1.0],
        };
    }

    let mut distribution: Vec<f64> = routers
        .iter()
        .map(|router| router.output_for(amount_in / count as f64).amount_out.max(0.0))
        .collect();
    let best_seed = distribution
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(index, _)| index);

    for _ in 0..iterations {
        let total: f64 = distribution.iter().sum();
        if !(total > 0.0) {
            break;
        }
        let price = routers
            .iter()
            .zip(&distribution)
            .filter(|(_, allocated)| **allocated > 0.0)
            .map(|(router, allocated)| 1.0 / router.marginal_price(amount_in * allocated / total))
            .filter(|price| price.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        if !price.is_finite() {
            break;
        }
        distribution = routers
            .iter()
            .zip(&distribution)
            .map(|(router, allocated)| router.input_for_price(price, *allocated))
            .collect();
    }

    let clamped: Vec<f64> = distribution.iter().map(|allocated| allocated.max(0.0)).collect();
    let total: f64 = clamped.iter().sum();
    let shares = if total > 0.0 && total.is_finite() {
        clamped.iter().map(|allocated| allocated / total).collect()
    } else {
        one_hot(count, best_seed)
    };
    evaluate(amount_in, routers, shares)
}

/// Gas-aware subset search over [`optimal_split`].
///
/// Splits across all routers, then across the top N-1, N-2, ... 1 routers ranked by their share
/// in the full split, and keeps the best output net of `gas * gas_price_in_output`. Once a
/// subset loses to the next larger one the result is settled; a later, smaller subset beating
/// it is logged and ignored.
pub fn best_distribution(
    amount_in: f64,
    routers: &[Router],
    gas_price_in_output: f64,
    iterations: usize,
) -> Distribution {
    let all: Vec<&Router> = routers.iter().collect();
    let split = optimal_split(amount_in, &all, iterations);
    let mut best_net = split.amount_out - split.gas * gas_price_in_output;

    let mut order: Vec<usize> = (0..routers.len()).collect();
    order.sort_by(|&a, &b| split.shares[b].total_cmp(&split.shares[a]));
    let mut best = split;

    let mut settled = false;
    for size in (1..routers.len()).rev() {
        let subset: Vec<&Router> = order[..size].iter().map(|&index| &routers[index]).collect();
        let candidate = optimal_split(amount_in, &subset, iterations);
        let net = candidate.amount_out - candidate.gas * gas_price_in_output;
        if net > best_net {
            if settled {
                warn!(size, net, best_net, "smaller router subset beat a settled split");
                continue;
            }
            let mut shares = vec![0.0; routers.len()];
            for (position, &index) in order[..size].iter().enumerate() {
                shares[index] = candidate.shares[position];
            }
            best_net = net;
            best = Split {
                amount_out: candidate.amount_out,
                gas: candidate.gas,
                shares,
            };
        } else {
            settled = true;
        }
    }

    debug!(
        amount_in,
        amount_out = best.amount_out,
        gas = best.gas,
        used = best.shares.iter().filter(|share| **share > 0.0).count(),
        "parallel split"
    );
    Distribution {
        amount_out: best.amount_out,
        gas: best.gas,
        net_amount_out: best_net,
        shares: best.shares,
    }
}

/// Exact marginal-price equalization by bisection on the common effective price.
///
/// Finds `p` such that the inputs at which every router reaches `p` sum to `amount_in`.
/// Slower than [`optimal_split`]; gas is not considered.
pub fn bisection_split(amount_in: f64, routers: &[&Router]) -> Split {
    let count = routers.len();
    if count <= 1 || !(amount_in > 0.0) {
        return optimal_split(amount_in, routers, 0);
    }
    let inputs_at = |price: f64| -> Vec<f64> {
        routers
            .iter()
            .map(|router| router.input_for_price(price, amount_in / count as f64).max(0.0))
            .collect()
    };
    let total_at = |price: f64| -> f64 { inputs_at(price).iter().sum() };

    let mut low = routers
        .iter()
        .map(|router| 1.0 / router.marginal_price(0.0))
        .filter(|price| price.is_finite())
        .fold(f64::INFINITY, f64::min);
    if !low.is_finite() {
        return optimal_split(amount_in, routers, 0);
    }
    let mut high = low * 2.0;
    let mut doublings = 0;
    while total_at(high) < amount_in {
        low = high;
        high *= 2.0;
        doublings += 1;
        if doublings > 1000 || !high.is_finite() {
            return optimal_split(amount_in, routers, 0);
        }
    }
    for _ in 0..BISECTION_ITERATIONS {
        let middle = (low + high) / 2.0;
        if total_at(middle) < amount_in {
            low = middle;
        } else {
            high = middle;
        }
    }

    let inputs = inputs_at(high);
    let total: f64 = inputs.iter().sum();
    if !(total > 0.0) {
        return optimal_split(amount_in, routers, 0);
    }
    evaluate(amount_in, routers, inputs.iter().map(|input| input / total).collect())
}

/// Splits an exact-in swap across every pool that connects `token_in` to `token_out`.
///
/// Gas is priced with the output asset's gas price.
pub fn find_best_split_exact_in(
    pools: &[Pool],
    request: &ExactInSwapRequest,
    config: &RoutingConfig,
) -> Result<ExactInSwapResult, RouteError> {
    if !(request.amount_in.is_finite() && request.amount_in >= 0.0) {
        return Err(RouteError::InvalidAmount(request.amount_in));
    }

    let candidates: Vec<(&Pool, bool)> = pools
        .iter()
        .filter_map(|pool| {
            pool.swap_direction(&request.token_in, &request.token_out)
                .map(|direction| (pool, direction))
        })
        .collect();
    let Some(&(first, token0_is_input)) = candidates.first() else {
        return Err(RouteError::NoViablePool);
    };
    let output_asset = if token0_is_input { first.asset1 } else { first.asset0 };

    let routers: Vec<Router> = candidates
        .iter()
        .map(|&(pool, direction)| Router::Single(SingleRouter::new(pool, direction).with_gas(config.leg_gas)))
        .collect();
    let distribution = best_distribution(
        request.amount_in,
        &routers,
        output_asset.gas_price,
        config.split_iterations,
    );

    let allocations: Vec<SwapAllocation> = routers
        .iter()
        .zip(&candidates)
        .zip(&distribution.shares)
        .filter(|(_, share)| **share > 0.0)
        .map(|((router, (pool, _)), share)| {
            let amount_in = request.amount_in * share;
            SwapAllocation {
                pool: pool.address,
                amount_in,
                amount_out: router.output_for(amount_in).amount_out,
            }
        })
        .collect();

    Ok(ExactInSwapResult {
        total_out: distribution.amount_out,
        gas: distribution.gas,
        net_out: distribution.net_amount_out,
        allocations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LEG_GAS;
    use crate::math::curve::CurveState;
    use crate::solver::common::Asset;
    use alloy_primitives::{Address, address};

    const TOKEN_A: Address = address!("0x078d782b760474a361dda0af3839290b0ef57ad6");
    const TOKEN_B: Address = address!("0x4200000000000000000000000000000000000006");

    fn pool(index: u8, curve: CurveState) -> Pool {
        let mut bytes = [0u8; 20];
        bytes[19] = index;
        Pool::new(
            Address::from(bytes),
            Asset::new(TOKEN_A, 1e-6),
            Asset::new(TOKEN_B, 1e-6),
            curve,
        )
    }

    fn singles<'a>(pools: &'a [Pool]) -> Vec<Router<'a>> {
        pools.iter().map(|pool| Router::single(pool, true)).collect()
    }

    #[test]
    fn test_equal_pools_split_evenly() {
        let pools = vec![
            pool(1, CurveState::constant_product(1e6, 1e6, 0.0).unwrap()),
            pool(2, CurveState::constant_product(1e6, 1e6, 0.0).unwrap()),
        ];
        let routers = singles(&pools);
        let distribution = best_distribution(1000.0, &routers, 0.0, 5);

        assert!((distribution.shares[0] - 0.5).abs() < 1e-9);
        assert!((distribution.shares[1] - 0.5).abs() < 1e-9);
        let expected = 2.0 * 1e6 * 500.0 / (1e6 + 500.0);
        assert!((distribution.amount_out - expected).abs() < 1e-9);
        assert_eq!(distribution.gas, 2.0 * LEG_GAS);
    }

    #[test]
    fn test_gas_drops_marginal_pool() {
        let pools = vec![
            pool(1, CurveState::constant_product(1e6, 1e6, 0.0).unwrap()),
            pool(2, CurveState::constant_product(1e6, 1e6, 0.0).unwrap()),
        ];
        let routers = singles(&pools);
        // Splitting gains ~0.5 output units; a second leg costs 40_000 * 1e-4 = 4
        let distribution = best_distribution(1000.0, &routers, 1e-4, 5);

        assert_eq!(distribution.gas, LEG_GAS);
        assert_eq!(distribution.shares.iter().filter(|share| **share > 0.0).count(), 1);
        assert!((distribution.shares.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        let expected = 1e6 * 1000.0 / (1e6 + 1000.0);
        assert!((distribution.amount_out - expected).abs() < 1e-9);
        assert!((distribution.net_amount_out - (expected - 4.0)).abs() < 1e-9);
    }

    #[test]
    fn test_split_conservation_and_ordering() {
        let pools = vec![
            pool(1, CurveState::constant_product(5e5, 5e5, 0.003).unwrap()),
            pool(2, CurveState::weighted(60, 40, 1.5e6, 1e6, 0.003).unwrap()),
            pool(3, CurveState::stable_swap(50.0, 2e6, 2e6, 0.0005).unwrap()),
            pool(4, CurveState::constant_product(1e3, 1e3, 0.003).unwrap()),
        ];
        let routers = singles(&pools);
        let distribution = best_distribution(50_000.0, &routers, 1e-6, 5);

        let sum: f64 = distribution.shares.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "shares sum to {sum}");
        assert!(distribution.shares.iter().all(|share| *share >= 0.0));
        // The stable pool is deepest and cheapest
        let top = distribution
            .shares
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(index, _)| index)
            .unwrap();
        assert_eq!(top, 2);

        // Never worse than splitting across every pool
        let refs: Vec<&Router> = routers.iter().collect();
        let full = optimal_split(50_000.0, &refs, 5);
        assert!(distribution.net_amount_out >= full.amount_out - full.gas * 1e-6);
    }

    #[test]
    fn test_optimal_split_matches_bisection() {
        let pools = vec![
            pool(1, CurveState::constant_product(1e6, 1e6, 0.003).unwrap()),
            pool(2, CurveState::constant_product(5e5, 5e5, 0.003).unwrap()),
            pool(3, CurveState::weighted(50, 50, 8e5, 8e5, 0.001).unwrap()),
        ];
        let routers = singles(&pools);
        let refs: Vec<&Router> = routers.iter().collect();

        let fast = optimal_split(10_000.0, &refs, 5);
        let exact = bisection_split(10_000.0, &refs);
        assert!(
            (fast.amount_out / exact.amount_out - 1.0).abs() < 1e-6,
            "{} vs {}",
            fast.amount_out,
            exact.amount_out
        );
        for (a, b) in fast.shares.iter().zip(&exact.shares) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_zero_amount_and_single_router() {
        let pools = vec![
            pool(1, CurveState::constant_product(1e6, 1e6, 0.003).unwrap()),
            pool(2, CurveState::constant_product(1e6, 1e6, 0.003).unwrap()),
        ];
        let routers = singles(&pools);
        let refs: Vec<&Router> = routers.iter().collect();

        let zero = optimal_split(0.0, &refs, 5);
        assert_eq!(zero.amount_out, 0.0);
        assert_eq!(zero.shares, vec![1.0, 0.0]);
        assert_eq!(zero.gas, 2.0 * LEG_GAS);

        let single = optimal_split(1000.0, &refs[..1], 5);
        assert_eq!(single.shares, vec![1.0]);
        assert_eq!(single.amount_out, pools[0].curve.output_given_input(1000.0, true));
    }

    #[test]
    fn test_priced_out_router_is_dropped() {
        // Second pool quotes half the price of the first: never worth using for a small trade
        let pools = vec![
            pool(1, CurveState::constant_product(1e6, 1e6, 0.003).unwrap()),
            pool(2, CurveState::constant_product(2e6, 1e6, 0.003).unwrap()),
        ];
        let routers = singles(&pools);
        let refs: Vec<&Router> = routers.iter().collect();
        // The worse pool sets p* and keeps a vanishing share
        let split = optimal_split(1000.0, &refs, 5);
        assert!(split.shares[1] < 1e-6, "share {}", split.shares[1]);
        // Any positive gas price removes it
        let distribution = best_distribution(1000.0, &routers, 1e-9, 5);
        assert_eq!(distribution.shares, vec![1.0, 0.0]);
        assert_eq!(distribution.gas, LEG_GAS);
    }

    #[test]
    fn test_empty_pool_does_not_stop_subset_search() {
        let pools = vec![
            pool(1, CurveState::constant_product(1e6, 1e6, 0.0).unwrap()),
            pool(2, CurveState::constant_product(1e6, 1e6, 0.0).unwrap()),
            pool(3, CurveState::constant_product(0.0, 0.0, 0.0).unwrap()),
        ];
        let routers = singles(&pools);
        let refs: Vec<&Router> = routers.iter().collect();

        // The empty pool gets no share but is still paid for in the full set
        let full = optimal_split(1000.0, &refs, 5);
        assert_eq!(full.shares[2], 0.0);
        assert_eq!(full.gas, 3.0 * LEG_GAS);

        let with_empty = best_distribution(1000.0, &routers, 1e-4, 5);
        let without_empty = best_distribution(1000.0, &routers[..2], 1e-4, 5);
        assert!(
            with_empty.net_amount_out >= without_empty.net_amount_out,
            "{} vs {}",
            with_empty.net_amount_out,
            without_empty.net_amount_out
        );
        assert_eq!(with_empty.shares, vec![1.0, 0.0, 0.0]);
        assert_eq!(with_empty.gas, LEG_GAS);
    }

    #[test]
    fn test_find_best_split_exact_in() {
        let mut pools = vec![
            pool(1, CurveState::constant_product(1e6, 1e6, 0.003).unwrap()),
            pool(2, CurveState::stable_swap(80.0, 3e6, 3e6, 0.0004).unwrap()),
        ];
        // Reversed pool: token B is asset0
        let mut reversed = pool(3, CurveState::constant_product(2e6, 2e6, 0.003).unwrap());
        std::mem::swap(&mut reversed.asset0, &mut reversed.asset1);
        pools.push(reversed);
        // Unrelated pair
        let mut unrelated = pool(4, CurveState::constant_product(1e6, 1e6, 0.003).unwrap());
        unrelated.asset1 = Asset::new(Address::ZERO, 1.0);
        pools.push(unrelated);

        let request = ExactInSwapRequest {
            token_in: TOKEN_A,
            token_out: TOKEN_B,
            amount_in: 100_000.0,
            steps: None,
        };
        let result = find_best_split_exact_in(&pools, &request, &RoutingConfig::default()).unwrap();

        assert!(!result.allocations.is_empty());
        assert!(result.allocations.iter().all(|allocation| allocation.pool != pools[3].address));
        let allocated: f64 = result.allocations.iter().map(|allocation| allocation.amount_in).sum();
        assert!((allocated - 100_000.0).abs() < 1e-6);
        let received: f64 = result.allocations.iter().map(|allocation| allocation.amount_out).sum();
        assert!((received - result.total_out).abs() < 1e-6);
        assert!(result.total_out > 99_000.0 && result.total_out < 100_000.0);
    }

    #[test]
    fn test_find_best_split_exact_in_errors() {
        let pools = vec![pool(1, CurveState::constant_product(1e6, 1e6, 0.003).unwrap())];
        let request = ExactInSwapRequest {
            token_in: TOKEN_B,
            token_out: Address::ZERO,
            amount_in: 1.0,
            steps: None,
        };
        assert_eq!(
            find_best_split_exact_in(&pools, &request, &RoutingConfig::default()),
            Err(RouteError::NoViablePool)
        );
        let request = ExactInSwapRequest {
            token_in: TOKEN_A,
            token_out: TOKEN_B,
            amount_in: f64::NAN,
            steps: None,
        };
        assert!(matches!(
            find_best_split_exact_in(&pools, &request, &RoutingConfig::default()),
            Err(RouteError::InvalidAmount(_))
        ));
    }
}

// WASM wrapper functions
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn wasm_find_best_split_exact_in(pools: JsValue, request: JsValue) -> Result<JsValue, Error> {
    let pools: Vec<Pool> = from_value(pools)?;
    let request: ExactInSwapRequest = from_value(request)?;

    let result = find_best_split_exact_in(&pools, &request, &RoutingConfig::default()).map_err(Error::new)?;
    to_value(&result)
}
