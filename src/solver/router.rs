use serde::{Deserialize, Serialize};

use crate::config::{LEG_GAS, RoutingConfig, SPLIT_ITERATIONS};
use crate::math::common::revert_positive;
use crate::solver::algorithm::{Distribution, best_distribution};
use crate::solver::common::{Pool, RouteError};

/// Output of a router for a given input, with the gas its execution consumes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterQuote {
    pub amount_out: f64,
    pub gas: f64,
}

/// A composable pricing function from one input asset to one output asset.
#[derive(Clone, Debug)]
pub enum Router<'a> {
    /// One pool in one direction.
    Single(SingleRouter<'a>),
    /// Children sharing the same input and output, the input split between them.
    Parallel(ParallelRouter<'a>),
    /// Children chained output to input.
    Serial(SerialRouter<'a>),
}

impl<'a> Router<'a> {
    pub fn single(pool: &'a Pool, token0_is_input: bool) -> Self {
        Router::Single(SingleRouter::new(pool, token0_is_input))
    }

    pub fn parallel(children: Vec<Router<'a>>, gas_price_in_output: f64) -> Result<Self, RouteError> {
        ParallelRouter::new(children, gas_price_in_output).map(Router::Parallel)
    }

    pub fn serial(children: Vec<Router<'a>>) -> Result<Self, RouteError> {
        SerialRouter::new(children).map(Router::Serial)
    }

    pub fn output_for(&self, amount_in: f64) -> RouterQuote {
        match self {
            Router::Single(router) => router.output_for(amount_in),
            Router::Parallel(router) => router.output_for(amount_in),
            Router::Serial(router) => router.output_for(amount_in),
        }
    }

    /// Marginal price `d(out)/d(in)` at `amount_in`.
    pub fn marginal_price(&self, amount_in: f64) -> f64 {
        match self {
            Router::Single(router) => router.marginal_price(amount_in),
            Router::Parallel(router) => router.marginal_price(amount_in),
            Router::Serial(router) => router.marginal_price(amount_in),
        }
    }

    /// Input at which the effective price `1 / marginal_price` reaches `price`.
    pub fn input_for_price(&self, price: f64, hint: f64) -> f64 {
        match self {
            Router::Single(router) => router.input_for_price(price, hint),
            Router::Parallel(router) => router.input_for_price(price, hint),
            Router::Serial(router) => router.input_for_price(price, hint),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SingleRouter<'a> {
    pub pool: &'a Pool,
    pub token0_is_input: bool,
    pub gas: f64,
}

impl<'a> SingleRouter<'a> {
    pub fn new(pool: &'a Pool, token0_is_input: bool) -> Self {
        Self {
            pool,
            token0_is_input,
            gas: LEG_GAS,
        }
    }

    pub fn with_gas(mut self, gas: f64) -> Self {
        self.gas = gas;
        self
    }

    pub fn output_for(&self, amount_in: f64) -> RouterQuote {
        RouterQuote {
            amount_out: self.pool.curve.output_given_input(amount_in, self.token0_is_input),
            gas: self.gas,
        }
    }

    pub fn marginal_price(&self, amount_in: f64) -> f64 {
        self.pool.curve.marginal_price(amount_in, self.token0_is_input)
    }

    pub fn input_for_price(&self, price: f64, hint: f64) -> f64 {
        self.pool
            .curve
            .input_given_marginal_price(price, self.token0_is_input, hint)
    }
}

#[derive(Clone, Debug)]
pub struct ParallelRouter<'a> {
    pub children: Vec<Router<'a>>,
    /// Cost of one gas unit in the output asset, charged against the output of every used child.
    pub gas_price_in_output: f64,
    pub iterations: usize,
}

impl<'a> ParallelRouter<'a> {
    pub fn new(children: Vec<Router<'a>>, gas_price_in_output: f64) -> Result<Self, RouteError> {
        if children.is_empty() {
            return Err(RouteError::EmptyRouter);
        }
        Ok(Self {
            children,
            gas_price_in_output,
            iterations: SPLIT_ITERATIONS,
        })
    }

    pub fn with_config(mut self, config: &RoutingConfig) -> Self {
        self.iterations = config.split_iterations;
        self
    }

    /// Gas-aware best split of `amount_in` between the children.
    pub fn distribution(&self, amount_in: f64) -> Distribution {
        best_distribution(amount_in, &self.children, self.gas_price_in_output, self.iterations)
    }

    pub fn output_for(&self, amount_in: f64) -> RouterQuote {
        let distribution = self.distribution(amount_in);
        RouterQuote {
            amount_out: distribution.amount_out,
            gas: distribution.gas,
        }
    }

    /// Marginal price of the child receiving the largest share, at that child's allocation.
    pub fn marginal_price(&self, amount_in: f64) -> f64 {
        let distribution = self.distribution(amount_in);
        let top = distribution
            .shares
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(index, _)| index);
        let share = distribution.shares.get(top).copied().unwrap_or(1.0);
        self.children[top].marginal_price(amount_in * share)
    }

    pub fn input_for_price(&self, price: f64, hint: f64) -> f64 {
        revert_positive(|amount| 1.0 / self.marginal_price(amount), price, hint)
    }
}

#[derive(Clone, Debug)]
pub struct SerialRouter<'a> {
    pub children: Vec<Router<'a>>,
}

impl<'a> SerialRouter<'a> {
    pub fn new(children: Vec<Router<'a>>) -> Result<Self, RouteError> {
        if children.is_empty() {
            return Err(RouteError::EmptyRouter);
        }
        Ok(Self { children })
    }

    pub fn output_for(&self, amount_in: f64) -> RouterQuote {
        self.children.iter().fold(
            RouterQuote {
                amount_out: amount_in,
                gas: 0.0,
            },
            |quote, child| {
                let next = child.output_for(quote.amount_out);
                RouterQuote {
                    amount_out: next.amount_out,
                    gas: quote.gas + next.gas,
                }
            },
        )
    }

    /// Chain rule over the children, each evaluated at the amount reaching it.
    pub fn marginal_price(&self, amount_in: f64) -> f64 {
        let mut amount = amount_in;
        let mut price = 1.0;
        for child in &self.children {
            price *= child.marginal_price(amount);
            amount = child.output_for(amount).amount_out;
        }
        price
    }

    pub fn input_for_price(&self, price: f64, hint: f64) -> f64 {
        match self.children.as_slice() {
            [only] => only.input_for_price(price, hint),
            _ => revert_positive(|amount| 1.0 / self.marginal_price(amount), price, hint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::curve::CurveState;
    use crate::solver::common::Asset;
    use alloy_primitives::{Address, address};

    fn asset(address: Address) -> Asset {
        Asset::new(address, 1e-7)
    }

    fn pool(curve: CurveState) -> Pool {
        Pool::new(
            Address::ZERO,
            asset(address!("0x0000000000000000000000000000000000000001")),
            asset(address!("0x0000000000000000000000000000000000000002")),
            curve,
        )
    }

    #[test]
    fn test_single_router_delegates_to_curve() {
        let pool = pool(CurveState::constant_product(1e6, 2e6, 0.003).unwrap());
        let router = Router::single(&pool, false);
        let quote = router.output_for(1000.0);
        assert_eq!(quote.amount_out, pool.curve.output_given_input(1000.0, false));
        assert_eq!(quote.gas, LEG_GAS);
        assert_eq!(router.marginal_price(50.0), pool.curve.marginal_price(50.0, false));
    }

    #[test]
    fn test_serial_router_chains_outputs_and_gas() {
        let first = pool(CurveState::constant_product(1e6, 1e6, 0.003).unwrap());
        let second = pool(CurveState::stable_swap(100.0, 1e6, 1e6, 0.0004).unwrap());
        let router = Router::serial(vec![Router::single(&first, true), Router::single(&second, true)]).unwrap();

        let quote = router.output_for(10_000.0);
        let hop = first.curve.output_given_input(10_000.0, true);
        let expected = second.curve.output_given_input(hop, true);
        assert_eq!(quote.amount_out, expected);
        assert_eq!(quote.gas, 2.0 * LEG_GAS);
    }

    #[test]
    fn test_serial_router_marginal_price_and_inversion() {
        let first = pool(CurveState::weighted(60, 40, 1e6, 1e6, 0.003).unwrap());
        let second = pool(CurveState::constant_product(2e6, 1e6, 0.003).unwrap());
        let router = Router::serial(vec![Router::single(&first, true), Router::single(&second, false)]).unwrap();

        // Chain rule against a central difference
        let amount = 20_000.0;
        let h = 1.0;
        let numeric = (router.output_for(amount + h).amount_out - router.output_for(amount - h).amount_out) / (2.0 * h);
        let analytic = router.marginal_price(amount);
        assert!((analytic / numeric - 1.0).abs() < 1e-6, "{analytic} vs {numeric}");

        // Effective price target recovered within the bisection precision
        let target = 1.05 / router.marginal_price(0.0);
        let input = router.input_for_price(target, 1000.0);
        let price = 1.0 / router.marginal_price(input);
        assert!((price / target - 1.0).abs() < 1e-4, "{price} vs {target}");
    }

    #[test]
    fn test_parallel_router_splits_and_reports_price() {
        let a = pool(CurveState::constant_product(1e6, 1e6, 0.0).unwrap());
        let b = pool(CurveState::constant_product(1e6, 1e6, 0.0).unwrap());
        let router = Router::parallel(vec![Router::single(&a, true), Router::single(&b, true)], 0.0).unwrap();

        let quote = router.output_for(1000.0);
        let expected = 2.0 * a.curve.output_given_input(500.0, true);
        assert!((quote.amount_out - expected).abs() < 1e-9);
        assert_eq!(quote.gas, 2.0 * LEG_GAS);
        // Both children at 500: the price of either one
        let price = router.marginal_price(1000.0);
        assert!((price - a.curve.marginal_price(500.0, true)).abs() < 1e-12);
    }

    fn central_difference(router: &Router, amount: f64, h: f64) -> f64 {
        (router.output_for(amount + h).amount_out - router.output_for(amount - h).amount_out) / (2.0 * h)
    }

    #[test]
    fn test_parallel_of_serial_routes() {
        // Two bridges between the same pair of assets
        let a_b = pool(CurveState::constant_product(1e6, 1e6, 0.003).unwrap());
        let b_c = pool(CurveState::constant_product(1e6, 1e6, 0.003).unwrap());
        let a_d = pool(CurveState::weighted(50, 50, 2e6, 2e6, 0.003).unwrap());
        let d_c = pool(CurveState::stable_swap(100.0, 1e6, 1e6, 0.0004).unwrap());
        let upper = Router::serial(vec![Router::single(&a_b, true), Router::single(&b_c, true)]).unwrap();
        let lower = Router::serial(vec![Router::single(&a_d, true), Router::single(&d_c, true)]).unwrap();
        let router = Router::parallel(vec![upper.clone(), lower.clone()], 0.0).unwrap();

        let amount = 60_000.0;
        let quote = router.output_for(amount);
        assert_eq!(quote.gas, 4.0 * LEG_GAS);
        // Better than either bridge alone
        assert!(quote.amount_out > upper.output_for(amount).amount_out);
        assert!(quote.amount_out > lower.output_for(amount).amount_out);

        let numeric = central_difference(&router, amount, 50.0);
        let analytic = router.marginal_price(amount);
        assert!((analytic / numeric - 1.0).abs() < 1e-3, "{analytic} vs {numeric}");

        let target = 1.0 / router.marginal_price(30_000.0);
        let input = router.input_for_price(target, 1000.0);
        let price = 1.0 / router.marginal_price(input);
        assert!((price / target - 1.0).abs() < 1e-3, "{price} vs {target}");
    }

    #[test]
    fn test_serial_of_parallel_hop() {
        let a_b = pool(CurveState::constant_product(2e6, 2e6, 0.003).unwrap());
        let b_c_deep = pool(CurveState::constant_product(1e6, 1e6, 0.003).unwrap());
        let b_c_shallow = pool(CurveState::constant_product(4e5, 4e5, 0.001).unwrap());
        let second = Router::parallel(
            vec![Router::single(&b_c_deep, true), Router::single(&b_c_shallow, true)],
            0.0,
        )
        .unwrap();
        let router = Router::serial(vec![Router::single(&a_b, true), second]).unwrap();

        let amount = 40_000.0;
        assert_eq!(router.output_for(amount).gas, 3.0 * LEG_GAS);

        let numeric = central_difference(&router, amount, 40.0);
        let analytic = router.marginal_price(amount);
        assert!((analytic / numeric - 1.0).abs() < 1e-3, "{analytic} vs {numeric}");

        let target = 1.0 / router.marginal_price(25_000.0);
        let input = router.input_for_price(target, 1000.0);
        let price = 1.0 / router.marginal_price(input);
        assert!((price / target - 1.0).abs() < 1e-3, "{price} vs {target}");
    }

    #[test]
    fn test_empty_combinators_are_rejected() {
        assert!(matches!(Router::serial(vec![]), Err(RouteError::EmptyRouter)));
        assert!(matches!(Router::parallel(vec![], 0.0), Err(RouteError::EmptyRouter)));
    }
}
