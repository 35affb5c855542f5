use std::collections::HashMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::RoutingConfig;
use crate::math::common::{check_invariant, close_values};
use crate::math::quote::find_curve_point;
use crate::solver::common::{Asset, ExactInSwapRequest, Pool, Route, RouteError, RouteProgress};
#[cfg(target_arch = "wasm32")]
use serde_wasm_bindgen::{Error, from_value, to_value};
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// A push against the current flow within this relative distance of the recorded output
/// unwinds the edge to zero.
const UNWIND_TOLERANCE: f64 = 1e-8;

/// Whether pushing `amount_in` against a flow that paid out `flow_out` returns the edge to zero.
fn unwinds(amount_in: f64, flow_out: f64) -> bool {
    (amount_in - flow_out).abs() <= UNWIND_TOLERANCE * flow_out.abs().max(amount_in.abs())
}

/// Net flow recorded on an edge since the last reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum EdgeFlow {
    #[default]
    Zero,
    /// `vertex0` has put `amount_in` of asset0 into the pool and `vertex1` has received
    /// `amount_out` of asset1.
    Forward { amount_in: f64, amount_out: f64 },
    /// `vertex1` has put `amount_in` of asset1 into the pool and `vertex0` has received
    /// `amount_out` of asset0.
    Backward { amount_in: f64, amount_out: f64 },
}

impl EdgeFlow {
    /// `(token0_is_input, amount_in, amount_out)` of a non-zero flow.
    fn oriented(self) -> Option<(bool, f64, f64)> {
        match self {
            EdgeFlow::Zero => None,
            EdgeFlow::Forward { amount_in, amount_out } => Some((true, amount_in, amount_out)),
            EdgeFlow::Backward { amount_in, amount_out } => Some((false, amount_in, amount_out)),
        }
    }

    /// Asset0 sent by `vertex0` and asset1 received by `vertex1`, negative when reversed.
    fn signed(self) -> (f64, f64) {
        match self {
            EdgeFlow::Zero => (0.0, 0.0),
            EdgeFlow::Forward { amount_in, amount_out } => (amount_in, amount_out),
            EdgeFlow::Backward { amount_in, amount_out } => (-amount_out, -amount_in),
        }
    }
}

/// A pool as a graph edge between the vertices of its two assets.
#[derive(Clone, Debug)]
pub struct Edge<'a> {
    pub pool: &'a Pool,
    pub vertex0: usize,
    pub vertex1: usize,
    gas: f64,
    flow: EdgeFlow,
}

impl<'a> Edge<'a> {
    fn new(pool: &'a Pool, vertex0: usize, vertex1: usize, gas: f64) -> Self {
        Self {
            pool,
            vertex0,
            vertex1,
            gas,
            flow: EdgeFlow::Zero,
        }
    }

    pub fn flow(&self) -> EdgeFlow {
        self.flow
    }

    pub(crate) fn other(&self, vertex: usize) -> usize {
        if vertex == self.vertex0 {
            self.vertex1
        } else {
            self.vertex0
        }
    }

    /// Amount `vertex` has put into the pool, if the flow leaves `vertex`.
    pub(crate) fn amount_sent_by(&self, vertex: usize) -> Option<f64> {
        match self.flow {
            EdgeFlow::Forward { amount_in, .. } if vertex == self.vertex0 => Some(amount_in),
            EdgeFlow::Backward { amount_in, .. } if vertex == self.vertex1 => Some(amount_in),
            _ => None,
        }
    }

    /// `(source, destination)` of the recorded flow.
    pub(crate) fn flow_arc(&self) -> Option<(usize, usize)> {
        match self.flow {
            EdgeFlow::Zero => None,
            EdgeFlow::Forward { .. } => Some((self.vertex0, self.vertex1)),
            EdgeFlow::Backward { .. } => Some((self.vertex1, self.vertex0)),
        }
    }

    /// Output and gas delta of pushing `amount_in` more from `from`, on top of the recorded flow.
    ///
    /// A push along the flow is priced from where the flow left the curve. A push against it
    /// first buys back the recorded output at its recorded price, then continues the other way.
    fn hypothetical_output(&self, from: usize, amount_in: f64) -> (f64, f64) {
        let token0_is_input = from == self.vertex0;
        let curve = &self.pool.curve;
        match self.flow.oriented() {
            None => (find_curve_point(curve, amount_in, true, token0_is_input), self.gas),
            Some((direction, flow_in, flow_out)) if direction == token0_is_input => {
                let total_out = find_curve_point(curve, flow_in + amount_in, true, direction);
                (total_out - flow_out, 0.0)
            }
            Some((direction, flow_in, flow_out)) => {
                if unwinds(amount_in, flow_out) {
                    (flow_in, -self.gas)
                } else if amount_in < flow_out {
                    let still_needed = find_curve_point(curve, flow_out - amount_in, false, direction);
                    (flow_in - still_needed, 0.0)
                } else {
                    let beyond = find_curve_point(curve, amount_in - flow_out, true, token0_is_input);
                    (flow_in + beyond, 0.0)
                }
            }
        }
    }

    /// Records that `from` pushed `amount_in` and the other vertex received `amount_out`.
    ///
    /// The direction follows the input side alone, so a pool that pays nothing still records
    /// what went in.
    fn apply(&mut self, from: usize, amount_in: f64, amount_out: f64, tolerance: f64) {
        let token0_is_input = from == self.vertex0;
        if let Some((direction, _, flow_out)) = self.flow.oriented() {
            if direction != token0_is_input && unwinds(amount_in, flow_out) {
                self.flow = EdgeFlow::Zero;
                return;
            }
        }

        let (mut sent0, mut received1) = self.flow.signed();
        if token0_is_input {
            sent0 += amount_in;
            received1 += amount_out;
        } else {
            received1 -= amount_in;
            sent0 -= amount_out;
        }

        self.flow = if sent0 > 0.0 {
            check_invariant(
                received1 >= 0.0,
                format_args!("edge {} flow sides point in opposite directions", self.pool.address),
            );
            EdgeFlow::Forward {
                amount_in: sent0,
                amount_out: received1.max(0.0),
            }
        } else if received1 < 0.0 {
            check_invariant(
                sent0 <= 0.0,
                format_args!("edge {} flow sides point in opposite directions", self.pool.address),
            );
            EdgeFlow::Backward {
                amount_in: -received1,
                amount_out: -sent0,
            }
        } else {
            EdgeFlow::Zero
        };

        if let Some((direction, flow_in, flow_out)) = self.flow.oriented() {
            let expected = find_curve_point(&self.pool.curve, flow_in, true, direction);
            check_invariant(
                close_values(flow_out, expected, tolerance),
                format_args!(
                    "edge {} records output {flow_out} for input {flow_in}, curve gives {expected}",
                    self.pool.address
                ),
            );
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Vertex {
    pub(crate) asset: Asset,
    pub(crate) edges: Vec<usize>,
    best_income: f64,
    gas_spent: f64,
    best_total: f64,
    best_source: Option<usize>,
    processed: bool,
}

impl Vertex {
    fn new(asset: Asset) -> Self {
        Self {
            asset,
            edges: Vec::new(),
            best_income: 0.0,
            gas_spent: 0.0,
            best_total: 0.0,
            best_source: None,
            processed: false,
        }
    }

    fn reset_labels(&mut self) {
        self.best_income = 0.0;
        self.gas_spent = 0.0;
        self.best_total = 0.0;
        self.best_source = None;
        self.processed = false;
    }
}

/// One edge of a found path with the amounts that cross it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PathStep {
    pub edge: usize,
    pub from: usize,
    pub amount_in: f64,
    pub amount_out: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BestPath {
    pub steps: Vec<PathStep>,
    pub amount_out: f64,
    /// Gas delta of the path on top of the recorded flow; negative when it frees edges.
    pub gas_spent: f64,
    /// `amount_out` net of gas, in the output asset.
    pub total_output: f64,
}

/// Assets and pools as an undirected multigraph carrying the flow of the route being built.
#[derive(Clone, Debug)]
pub struct RoutingGraph<'a> {
    pub(crate) vertices: Vec<Vertex>,
    pub(crate) edges: Vec<Edge<'a>>,
    index: HashMap<Address, usize>,
    config: RoutingConfig,
}

impl<'a> RoutingGraph<'a> {
    pub fn new(pools: &'a [Pool]) -> Result<Self, RouteError> {
        Self::with_config(pools, RoutingConfig::default())
    }

    pub fn with_config(pools: &'a [Pool], config: RoutingConfig) -> Result<Self, RouteError> {
        let mut graph = Self {
            vertices: Vec::new(),
            edges: Vec::with_capacity(pools.len()),
            index: HashMap::new(),
            config,
        };
        for pool in pools {
            if pool.asset0.address == pool.asset1.address {
                warn!(pool = %pool.address, "skipping pool with identical assets");
                continue;
            }
            let vertex0 = graph.vertex_for(pool.asset0)?;
            let vertex1 = graph.vertex_for(pool.asset1)?;
            let edge = graph.edges.len();
            graph.edges.push(Edge::new(pool, vertex0, vertex1, graph.config.leg_gas));
            graph.vertices[vertex0].edges.push(edge);
            graph.vertices[vertex1].edges.push(edge);
        }
        debug!(
            vertices = graph.vertices.len(),
            edges = graph.edges.len(),
            "routing graph built"
        );
        Ok(graph)
    }

    fn vertex_for(&mut self, asset: Asset) -> Result<usize, RouteError> {
        if let Some(&vertex) = self.index.get(&asset.address) {
            return Ok(vertex);
        }
        if !(asset.gas_price.is_finite() && asset.gas_price > 0.0) {
            return Err(RouteError::InvalidGasPrice(asset.address));
        }
        let vertex = self.vertices.len();
        self.vertices.push(Vertex::new(asset));
        self.index.insert(asset.address, vertex);
        Ok(vertex)
    }

    pub fn vertex(&self, asset: &Address) -> Option<usize> {
        self.index.get(asset).copied()
    }

    pub fn edges(&self) -> &[Edge<'a>] {
        &self.edges
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    fn endpoints(&self, from: Address, to: Address) -> Result<(usize, usize), RouteError> {
        let start = self.vertex(&from).ok_or(RouteError::UnknownAsset(from))?;
        let finish = self.vertex(&to).ok_or(RouteError::UnknownAsset(to))?;
        Ok((start, finish))
    }

    fn reset_flows(&mut self) {
        for edge in &mut self.edges {
            edge.flow = EdgeFlow::Zero;
        }
    }

    /// Best path for `amount_in` more from `from` to `to`, given the flow already recorded.
    ///
    /// Returns `Ok(None)` when `to` cannot be reached.
    pub fn find_best_path(&mut self, from: Address, to: Address, amount_in: f64) -> Result<Option<BestPath>, RouteError> {
        let (start, finish) = self.endpoints(from, to)?;
        Ok(self.best_path(start, finish, amount_in))
    }

    /// Label-setting search maximizing the destination-denominated total net of gas.
    fn best_path(&mut self, start: usize, finish: usize, amount_in: f64) -> Option<BestPath> {
        for vertex in &mut self.vertices {
            vertex.reset_labels();
        }
        self.vertices[start].best_income = amount_in;
        self.vertices[start].best_total = amount_in;

        let finish_gas_price = self.vertices[finish].asset.gas_price;
        let mut frontier = vec![start];
        loop {
            // First maximum wins
            let (position, current) = frontier.iter().copied().enumerate().fold(
                None,
                |best: Option<(usize, usize)>, (position, vertex)| match best {
                    Some((_, leader)) if self.vertices[leader].best_total >= self.vertices[vertex].best_total => best,
                    _ => Some((position, vertex)),
                },
            )?;
            if current == finish {
                return self.trace_path(start, finish);
            }
            frontier.remove(position);

            let income = self.vertices[current].best_income;
            let gas_spent = self.vertices[current].gas_spent;
            let relaxations: Vec<(usize, usize, f64, f64)> = self.vertices[current]
                .edges
                .iter()
                .filter_map(|&edge_index| {
                    let edge = &self.edges[edge_index];
                    let next = edge.other(current);
                    if self.vertices[next].processed {
                        return None;
                    }
                    let (output, gas) = edge.hypothetical_output(current, income);
                    output.is_finite().then_some((edge_index, next, output, gas_spent + gas))
                })
                .collect();

            for (edge_index, next, new_income, new_gas_spent) in relaxations {
                let vertex = &mut self.vertices[next];
                let new_total =
                    new_income * (finish_gas_price / vertex.asset.gas_price) - new_gas_spent * finish_gas_price;
                if vertex.best_source.is_none() {
                    frontier.push(next);
                }
                if vertex.best_source.is_none() || new_total > vertex.best_total {
                    trace!(edge = edge_index, vertex = next, new_income, new_total, "relaxed");
                    vertex.best_income = new_income;
                    vertex.gas_spent = new_gas_spent;
                    vertex.best_total = new_total;
                    vertex.best_source = Some(edge_index);
                }
            }
            self.vertices[current].processed = true;
        }
    }

    fn trace_path(&self, start: usize, finish: usize) -> Option<BestPath> {
        let mut steps = Vec::new();
        let mut vertex = finish;
        while vertex != start {
            let edge = self.vertices[vertex].best_source?;
            let from = self.edges[edge].other(vertex);
            steps.push(PathStep {
                edge,
                from,
                amount_in: self.vertices[from].best_income,
                amount_out: self.vertices[vertex].best_income,
            });
            vertex = from;
            if steps.len() > self.vertices.len() {
                return None;
            }
        }
        steps.reverse();
        let last = &self.vertices[finish];
        Some(BestPath {
            steps,
            amount_out: last.best_income,
            gas_spent: last.gas_spent,
            total_output: last.best_total,
        })
    }

    fn apply_path(&mut self, path: &BestPath) {
        let tolerance = self.config.flow_tolerance;
        for step in &path.steps {
            self.edges[step.edge].apply(step.from, step.amount_in, step.amount_out, tolerance);
        }
    }

    /// Routes `amount_in` from `from` to `to` in `steps` equal increments, each sent along the
    /// best path given the flow recorded by the previous ones.
    pub fn find_best_route(&mut self, from: Address, to: Address, amount_in: f64, steps: usize) -> Result<Route, RouteError> {
        if steps == 0 {
            return Err(RouteError::ZeroSteps);
        }
        if !(amount_in.is_finite() && amount_in >= 0.0) {
            return Err(RouteError::InvalidAmount(amount_in));
        }
        let (start, finish) = self.endpoints(from, to)?;
        self.reset_flows();

        let step_amount = amount_in / steps as f64;
        let mut progress = RouteProgress::default();
        if amount_in > 0.0 {
            for step in 0..steps {
                let Some(path) = self.best_path(start, finish, step_amount) else {
                    warn!(%from, %to, step, "destination unreachable");
                    return Err(RouteError::NoRoute { from, to, progress });
                };
                self.apply_path(&path);
                progress.completed_steps += 1;
                progress.amount_out += path.amount_out;
                progress.gas_spent += path.gas_spent;
                progress.total_amount_out += path.total_output;
                trace!(step, hops = path.steps.len(), amount_out = path.amount_out, "increment routed");
            }
        }

        let legs = self.route_legs();
        debug!(
            %from,
            %to,
            amount_in,
            amount_out = progress.amount_out,
            gas = progress.gas_spent,
            legs = legs.len(),
            "route found"
        );
        Ok(Route {
            amount_in,
            amount_out: progress.amount_out,
            gas_spent: progress.gas_spent,
            total_amount_out: progress.total_amount_out,
            legs,
        })
    }

    /// [`Self::find_best_route`] for a request, with the configured step count by default.
    pub fn find_best_route_exact_in(&mut self, request: &ExactInSwapRequest) -> Result<Route, RouteError> {
        let steps = request.steps.unwrap_or(self.config.steps);
        self.find_best_route(request.token_in, request.token_out, request.amount_in, steps)
    }
}


// WASM wrapper functions
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn wasm_find_best_route(pools: JsValue, request: JsValue) -> Result<JsValue, Error> {
    let pools: Vec<Pool> = from_value(pools)?;
    let request: ExactInSwapRequest = from_value(request)?;

    let mut graph = RoutingGraph::new(&pools).map_err(Error::new)?;
    let route = graph.find_best_route_exact_in(&request).map_err(Error::new)?;
    to_value(&route)
}
