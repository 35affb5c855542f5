use tracing::warn;

use crate::math::common::check_invariant;
use crate::solver::common::RouteLeg;
use crate::solver::graph::{Edge, RoutingGraph};

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl RoutingGraph<'_> {
    /// Vertices ordered so that every flow arc points forward: reverse DFS postorder.
    pub(crate) fn topological_order(&self) -> Vec<usize> {
        let count = self.vertices.len();
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
        for edge in &self.edges {
            if let Some((source, destination)) = edge.flow_arc() {
                successors[source].push(destination);
            }
        }

        let mut marks = vec![Mark::Unvisited; count];
        let mut postorder = Vec::with_capacity(count);
        for root in 0..count {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::InProgress;
            let mut stack = vec![(root, 0usize)];
            while let Some(top) = stack.last_mut() {
                let vertex = top.0;
                if let Some(&successor) = successors[vertex].get(top.1) {
                    top.1 += 1;
                    match marks[successor] {
                        Mark::Unvisited => {
                            marks[successor] = Mark::InProgress;
                            stack.push((successor, 0));
                        }
                        Mark::InProgress => {
                            warn!(from = vertex, to = successor, "flow cycle ignored in leg ordering");
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[vertex] = Mark::Done;
                    postorder.push(vertex);
                    stack.pop();
                }
            }
        }
        postorder.reverse();
        postorder
    }

    /// Legs of the recorded flow, grouped by sending asset in topological order.
    ///
    /// Within an asset, legs follow edge order. `quantity` is the leg's share of what the asset
    /// still has to send, so the last leg always sends everything left.
    pub(crate) fn route_legs(&self) -> Vec<RouteLeg> {
        let tolerance = self.config().flow_tolerance;
        let mut legs = Vec::new();
        for vertex_index in self.topological_order() {
            let vertex = &self.vertices[vertex_index];
            let outgoing: Vec<(&Edge, f64)> = vertex
                .edges
                .iter()
                .map(|&edge_index| &self.edges[edge_index])
                .filter_map(|edge| edge.amount_sent_by(vertex_index).map(|amount| (edge, amount)))
                .collect();
            let total: f64 = outgoing.iter().map(|(_, amount)| amount).sum();
            if !(total > 0.0) {
                continue;
            }

            let mut remaining = total;
            for (position, (edge, amount)) in outgoing.iter().enumerate() {
                let quantity = if position + 1 == outgoing.len() {
                    1.0
                } else {
                    amount / remaining
                };
                legs.push(RouteLeg {
                    pool: edge.pool.address,
                    asset: vertex.asset.address,
                    quantity,
                    relative_portion: amount / total,
                });
                remaining -= amount;
            }
            check_invariant(
                remaining.abs() <= tolerance * total,
                format_args!("asset {} leaves {remaining} unsent of {total}", vertex.asset.address),
            );
        }
        legs
    }
}
