pub mod algorithm;
pub mod common;
pub mod graph;
mod legs;
pub mod router;
