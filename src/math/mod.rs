pub mod common;
pub mod curve;
pub mod quote;
