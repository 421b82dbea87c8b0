//! Demo flows built on the graph core

pub mod calculator;
pub mod crop;
