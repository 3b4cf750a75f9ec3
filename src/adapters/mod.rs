// Adapters layer: concrete implementations of the domain ports.

pub mod backtracking;
pub mod storage;
