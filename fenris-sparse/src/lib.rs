//! Sparse storage for constrained assembly.
//!
//! `nalgebra-sparse` provides immutable sparsity patterns. Before a system matrix can be
//! allocated we need a pattern that can grow while elements and constraints are visited,
//! which is what [`DynamicSparsityPattern`] provides. The block types partition a square
//! system into a grid of CSR blocks that share a single global index space.
mod block;
mod pattern;

pub use block::{BlockCsrMatrix, BlockDynamicSparsityPattern, BlockVector};
pub use pattern::DynamicSparsityPattern;
