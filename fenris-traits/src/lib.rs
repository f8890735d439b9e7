//! Core traits used by fenris.
//!
//! Besides the scalar trait [`Real`], this crate defines the narrow contracts that the
//! constraint machinery in `fenris-constraints` consumes from the storage it writes into:
//! matrices, vectors and sparsity patterns that accept additive contributions, and the
//! block index translation used by block-partitioned storage.
use nalgebra::RealField;

pub use nalgebra;
pub use nalgebra_sparse;

pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

pub mod accumulators;
pub mod block;
