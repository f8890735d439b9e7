//! Affine constraints for finite element systems.
//!
//! Hanging nodes, periodic boundaries and Dirichlet conditions all restrict some degrees of
//! freedom (DoFs) to affine combinations of others. This crate eliminates such constraints
//! from linear systems, either while element contributions are assembled
//! ([`assembly`]) or afterwards on an already assembled system ([`condense`]).
//!
//! A typical workflow:
//!
//! 1. Collect constraints in an [`AffineConstraints`](constraints::AffineConstraints) store
//!    and [`close`](constraints::AffineConstraints::close) it.
//! 2. Compute the sparsity pattern with
//!    [`add_entries_local_to_global`](constraints::AffineConstraints::add_entries_local_to_global).
//! 3. Distribute element matrices and vectors with
//!    [`distribute_local_to_global`](constraints::AffineConstraints::distribute_local_to_global).
//! 4. Solve, then call [`distribute`](constraints::AffineConstraints::distribute) on the
//!    solution to fill in the constrained DoFs.
pub mod assembly;
pub mod condense;
pub mod constraints;

pub extern crate fenris_sparse;
pub extern crate fenris_traits;
pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

pub use fenris_traits::Real;
