//! Constrained assembly of global linear systems.
//!
//! The methods in this module are implemented on
//! [`AffineConstraints`](crate::constraints::AffineConstraints) and work on the contributions
//! of a single cell at a time:
//!
//! - [`distribute_local_to_global`](crate::constraints::AffineConstraints::distribute_local_to_global)
//!   and its variants add a local matrix and/or vector to global storage, eliminating
//!   constrained DoFs on the fly.
//! - [`add_entries_local_to_global`](crate::constraints::AffineConstraints::add_entries_local_to_global)
//!   and its block variant predict the sparsity pattern that distribution needs.
//!
//! The [`global`] module drives these over all elements of a discretization, serially or
//! in parallel.
pub mod global;
pub mod local;

mod distribute;
mod indices;
mod pattern;

pub(crate) use indices::DistributionWorkspace;
pub(crate) use pattern::expect_kept;
