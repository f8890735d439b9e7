//! Storage and closure of affine constraints between degrees of freedom.
//!
//! An affine constraint expresses a single degree of freedom (DoF) as
//!
//! $$ x_i = \sum_j c_{ij} x_j + g_i, $$
//!
//! where the $x_j$ are other DoFs and $g_i$ is the *inhomogeneity*. A DoF fixed to a value
//! (a Dirichlet condition) is a constraint without entries, while hanging-node and periodicity
//! constraints have one or more entries.
//!
//! Constraints are collected in an [`AffineConstraints`] store. Once all constraints have been
//! added, the store must be *closed* with [`AffineConstraints::close`], which resolves chains of
//! constraints so that no constrained DoF appears on the right-hand side of any other constraint.
//! Only closed stores can be applied to linear systems.
use crate::assembly::DistributionWorkspace;
use fenris_traits::Real;
use log::{debug, trace, warn};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};
use thread_local::ThreadLocal;

/// A single constraint `x_line = sum_k entries[k].1 * x_{entries[k].0} + inhomogeneity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintLine<T> {
    pub line: usize,
    pub entries: Vec<(usize, T)>,
    pub inhomogeneity: T,
}

impl<T: Real> ConstraintLine<T> {
    /// A homogeneous constraint without entries, i.e. the DoF is fixed to zero.
    pub fn new(line: usize) -> Self {
        Self {
            line,
            entries: Vec::new(),
            inhomogeneity: T::zero(),
        }
    }

    pub fn with_entries(mut self, entries: impl IntoIterator<Item = (usize, T)>) -> Self {
        self.entries.extend(entries);
        self
    }

    pub fn with_inhomogeneity(mut self, inhomogeneity: T) -> Self {
        self.inhomogeneity = inhomogeneity;
        self
    }
}

/// Errors that can occur while building or closing a set of constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    /// A constraint line references its own DoF.
    SelfReferentialConstraint { dof: usize },
    /// The same entry was added twice with different coefficients.
    ConflictingEntry {
        line: usize,
        target: usize,
        existing: String,
        new: String,
    },
    /// The constraints contain a cycle, given as the sequence of DoFs that form it.
    CyclicConstraint { dofs: Vec<usize> },
    /// Two merged constraint sets, or two lines passed to `from_lines`, constrain the same DoF.
    MergeConflict { dof: usize },
}

impl Display for ConstraintError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfReferentialConstraint { dof } => {
                write!(f, "constraint for DoF {} references the DoF itself", dof)
            }
            Self::ConflictingEntry {
                line,
                target,
                existing,
                new,
            } => write!(
                f,
                "conflicting coefficients for entry {} of constraint {}: existing {}, new {}",
                target, line, existing, new
            ),
            Self::CyclicConstraint { dofs } => {
                write!(f, "constraints form a cycle through DoFs {:?}", dofs)
            }
            Self::MergeConflict { dof } => {
                write!(f, "DoF {} is constrained in both constraint sets", dof)
            }
        }
    }
}

impl Error for ConstraintError {}

/// Determines which constraint survives when two merged sets constrain the same DoF.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MergeConflictBehavior {
    NoConflictsAllowed,
    LeftObjectWins,
    RightObjectWins,
}

/// A set of affine constraints between degrees of freedom.
///
/// The store has two phases. While *open*, constraints can be added and modified. After
/// [`close`](Self::close) has been called, the constraints are sorted and fully resolved,
/// and the store can be queried and applied to local or global linear systems. All query
/// and application methods panic if the store is not closed.
///
/// A closed store is immutable and can be shared between threads. Each thread that
/// distributes cell contributions keeps its own scratch buffers inside the store, so
/// repeated calls do not allocate.
#[derive(Debug)]
pub struct AffineConstraints<T: Real> {
    lines: Vec<ConstraintLine<T>>,
    // Maps a constrained DoF to its position in `lines`
    line_positions: FxHashMap<usize, usize>,
    // Presence table indexed by DoF, only valid while closed
    constrained: Vec<bool>,
    closed: bool,
    pub(crate) workspace: ThreadLocal<RefCell<DistributionWorkspace<T>>>,
}

impl<T: Real> Default for AffineConstraints<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Real> Clone for AffineConstraints<T> {
    fn clone(&self) -> Self {
        Self {
            lines: self.lines.clone(),
            line_positions: self.line_positions.clone(),
            constrained: self.constrained.clone(),
            closed: self.closed,
            workspace: ThreadLocal::new(),
        }
    }
}

impl<T: Real> AffineConstraints<T> {
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            line_positions: FxHashMap::default(),
            constrained: Vec::new(),
            closed: false,
            workspace: ThreadLocal::new(),
        }
    }

    /// Builds an open store from the given constraint lines.
    ///
    /// Each DoF may appear in at most one line. A repeated DoF is reported as
    /// [`ConstraintError::MergeConflict`].
    pub fn from_lines(lines: impl IntoIterator<Item = ConstraintLine<T>>) -> Result<Self, ConstraintError> {
        let mut constraints = Self::new();
        for line in lines {
            if constraints.line_positions.contains_key(&line.line) {
                return Err(ConstraintError::MergeConflict { dof: line.line });
            }
            constraints.add_line(line.line);
            constraints.add_entries(line.line, line.entries)?;
            constraints.set_inhomogeneity(line.line, line.inhomogeneity);
        }
        Ok(constraints)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Adds a new homogeneous constraint line without entries for the given DoF.
    ///
    /// If the DoF is already constrained, the call has no effect.
    ///
    /// # Panics
    ///
    /// Panics if the store is closed.
    pub fn add_line(&mut self, dof: usize) {
        self.assert_open();
        if self.line_positions.contains_key(&dof) {
            warn!("DoF {} is already constrained, ignoring new constraint line", dof);
            return;
        }
        self.line_positions.insert(dof, self.lines.len());
        self.lines.push(ConstraintLine::new(dof));
    }

    /// Adds the entry `coefficient * x_target` to the constraint for `line`.
    ///
    /// Adding an identical entry twice has no effect.
    ///
    /// # Panics
    ///
    /// Panics if the store is closed or if `line` has no constraint line.
    pub fn add_entry(&mut self, line: usize, target: usize, coefficient: T) -> Result<(), ConstraintError> {
        if target == line {
            return Err(ConstraintError::SelfReferentialConstraint { dof: line });
        }
        let constraint = self.line_mut(line);
        if let Some(&(_, existing)) = constraint
            .entries
            .iter()
            .find(|(dof, _)| *dof == target)
        {
            return if existing == coefficient {
                Ok(())
            } else {
                Err(ConstraintError::ConflictingEntry {
                    line,
                    target,
                    existing: existing.to_string(),
                    new: coefficient.to_string(),
                })
            };
        }
        constraint.entries.push((target, coefficient));
        Ok(())
    }

    pub fn add_entries(
        &mut self,
        line: usize,
        entries: impl IntoIterator<Item = (usize, T)>,
    ) -> Result<(), ConstraintError> {
        for (target, coefficient) in entries {
            self.add_entry(line, target, coefficient)?;
        }
        Ok(())
    }

    /// Sets the inhomogeneity of the constraint for `line`, replacing any previous value.
    ///
    /// # Panics
    ///
    /// Panics if the store is closed or if `line` has no constraint line.
    pub fn set_inhomogeneity(&mut self, line: usize, value: T) {
        self.line_mut(line).inhomogeneity = value;
    }

    /// Removes all constraints and reopens the store.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.line_positions.clear();
        self.constrained.clear();
        self.closed = false;
    }

    /// Merges the constraints of `other` into this store.
    ///
    /// The store is open after merging, even if it was closed before. In case of an error,
    /// the store is left unchanged.
    pub fn merge(&mut self, other: &Self, behavior: MergeConflictBehavior) -> Result<(), ConstraintError> {
        if behavior == MergeConflictBehavior::NoConflictsAllowed {
            if let Some(line) = other
                .lines
                .iter()
                .find(|line| self.line_positions.contains_key(&line.line))
            {
                return Err(ConstraintError::MergeConflict { dof: line.line });
            }
        }

        self.closed = false;
        self.constrained.clear();
        for line in &other.lines {
            match self.line_positions.get(&line.line) {
                Some(&position) => {
                    if behavior == MergeConflictBehavior::RightObjectWins {
                        self.lines[position] = line.clone();
                    }
                }
                None => {
                    self.line_positions
                        .insert(line.line, self.lines.len());
                    self.lines.push(line.clone());
                }
            }
        }
        Ok(())
    }

    /// Sorts and resolves the constraints, after which the store can be applied.
    ///
    /// Chains of constraints are flattened: if a constraint references a DoF that is itself
    /// constrained, the reference is replaced by that DoF's constraint (including its
    /// inhomogeneity). Afterwards the entries of every line are sorted by DoF, duplicate
    /// entries are summed and entries with an exactly zero coefficient are removed.
    ///
    /// Closing an already closed store has no effect.
    ///
    /// # Errors
    ///
    /// Returns [`ConstraintError::CyclicConstraint`] if the constraints contain a cycle,
    /// in which case the store remains open.
    pub fn close(&mut self) -> Result<(), ConstraintError> {
        if self.closed {
            return Ok(());
        }

        self.lines.sort_unstable_by_key(|line| line.line);
        self.line_positions.clear();
        self.line_positions.extend(
            self.lines
                .iter()
                .enumerate()
                .map(|(position, line)| (line.line, position)),
        );

        let max_chain_length = self.resolve_chains()?;

        let mut substituted_entries = Vec::new();
        for line in &mut self.lines {
            substituted_entries.clear();
            substituted_entries.append(&mut line.entries);
            compress_entries(&mut substituted_entries, &mut line.entries);
        }

        let max_dof = self.lines.last().map(|line| line.line + 1).unwrap_or(0);
        self.constrained.clear();
        self.constrained.resize(max_dof, false);
        for line in &self.lines {
            self.constrained[line.line] = true;
        }
        self.closed = true;

        debug!(
            "Closed affine constraints: {} lines, {} entries, {} inhomogeneous lines, longest chain {}",
            self.lines.len(),
            self.lines
                .iter()
                .map(|line| line.entries.len())
                .sum::<usize>(),
            self.lines
                .iter()
                .filter(|line| line.inhomogeneity != T::zero())
                .count(),
            max_chain_length
        );
        Ok(())
    }

    /// Resolves every line with a depth-first traversal of the constraint graph.
    ///
    /// Returns the length of the longest chain that had to be followed.
    fn resolve_chains(&mut self) -> Result<usize, ConstraintError> {
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        enum State {
            Unvisited,
            InProgress,
            Resolved,
        }

        let mut states = vec![State::Unvisited; self.lines.len()];
        let mut stack = Vec::new();
        let mut resolved_entries = Vec::new();
        let mut max_chain_length = 0;

        for root in 0..self.lines.len() {
            if states[root] == State::Resolved {
                continue;
            }
            stack.push(root);

            while let Some(&current) = stack.last() {
                states[current] = State::InProgress;
                max_chain_length = max_chain_length.max(stack.len());

                let pending = self.lines[current]
                    .entries
                    .iter()
                    .filter_map(|(target, _)| self.line_positions.get(target).copied())
                    .find(|&position| states[position] != State::Resolved);

                match pending {
                    Some(position) if states[position] == State::InProgress => {
                        let cycle_start = stack
                            .iter()
                            .position(|&p| p == position)
                            .expect("Internal error: In-progress line must be on the stack");
                        let dofs = stack[cycle_start..]
                            .iter()
                            .map(|&p| self.lines[p].line)
                            .collect();
                        return Err(ConstraintError::CyclicConstraint { dofs });
                    }
                    Some(position) => stack.push(position),
                    None => {
                        // All constrained targets are resolved, so one substitution suffices
                        let mut entries = std::mem::take(&mut self.lines[current].entries);
                        let mut inhomogeneity = self.lines[current].inhomogeneity;
                        resolved_entries.clear();
                        for &(target, weight) in &entries {
                            match self.line_positions.get(&target) {
                                Some(&position) => {
                                    let target_line = &self.lines[position];
                                    trace!(
                                        "Substituting constraint for DoF {} into constraint for DoF {}",
                                        target,
                                        self.lines[current].line
                                    );
                                    resolved_entries.extend(
                                        target_line
                                            .entries
                                            .iter()
                                            .map(|&(dof, w)| (dof, weight * w)),
                                    );
                                    inhomogeneity += weight * target_line.inhomogeneity;
                                }
                                None => resolved_entries.push((target, weight)),
                            }
                        }
                        entries.clear();
                        entries.append(&mut resolved_entries);
                        let line = &mut self.lines[current];
                        line.entries = entries;
                        line.inhomogeneity = inhomogeneity;
                        states[current] = State::Resolved;
                        stack.pop();
                    }
                }
            }
        }

        Ok(max_chain_length)
    }

    /// Returns whether the given DoF is constrained.
    ///
    /// DoFs beyond the largest constrained DoF are never constrained.
    pub fn is_constrained(&self, dof: usize) -> bool {
        self.assert_closed();
        self.constrained.get(dof).copied().unwrap_or(false)
    }

    /// Returns the resolved constraint for the given DoF, if it is constrained.
    pub fn constraint_line_for(&self, dof: usize) -> Option<&ConstraintLine<T>> {
        if !self.is_constrained(dof) {
            return None;
        }
        self.lines
            .binary_search_by_key(&dof, |line| line.line)
            .ok()
            .map(|position| &self.lines[position])
    }

    /// All constraints, sorted by constrained DoF.
    pub fn lines(&self) -> &[ConstraintLine<T>] {
        self.assert_closed();
        &self.lines
    }

    pub fn n_constraints(&self) -> usize {
        self.assert_closed();
        self.lines.len()
    }

    /// Returns whether the DoF is constrained to be identical to a single other DoF.
    pub fn is_identity_constrained(&self, dof: usize) -> bool {
        self.constraint_line_for(dof)
            .map(|line| {
                line.entries.len() == 1 && line.entries[0].1 == T::one() && line.inhomogeneity == T::zero()
            })
            .unwrap_or(false)
    }

    pub fn is_inhomogeneously_constrained(&self, dof: usize) -> bool {
        self.constraint_line_for(dof)
            .map(|line| line.inhomogeneity != T::zero())
            .unwrap_or(false)
    }

    pub fn has_inhomogeneities(&self) -> bool {
        self.assert_closed();
        self.lines
            .iter()
            .any(|line| line.inhomogeneity != T::zero())
    }

    pub(crate) fn assert_closed(&self) {
        assert!(self.closed, "Affine constraints must be closed before they can be used");
    }

    fn assert_open(&self) {
        assert!(!self.closed, "Cannot modify closed affine constraints");
    }

    fn line_mut(&mut self, line: usize) -> &mut ConstraintLine<T> {
        self.assert_open();
        let position = *self
            .line_positions
            .get(&line)
            .unwrap_or_else(|| panic!("DoF {} has no constraint line", line));
        &mut self.lines[position]
    }
}

/// Sorts the entries by DoF, sums duplicates and drops zero coefficients.
fn compress_entries<T: Real>(entries: &mut Vec<(usize, T)>, output: &mut Vec<(usize, T)>) {
    entries.sort_unstable_by_key(|&(dof, _)| dof);
    output.clear();
    for &(dof, weight) in entries.iter() {
        match output.last_mut() {
            Some((last_dof, last_weight)) if *last_dof == dof => *last_weight += weight,
            _ => output.push((dof, weight)),
        }
    }
    output.retain(|&(_, weight)| weight != T::zero());
}

impl<T: Real> Display for AffineConstraints<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            if line.entries.is_empty() {
                writeln!(f, "    {} = {}", line.line, line.inhomogeneity)?;
            } else {
                for (target, coefficient) in &line.entries {
                    writeln!(f, "    {} {}:  {}", line.line, target, coefficient)?;
                }
                if line.inhomogeneity != T::zero() {
                    writeln!(f, "    {}: {}", line.line, line.inhomogeneity)?;
                }
            }
        }
        Ok(())
    }
}
