//! Application of constraints to fully assembled systems.
//!
//! As an alternative to eliminating constraints cell by cell during assembly, a system can be
//! assembled without regard to constraints and condensed afterwards. The *shrinking* variants
//! produce a smaller system in which constrained DoFs are removed entirely, while the
//! *in-place* variants keep the size of the system and turn the rows and columns of
//! constrained DoFs into trivial equations.
//!
//! In both cases the solution of the condensed system is completed with
//! [`AffineConstraints::distribute`] (or [`AffineConstraints::distribute_condensed`] for the
//! shrinking variants).
use crate::assembly::expect_kept;
use crate::constraints::AffineConstraints;
use fenris_sparse::BlockCsrMatrix;
use fenris_sparse::BlockVector;
use fenris_traits::accumulators::{DofVector, MatrixAccumulator};
use fenris_traits::Real;
use log::{debug, warn};
use nalgebra_sparse::CsrMatrix;

impl<T: Real> AffineConstraints<T> {
    /// Condenses a matrix into a smaller matrix without the constrained DoFs.
    ///
    /// The condensed matrix must have room for all entries of the condensed system, for
    /// example by using [`condensed_sparsity_pattern`](Self::condensed_sparsity_pattern).
    /// Its previous values are overwritten. Inhomogeneities are ignored, use
    /// [`condense_system`](Self::condense_system) to eliminate them into a right-hand side.
    ///
    /// # Panics
    ///
    /// Panics if the store is not closed, if the uncondensed matrix is not square or if
    /// the condensed size does not equal the uncondensed size minus the number of constraints.
    pub fn condense_matrix(&self, uncondensed: &CsrMatrix<T>, condensed: &mut CsrMatrix<T>) {
        let new_line = self.prepare_shrinking_condense(uncondensed, condensed);
        self.condense_matrix_entries(uncondensed, condensed, &new_line, None::<&mut Vec<T>>);
    }

    /// Condenses a matrix and right-hand side into a smaller system without the
    /// constrained DoFs.
    ///
    /// Inhomogeneous constraints are eliminated into the condensed right-hand side.
    pub fn condense_system<U, V>(
        &self,
        uncondensed: &CsrMatrix<T>,
        uncondensed_rhs: &U,
        condensed: &mut CsrMatrix<T>,
        mut condensed_rhs: V,
    ) where
        U: ?Sized + DofVector<T>,
        V: DofVector<T>,
    {
        let new_line = self.prepare_shrinking_condense(uncondensed, condensed);
        assert_eq!(uncondensed_rhs.len(), uncondensed.nrows(), "Uncondensed dimensions must agree");
        assert_eq!(condensed_rhs.len(), condensed.nrows(), "Condensed dimensions must agree");
        self.condense_vector_entries(uncondensed_rhs, &mut condensed_rhs, &new_line);
        self.condense_matrix_entries(uncondensed, condensed, &new_line, Some(&mut condensed_rhs));
    }

    /// Condenses a vector into a smaller vector without the constrained DoFs.
    ///
    /// The vector is treated as a right-hand side: the entry of each constrained DoF is added,
    /// weighted, to the DoFs it depends on. Hence this is not the inverse of
    /// [`distribute_condensed`](Self::distribute_condensed), even for vectors that satisfy
    /// the constraints.
    ///
    /// # Panics
    ///
    /// Panics if any constraint is inhomogeneous, since eliminating the inhomogeneity
    /// requires the matrix.
    pub fn condense_vector<U, V>(&self, uncondensed: &U, mut condensed: V)
    where
        U: ?Sized + DofVector<T>,
        V: DofVector<T>,
    {
        self.assert_homogeneous();
        let new_line = self.condensed_indices(uncondensed.len());
        assert_eq!(
            condensed.len() + self.n_constraints(),
            uncondensed.len(),
            "Condensed size must equal uncondensed size minus the number of constraints"
        );
        self.condense_vector_entries(uncondensed, &mut condensed, &new_line);
    }

    /// Condenses a matrix without changing its size.
    ///
    /// The contributions of constrained rows and columns are moved to the DoFs they depend on,
    /// after which the rows and columns are zero apart from the diagonal, which is set to the
    /// mean absolute diagonal of the original matrix. The sparsity pattern of the matrix must
    /// contain all affected entries, see
    /// [`condense_sparsity_pattern_in_place`](Self::condense_sparsity_pattern_in_place).
    /// Inhomogeneities are ignored.
    pub fn condense_matrix_in_place(&self, matrix: &mut CsrMatrix<T>) {
        assert_eq!(matrix.nrows(), matrix.ncols(), "Matrix must be square");
        self.condense_in_place(matrix, None::<&mut Vec<T>>);
    }

    /// Condenses a matrix and right-hand side without changing their size.
    ///
    /// In addition to [`condense_matrix_in_place`](Self::condense_matrix_in_place),
    /// inhomogeneous constraints are eliminated into the right-hand side, and the right-hand
    /// side entries of constrained DoFs are moved to the DoFs they depend on and set to zero.
    pub fn condense_system_in_place<V: DofVector<T>>(&self, matrix: &mut CsrMatrix<T>, mut rhs: V) {
        assert_eq!(matrix.nrows(), matrix.ncols(), "Matrix must be square");
        assert_eq!(matrix.nrows(), rhs.len(), "Matrix and vector dimensions must agree");
        self.condense_in_place(matrix, Some(&mut rhs));
    }

    /// Moves the entries of constrained DoFs to the DoFs they depend on and sets them to zero.
    ///
    /// Like [`condense_vector`](Self::condense_vector), this condenses a right-hand side.
    ///
    /// # Panics
    ///
    /// Panics if any constraint is inhomogeneous.
    pub fn condense_vector_in_place<V: DofVector<T>>(&self, mut vector: V) {
        self.assert_homogeneous();
        self.condense_rhs_in_place(&mut vector);
    }

    /// Block counterpart of [`condense_matrix_in_place`](Self::condense_matrix_in_place).
    pub fn condense_block_matrix_in_place(&self, matrix: &mut BlockCsrMatrix<T>) {
        self.condense_in_place(matrix, None::<&mut Vec<T>>);
    }

    /// Block counterpart of [`condense_system_in_place`](Self::condense_system_in_place).
    pub fn condense_block_system_in_place(&self, matrix: &mut BlockCsrMatrix<T>, rhs: &mut BlockVector<T>) {
        assert_eq!(
            matrix.block_indices(),
            rhs.block_indices(),
            "Matrix and vector must have the same block structure"
        );
        self.condense_in_place(matrix, Some(rhs));
    }

    /// Sets every constrained entry of the vector to the value given by its constraint.
    ///
    /// This completes a solution of a condensed system to a solution of the original system.
    pub fn distribute<V: DofVector<T>>(&self, mut vector: V) {
        for line in self.lines() {
            let value = line
                .entries
                .iter()
                .fold(line.inhomogeneity, |value, &(target, weight)| value + weight * vector.get(target));
            vector.set(line.line, value);
        }
    }

    /// Expands the solution of a shrunk condensed system to the full system and sets the
    /// constrained entries with [`distribute`](Self::distribute).
    pub fn distribute_condensed<U, V>(&self, condensed: &U, mut uncondensed: V)
    where
        U: ?Sized + DofVector<T>,
        V: DofVector<T>,
    {
        let new_line = self.condensed_indices(uncondensed.len());
        assert_eq!(
            condensed.len() + self.n_constraints(),
            uncondensed.len(),
            "Condensed size must equal uncondensed size minus the number of constraints"
        );
        for (dof, new_dof) in new_line.iter().enumerate() {
            if let Some(new_dof) = *new_dof {
                uncondensed.set(dof, condensed.get(new_dof));
            }
        }
        self.distribute(&mut uncondensed);
    }

    /// Sets every constrained entry of the vector to zero.
    pub fn set_zero<V: DofVector<T>>(&self, mut vector: V) {
        for line in self.lines() {
            vector.set(line.line, T::zero());
        }
    }

    fn assert_homogeneous(&self) {
        assert!(
            !self.has_inhomogeneities(),
            "Inhomogeneous constraints can only be eliminated together with the matrix"
        );
    }

    fn prepare_shrinking_condense(&self, uncondensed: &CsrMatrix<T>, condensed: &mut CsrMatrix<T>) -> Vec<Option<usize>> {
        assert_eq!(uncondensed.nrows(), uncondensed.ncols(), "Uncondensed matrix must be square");
        assert_eq!(condensed.nrows(), condensed.ncols(), "Condensed matrix must be square");
        let new_line = self.condensed_indices(uncondensed.nrows());
        assert_eq!(
            condensed.nrows() + self.n_constraints(),
            uncondensed.nrows(),
            "Condensed size must equal uncondensed size minus the number of constraints"
        );
        condensed.values_mut().fill(T::zero());
        new_line
    }

    fn condense_vector_entries<U, V>(&self, uncondensed: &U, condensed: &mut V, new_line: &[Option<usize>])
    where
        U: ?Sized + DofVector<T>,
        V: DofVector<T>,
    {
        for dof in 0..condensed.len() {
            condensed.set(dof, T::zero());
        }
        for (dof, new_dof) in new_line.iter().enumerate() {
            let value = uncondensed.get(dof);
            match *new_dof {
                Some(new_dof) => condensed.add_to_entry(new_dof, value),
                None => {
                    for (target, weight) in self.weighted_targets(dof) {
                        condensed.add_to_entry(expect_kept(new_line, target), value * weight);
                    }
                }
            }
        }
    }

    fn condense_matrix_entries<V: DofVector<T>>(
        &self,
        uncondensed: &CsrMatrix<T>,
        condensed: &mut CsrMatrix<T>,
        new_line: &[Option<usize>],
        mut condensed_rhs: Option<&mut V>,
    ) {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (row, csr_row) in uncondensed.row_iter().enumerate() {
            columns.clear();
            values.clear();
            for (&col, &value) in csr_row.col_indices().iter().zip(csr_row.values()) {
                match new_line[col] {
                    Some(new_col) => {
                        columns.push(new_col);
                        values.push(value);
                    }
                    None => {
                        for (target, weight) in self.weighted_targets(col) {
                            columns.push(expect_kept(new_line, target));
                            values.push(value * weight);
                        }
                        if let Some(rhs) = condensed_rhs.as_deref_mut() {
                            let inhomogeneity = self.inhomogeneity(col);
                            if inhomogeneity != T::zero() {
                                for (new_row, row_weight) in self.condensed_row_targets(row, new_line) {
                                    rhs.add_to_entry(new_row, -value * row_weight * inhomogeneity);
                                }
                            }
                        }
                    }
                }
            }

            for (new_row, row_weight) in self.condensed_row_targets(row, new_line) {
                for (&col, &value) in columns.iter().zip(&values) {
                    MatrixAccumulator::add_entry(condensed, new_row, col, value * row_weight);
                }
            }
        }
    }

    /// The rows of the shrunk system that an uncondensed row contributes to, with weights.
    fn condensed_row_targets<'a>(
        &'a self,
        row: usize,
        new_line: &'a [Option<usize>],
    ) -> impl 'a + Iterator<Item = (usize, T)> {
        let direct = new_line[row].map(|new_row| (new_row, T::one()));
        let indirect = self
            .weighted_targets(row)
            .map(move |(target, weight)| (expect_kept(new_line, target), weight));
        direct.into_iter().chain(indirect)
    }

    fn condense_in_place<M, V>(&self, matrix: &mut M, mut rhs: Option<&mut V>)
    where
        M: InPlaceCondensable<T>,
        V: DofVector<T>,
    {
        self.assert_closed();
        let n = matrix.nrows();
        let average_diagonal = {
            let mut sum = T::zero();
            for row in 0..n {
                matrix.for_each_in_row_mut(row, |col, value| {
                    if col == row {
                        sum += value.abs();
                    }
                });
            }
            let average = if n > 0 {
                sum / T::from_usize(n).expect("Internal error: Matrix size must be representable")
            } else {
                T::zero()
            };
            if average == T::zero() {
                warn!("Matrix has zero diagonal, using one for the diagonal of constrained DoFs");
                T::one()
            } else {
                average
            }
        };

        // Contributions are collected first and applied afterwards, since they go to other rows
        let mut contributions = Vec::new();
        for row in 0..n {
            let row_line = self.constraint_line_for(row);
            matrix.for_each_in_row_mut(row, |col, value| {
                let col_line = self.constraint_line_for(col);
                match (row_line, col_line) {
                    (None, None) => {}
                    (None, Some(col_line)) => {
                        for &(target, weight) in &col_line.entries {
                            contributions.push((row, target, *value * weight));
                        }
                        if let Some(rhs) = rhs.as_deref_mut() {
                            rhs.add_to_entry(row, -*value * col_line.inhomogeneity);
                        }
                        *value = T::zero();
                    }
                    (Some(row_line), None) => {
                        for &(target, weight) in &row_line.entries {
                            contributions.push((target, col, *value * weight));
                        }
                        *value = T::zero();
                    }
                    (Some(row_line), Some(col_line)) => {
                        for &(row_target, row_weight) in &row_line.entries {
                            for &(col_target, col_weight) in &col_line.entries {
                                contributions.push((row_target, col_target, *value * row_weight * col_weight));
                            }
                            if let Some(rhs) = rhs.as_deref_mut() {
                                rhs.add_to_entry(row_target, -*value * row_weight * col_line.inhomogeneity);
                            }
                        }
                        *value = if row == col { average_diagonal } else { T::zero() };
                    }
                }
            });
        }

        debug!(
            "Condensing {} constraints in place, moving {} matrix contributions",
            self.n_constraints(),
            contributions.len()
        );
        for (row, col, value) in contributions {
            matrix.add_entry(row, col, value);
        }

        if let Some(rhs) = rhs {
            self.condense_rhs_in_place(rhs);
        }
    }

    fn condense_rhs_in_place<V: DofVector<T>>(&self, rhs: &mut V) {
        for line in self.lines() {
            let value = rhs.get(line.line);
            for &(target, weight) in &line.entries {
                rhs.add_to_entry(target, value * weight);
            }
            rhs.set(line.line, T::zero());
        }
    }

    fn weighted_targets(&self, dof: usize) -> impl '_ + Iterator<Item = (usize, T)> {
        self.constraint_line_for(dof)
            .into_iter()
            .flat_map(|line| line.entries.iter().copied())
    }

    fn inhomogeneity(&self, dof: usize) -> T {
        self.constraint_line_for(dof)
            .map(|line| line.inhomogeneity)
            .unwrap_or_else(T::zero)
    }
}

/// Square matrix storage that can be condensed without changing its size.
trait InPlaceCondensable<T> {
    fn nrows(&self) -> usize;

    /// Calls `f(col, value)` for every stored entry of the row.
    fn for_each_in_row_mut(&mut self, row: usize, f: impl FnMut(usize, &mut T));

    fn add_entry(&mut self, row: usize, col: usize, value: T);
}

impl<T: Real> InPlaceCondensable<T> for CsrMatrix<T> {
    fn nrows(&self) -> usize {
        CsrMatrix::nrows(self)
    }

    fn for_each_in_row_mut(&mut self, row: usize, mut f: impl FnMut(usize, &mut T)) {
        let mut csr_row = self.row_mut(row);
        let (cols, values) = csr_row.cols_and_values_mut();
        for (&col, value) in cols.iter().zip(values) {
            f(col, value);
        }
    }

    fn add_entry(&mut self, row: usize, col: usize, value: T) {
        MatrixAccumulator::add_entry(self, row, col, value)
    }
}

impl<T: Real> InPlaceCondensable<T> for BlockCsrMatrix<T> {
    fn nrows(&self) -> usize {
        BlockCsrMatrix::nrows(self)
    }

    fn for_each_in_row_mut(&mut self, row: usize, f: impl FnMut(usize, &mut T)) {
        BlockCsrMatrix::for_each_in_row_mut(self, row, f)
    }

    fn add_entry(&mut self, row: usize, col: usize, value: T) {
        MatrixAccumulator::add_entry(self, row, col, value)
    }
}
