use crate::assembly::indices::{GlobalRow, GlobalRowList};
use crate::constraints::AffineConstraints;
use fenris_sparse::{BlockDynamicSparsityPattern, DynamicSparsityPattern};
use fenris_traits::accumulators::PatternAccumulator;
use fenris_traits::block::BlockPatternAccumulator;
use fenris_traits::Real;
use nalgebra::DMatrix;
use nalgebra_sparse::pattern::SparsityPattern;

/// Sparsity patterns for constrained systems.
impl<T: Real> AffineConstraints<T> {
    /// Adds the entries that
    /// [`distribute_local_to_global`](Self::distribute_local_to_global) writes for a cell
    /// with the given DoFs.
    ///
    /// Rows and columns of constrained DoFs only receive a diagonal entry, unless
    /// `keep_constrained_entries` is set, in which case the entries they would have had
    /// without constraints are added as well. This is needed if the matrix is later
    /// condensed in place.
    ///
    /// If a mask is given, only local couplings `(i, j)` with `dof_mask[(i, j)] == true`
    /// produce entries.
    ///
    /// # Panics
    ///
    /// Panics if the store is not closed or if the mask is not square with one row per
    /// local DoF.
    pub fn add_entries_local_to_global<P>(
        &self,
        local_dof_indices: &[usize],
        mut sparsity_pattern: P,
        keep_constrained_entries: bool,
        dof_mask: Option<&DMatrix<bool>>,
    ) where
        P: PatternAccumulator,
    {
        assert_mask_dims(dof_mask, local_dof_indices);
        self.assert_closed();

        let ws = &mut *self.workspace.get_or_default().borrow_mut();
        ws.rows.build(self, local_dof_indices);

        let list = ws.rows.rows();
        let columns = &mut ws.columns;
        compute_pattern_rows(&ws.rows, dof_mask, &mut ws.positions, |i, positions| {
            columns.clear();
            columns.extend(positions.iter().map(|&j| list[j].global));
            sparsity_pattern.add_entries(list[i].global, columns);
        });

        for &local in ws.rows.constrained_locals() {
            let dof = local_dof_indices[local];
            if keep_constrained_entries {
                ws.columns.clear();
                for (j, &other) in local_dof_indices.iter().enumerate() {
                    if is_included(dof_mask, local, j) {
                        ws.columns.push(other);
                    }
                    if is_included(dof_mask, j, local) {
                        sparsity_pattern.add_entry(other, dof);
                    }
                }
                ws.columns.push(dof);
                sparsity_pattern.add_entries(dof, &ws.columns);
            } else {
                sparsity_pattern.add_entry(dof, dof);
            }
        }
    }

    /// Block counterpart of [`add_entries_local_to_global`](Self::add_entries_local_to_global).
    pub fn add_entries_local_to_global_block<P>(
        &self,
        local_dof_indices: &[usize],
        mut sparsity_pattern: P,
        keep_constrained_entries: bool,
        dof_mask: Option<&DMatrix<bool>>,
    ) where
        P: BlockPatternAccumulator,
    {
        assert_mask_dims(dof_mask, local_dof_indices);
        self.assert_closed();

        let indices = sparsity_pattern.block_indices();
        let ws = &mut *self.workspace.get_or_default().borrow_mut();
        ws.rows.build(self, local_dof_indices);

        let list = ws.rows.rows();
        ws.rows
            .compute_block_ends(&indices, &mut ws.block_ends);
        ws.localized.clear();
        ws.localized.extend(
            list.iter()
                .map(|row| indices.global_to_local(row.global).1),
        );

        let block_ends = &ws.block_ends;
        let localized = &ws.localized;
        let columns = &mut ws.columns;
        let segment_ends = &mut ws.segment_ends;
        compute_pattern_rows(&ws.rows, dof_mask, &mut ws.positions, |i, positions| {
            let block_row = block_ends.partition_point(|&end| end <= i);
            columns.clear();
            columns.extend(positions.iter().map(|&j| localized[j]));
            segment_ends.clear();
            segment_ends.extend(
                block_ends
                    .iter()
                    .map(|&end| positions.partition_point(|&j| j < end)),
            );
            sparsity_pattern.add_entries_to_row_segments(block_row, localized[i], columns, segment_ends);
        });

        for &local in ws.rows.constrained_locals() {
            let dof = local_dof_indices[local];
            if keep_constrained_entries {
                for (j, &other) in local_dof_indices.iter().enumerate() {
                    if is_included(dof_mask, local, j) {
                        BlockPatternAccumulator::add_entry(&mut sparsity_pattern, dof, other);
                    }
                    if is_included(dof_mask, j, local) {
                        BlockPatternAccumulator::add_entry(&mut sparsity_pattern, other, dof);
                    }
                }
            }
            BlockPatternAccumulator::add_entry(&mut sparsity_pattern, dof, dof);
        }
    }

    /// Computes the sparsity pattern of the system produced by
    /// [`condense_matrix`](Self::condense_matrix).
    ///
    /// # Panics
    ///
    /// Panics if the pattern is not square or if the store is not closed.
    pub fn condensed_sparsity_pattern(&self, uncondensed: &SparsityPattern) -> SparsityPattern {
        let n = uncondensed.major_dim();
        assert_eq!(n, uncondensed.minor_dim(), "Sparsity pattern must be square");
        let new_line = self.condensed_indices(n);
        let condensed_size = n - self.n_constraints();

        let mut condensed = DynamicSparsityPattern::new(condensed_size, condensed_size);
        let mut columns = Vec::new();
        for row in 0..n {
            columns.clear();
            for &col in uncondensed.lane(row) {
                match new_line[col] {
                    Some(new_col) => columns.push(new_col),
                    None => columns.extend(self.targets(col).map(|target| expect_kept(&new_line, target))),
                }
            }
            match new_line[row] {
                Some(new_row) => condensed.add_entries(new_row, &columns),
                None => {
                    for target in self.targets(row) {
                        condensed.add_entries(expect_kept(&new_line, target), &columns);
                    }
                }
            }
        }
        condensed.to_sparsity_pattern()
    }

    /// Adds every entry that [`condense_matrix_in_place`](Self::condense_matrix_in_place)
    /// writes to, including the diagonal of every constrained row.
    pub fn condense_sparsity_pattern_in_place(&self, pattern: &mut DynamicSparsityPattern) {
        assert_eq!(pattern.nrows(), pattern.ncols(), "Sparsity pattern must be square");
        self.assert_closed();
        let mut row_columns = Vec::new();
        for row in 0..pattern.nrows() {
            row_columns.clear();
            row_columns.extend_from_slice(pattern.row(row));
            self.condense_pattern_row(row, &row_columns, |i, j| pattern.add_entry(i, j));
        }
    }

    /// Block counterpart of
    /// [`condense_sparsity_pattern_in_place`](Self::condense_sparsity_pattern_in_place).
    pub fn condense_block_sparsity_pattern_in_place(&self, pattern: &mut BlockDynamicSparsityPattern) {
        self.assert_closed();
        let mut row_columns = Vec::new();
        for row in 0..pattern.nrows() {
            row_columns.clear();
            row_columns.extend(pattern.row_columns(row));
            self.condense_pattern_row(row, &row_columns, |i, j| pattern.add_entry(i, j));
        }
    }

    /// Reports the entries that in-place condensation of the given row writes to.
    ///
    /// Since all reported columns are unconstrained, one pass over the rows suffices.
    fn condense_pattern_row(&self, row: usize, columns: &[usize], mut add_entry: impl FnMut(usize, usize)) {
        if self.is_constrained(row) {
            add_entry(row, row);
            for target in self.targets(row) {
                for &col in columns {
                    if self.is_constrained(col) {
                        for col_target in self.targets(col) {
                            add_entry(target, col_target);
                        }
                    } else {
                        add_entry(target, col);
                    }
                }
            }
        } else {
            for &col in columns {
                for target in self.targets(col) {
                    add_entry(row, target);
                }
            }
        }
    }

    /// For every DoF below `n`, the index in the condensed system or `None` if the DoF
    /// is constrained.
    pub(crate) fn condensed_indices(&self, n: usize) -> Vec<Option<usize>> {
        assert!(
            self.lines()
                .last()
                .map(|line| line.line < n)
                .unwrap_or(true),
            "Constrained DoFs must be smaller than the system size {}",
            n
        );
        let mut shift = 0;
        (0..n)
            .map(|dof| {
                if self.is_constrained(dof) {
                    shift += 1;
                    None
                } else {
                    Some(dof - shift)
                }
            })
            .collect()
    }

    /// The DoFs that the given DoF depends on, empty if the DoF is not constrained.
    pub(crate) fn targets(&self, dof: usize) -> impl '_ + Iterator<Item = usize> {
        self.constraint_line_for(dof)
            .into_iter()
            .flat_map(|line| line.entries.iter().map(|&(target, _)| target))
    }
}

pub(crate) fn expect_kept(new_line: &[Option<usize>], dof: usize) -> usize {
    new_line[dof].expect("Internal error: Constraint targets are never constrained after closing")
}

/// Determines the non-zero positions of every global row of the cell, analogous to the values
/// computed during distribution. A position is included if any of the local couplings that
/// contribute to it is part of the mask.
fn compute_pattern_rows<T: Real>(
    rows: &GlobalRowList<T>,
    dof_mask: Option<&DMatrix<bool>>,
    positions: &mut Vec<usize>,
    mut write_row: impl FnMut(usize, &[usize]),
) {
    let list = rows.rows();
    for (i, row) in list.iter().enumerate() {
        positions.clear();
        match dof_mask {
            None => positions.extend(0..list.len()),
            Some(mask) => {
                for (j, col) in list.iter().enumerate() {
                    let coupled = contributing_locals(row)
                        .any(|local_row| contributing_locals(col).any(|local_col| mask[(local_row, local_col)]));
                    if coupled {
                        positions.push(j);
                    }
                }
            }
        }
        if !positions.is_empty() {
            write_row(i, positions);
        }
    }
}

fn contributing_locals<T>(row: &GlobalRow<T>) -> impl '_ + Iterator<Item = usize> {
    row.local
        .into_iter()
        .chain(row.indirect.iter().map(|&(local, _)| local))
}

fn is_included(dof_mask: Option<&DMatrix<bool>>, i: usize, j: usize) -> bool {
    dof_mask.map(|mask| mask[(i, j)]).unwrap_or(true)
}

fn assert_mask_dims(dof_mask: Option<&DMatrix<bool>>, local_dof_indices: &[usize]) {
    if let Some(mask) = dof_mask {
        let n = local_dof_indices.len();
        assert_eq!(mask.shape(), (n, n), "DoF mask must be square with one row per local DoF");
    }
}
