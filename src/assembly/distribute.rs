use crate::assembly::indices::{DistributionWorkspace, GlobalRow, GlobalRowList};
use crate::constraints::AffineConstraints;
use fenris_traits::accumulators::{DofVector, MatrixAccumulator};
use fenris_traits::block::BlockMatrixAccumulator;
use fenris_traits::Real;
use log::warn;
use nalgebra::{DMatrixView, DVectorView};

/// Local to global distribution of cell contributions.
///
/// With $C$ the matrix that maps independent DoFs to all DoFs and $g$ the vector of
/// inhomogeneities, the cell contribution $(A, b)$ is added as
///
/// $$ K \mathrel{+}= C^T A C, \qquad f \mathrel{+}= C^T (b - A g), $$
///
/// restricted to the DoFs of the cell. Rows and columns of constrained DoFs receive no
/// contributions apart from a positive diagonal entry, so that the global matrix stays
/// invertible. Solving the resulting system and calling
/// [`distribute`](AffineConstraints::distribute) on the solution gives the constrained
/// solution.
///
/// Global targets are taken by value. Pass `&mut target` for exclusive access, or
/// `&Mutex<Target>` to distribute from several threads concurrently. All index and
/// coefficient computations happen before the target is touched, and every row is added
/// with a single call to the target.
impl<T: Real> AffineConstraints<T> {
    /// Distributes a local matrix and vector into a global matrix and vector.
    ///
    /// # Panics
    ///
    /// Panics if the store is not closed, if the local matrix is not square with one row per
    /// local DoF, if the local vector has the wrong length or if the global matrix is not
    /// square with as many rows as the global vector.
    pub fn distribute_local_to_global<'a, 'b, M, V>(
        &self,
        local_matrix: impl Into<DMatrixView<'a, T>>,
        local_vector: impl Into<DVectorView<'b, T>>,
        local_dof_indices: &[usize],
        mut global_matrix: M,
        mut global_vector: V,
    ) where
        M: MatrixAccumulator<T>,
        V: DofVector<T>,
    {
        let local_matrix = local_matrix.into();
        let local_vector = local_vector.into();
        assert_local_matrix_dims(&local_matrix, local_dof_indices);
        assert_local_vector_dims(&local_vector, local_dof_indices);
        assert_global_dims(global_matrix.nrows(), global_matrix.ncols(), global_vector.len());
        self.assert_closed();

        let ws = &mut *self.workspace.get_or_default().borrow_mut();
        ws.rows.build(self, local_dof_indices);
        distribute_matrix(ws, &local_matrix, local_dof_indices, &mut global_matrix);
        self.distribute_rhs(
            &ws.rows,
            Some(&local_matrix),
            &local_vector,
            local_dof_indices,
            &mut ws.modified_rhs,
            &mut global_vector,
        );
    }

    /// Distributes a local matrix into a global matrix.
    pub fn distribute_local_to_global_matrix<'a, M>(
        &self,
        local_matrix: impl Into<DMatrixView<'a, T>>,
        local_dof_indices: &[usize],
        mut global_matrix: M,
    ) where
        M: MatrixAccumulator<T>,
    {
        let local_matrix = local_matrix.into();
        assert_local_matrix_dims(&local_matrix, local_dof_indices);
        assert_global_dims(global_matrix.nrows(), global_matrix.ncols(), global_matrix.nrows());
        self.assert_closed();

        let ws = &mut *self.workspace.get_or_default().borrow_mut();
        ws.rows.build(self, local_dof_indices);
        distribute_matrix(ws, &local_matrix, local_dof_indices, &mut global_matrix);
    }

    /// Distributes a local vector into a global vector.
    ///
    /// Entries of constrained DoFs are redistributed to the DoFs they depend on. Without the
    /// local matrix, inhomogeneities cannot be eliminated and are not taken into account.
    pub fn distribute_local_to_global_vector<'a, V>(
        &self,
        local_vector: impl Into<DVectorView<'a, T>>,
        local_dof_indices: &[usize],
        mut global_vector: V,
    ) where
        V: DofVector<T>,
    {
        let local_vector = local_vector.into();
        assert_local_vector_dims(&local_vector, local_dof_indices);
        self.assert_closed();

        let ws = &mut *self.workspace.get_or_default().borrow_mut();
        ws.rows.build(self, local_dof_indices);
        self.distribute_rhs(
            &ws.rows,
            None,
            &local_vector,
            local_dof_indices,
            &mut ws.modified_rhs,
            &mut global_vector,
        );
    }

    /// Block-matrix counterpart of [`distribute_local_to_global`](Self::distribute_local_to_global).
    ///
    /// The global vector is addressed with global indices, which [`BlockVector`] supports.
    ///
    /// [`BlockVector`]: fenris_sparse::BlockVector
    pub fn distribute_local_to_global_block<'a, 'b, M, V>(
        &self,
        local_matrix: impl Into<DMatrixView<'a, T>>,
        local_vector: impl Into<DVectorView<'b, T>>,
        local_dof_indices: &[usize],
        mut global_matrix: M,
        mut global_vector: V,
    ) where
        M: BlockMatrixAccumulator<T>,
        V: DofVector<T>,
    {
        let local_matrix = local_matrix.into();
        let local_vector = local_vector.into();
        assert_local_matrix_dims(&local_matrix, local_dof_indices);
        assert_local_vector_dims(&local_vector, local_dof_indices);
        let total_size = global_matrix.block_indices().total_size();
        assert_global_dims(total_size, total_size, global_vector.len());
        self.assert_closed();

        let ws = &mut *self.workspace.get_or_default().borrow_mut();
        ws.rows.build(self, local_dof_indices);
        distribute_block_matrix(ws, &local_matrix, local_dof_indices, &mut global_matrix);
        self.distribute_rhs(
            &ws.rows,
            Some(&local_matrix),
            &local_vector,
            local_dof_indices,
            &mut ws.modified_rhs,
            &mut global_vector,
        );
    }

    /// Block-matrix counterpart of
    /// [`distribute_local_to_global_matrix`](Self::distribute_local_to_global_matrix).
    pub fn distribute_local_to_global_block_matrix<'a, M>(
        &self,
        local_matrix: impl Into<DMatrixView<'a, T>>,
        local_dof_indices: &[usize],
        mut global_matrix: M,
    ) where
        M: BlockMatrixAccumulator<T>,
    {
        let local_matrix = local_matrix.into();
        assert_local_matrix_dims(&local_matrix, local_dof_indices);
        self.assert_closed();

        let ws = &mut *self.workspace.get_or_default().borrow_mut();
        ws.rows.build(self, local_dof_indices);
        distribute_block_matrix(ws, &local_matrix, local_dof_indices, &mut global_matrix);
    }

    /// Adds the right-hand side contributions of the cell to the global vector.
    ///
    /// If the local matrix is given, the columns belonging to inhomogeneously constrained
    /// DoFs are eliminated into the right-hand side.
    fn distribute_rhs<V: DofVector<T>>(
        &self,
        rows: &GlobalRowList<T>,
        local_matrix: Option<&DMatrixView<T>>,
        local_vector: &DVectorView<T>,
        local_dof_indices: &[usize],
        modified_rhs: &mut Vec<T>,
        global_vector: &mut V,
    ) {
        modified_rhs.clear();
        modified_rhs.extend(local_vector.iter().copied());

        if let Some(local_matrix) = local_matrix {
            for &k in rows.constrained_locals() {
                let inhomogeneity = self
                    .constraint_line_for(local_dof_indices[k])
                    .map(|line| line.inhomogeneity)
                    .unwrap_or_else(T::zero);
                if inhomogeneity != T::zero() {
                    for (l, entry) in modified_rhs.iter_mut().enumerate() {
                        *entry -= local_matrix[(l, k)] * inhomogeneity;
                    }
                }
            }
        }

        for row in rows.rows() {
            let mut value = row
                .local
                .map(|l| modified_rhs[l])
                .unwrap_or_else(T::zero);
            for &(l, weight) in &row.indirect {
                value += modified_rhs[l] * weight;
            }
            if value != T::zero() {
                global_vector.add_to_entry(row.global, value);
            }
        }
    }
}

fn distribute_matrix<T, M>(
    ws: &mut DistributionWorkspace<T>,
    local_matrix: &DMatrixView<T>,
    local_dof_indices: &[usize],
    global_matrix: &mut M,
) where
    T: Real,
    M: MatrixAccumulator<T>,
{
    add_regularization(&ws.rows, local_matrix, local_dof_indices, |dof, value| {
        global_matrix.add_entry(dof, dof, value)
    });

    let list = ws.rows.rows();
    let columns = &mut ws.columns;
    compute_rows(&ws.rows, local_matrix, &mut ws.positions, &mut ws.values, |i, positions, values| {
        columns.clear();
        columns.extend(positions.iter().map(|&j| list[j].global));
        global_matrix.add_to_row(list[i].global, columns, values);
    });
}

fn distribute_block_matrix<T, M>(
    ws: &mut DistributionWorkspace<T>,
    local_matrix: &DMatrixView<T>,
    local_dof_indices: &[usize],
    global_matrix: &mut M,
) where
    T: Real,
    M: BlockMatrixAccumulator<T>,
{
    let indices = global_matrix.block_indices();
    add_regularization(&ws.rows, local_matrix, local_dof_indices, |dof, value| {
        BlockMatrixAccumulator::add_entry(global_matrix, dof, dof, value)
    });

    let list = ws.rows.rows();
    ws.rows
        .compute_block_ends(&indices, &mut ws.block_ends);
    ws.localized.clear();
    let mut begin = 0;
    for (block, &end) in ws.block_ends.iter().enumerate() {
        let block_start = indices.block_start(block);
        ws.localized
            .extend(list[begin..end].iter().map(|row| row.global - block_start));
        begin = end;
    }

    let block_ends = &ws.block_ends;
    let localized = &ws.localized;
    let columns = &mut ws.columns;
    let segment_ends = &mut ws.segment_ends;
    compute_rows(&ws.rows, local_matrix, &mut ws.positions, &mut ws.values, |i, positions, values| {
        let block_row = block_ends.partition_point(|&end| end <= i);
        columns.clear();
        columns.extend(positions.iter().map(|&j| localized[j]));
        // Positions are sorted, so each block occupies a contiguous segment
        segment_ends.clear();
        segment_ends.extend(
            block_ends
                .iter()
                .map(|&end| positions.partition_point(|&j| j < end)),
        );
        global_matrix.add_to_row_segments(block_row, localized[i], columns, values, segment_ends);
    });
}

/// Adds a positive diagonal entry for every constrained DoF of the cell.
fn add_regularization<T: Real>(
    rows: &GlobalRowList<T>,
    local_matrix: &DMatrixView<T>,
    local_dof_indices: &[usize],
    mut add_diagonal: impl FnMut(usize, T),
) {
    for &local in rows.constrained_locals() {
        let mut value = local_matrix[(local, local)].abs();
        if value == T::zero() {
            let n = local_matrix.nrows();
            let mean = local_matrix
                .diagonal()
                .iter()
                .fold(T::zero(), |sum, x| sum + x.abs())
                / T::from_usize(n).expect("Internal error: Local size must be representable");
            value = if mean != T::zero() { mean } else { T::one() };
            warn!(
                "Zero local diagonal entry for constrained DoF {}, using {} for the global diagonal",
                local_dof_indices[local], value
            );
        }
        add_diagonal(local_dof_indices[local], value);
    }
}

/// Computes the entries of $C^T A C$ for every global row of the cell.
///
/// For each row with at least one non-zero entry, `write_row` is called with the position of
/// the row in the list, the positions of the columns with non-zero entries and the
/// corresponding values. Positions refer to [`GlobalRowList::rows`].
fn compute_rows<T: Real>(
    rows: &GlobalRowList<T>,
    local_matrix: &DMatrixView<T>,
    positions: &mut Vec<usize>,
    values: &mut Vec<T>,
    mut write_row: impl FnMut(usize, &[usize], &[T]),
) {
    let list = rows.rows();
    for (i, row) in list.iter().enumerate() {
        positions.clear();
        values.clear();

        if rows.have_indirect() {
            for (j, col) in list.iter().enumerate() {
                let value = condensed_entry(row, col, local_matrix);
                if value != T::zero() {
                    positions.push(j);
                    values.push(value);
                }
            }
        } else {
            // Every row and column maps to exactly one local DoF
            let local_row = direct_local(row);
            for (j, col) in list.iter().enumerate() {
                let value = local_matrix[(local_row, direct_local(col))];
                if value != T::zero() {
                    positions.push(j);
                    values.push(value);
                }
            }
        }

        if !positions.is_empty() {
            write_row(i, positions, values);
        }
    }
}

fn direct_local<T>(row: &GlobalRow<T>) -> usize {
    row.local
        .expect("Internal error: Rows without indirect contributions are always direct")
}

/// The entry of $C^T A C$ at the given global row and column.
fn condensed_entry<T: Real>(row: &GlobalRow<T>, col: &GlobalRow<T>, local_matrix: &DMatrixView<T>) -> T {
    let mut value = T::zero();
    if let Some(local_row) = row.local {
        value += local_row_entry(local_row, col, local_matrix);
    }
    for &(local_row, weight) in &row.indirect {
        value += local_row_entry(local_row, col, local_matrix) * weight;
    }
    value
}

/// The entry of $A C$ at the given local row and global column.
fn local_row_entry<T: Real>(local_row: usize, col: &GlobalRow<T>, local_matrix: &DMatrixView<T>) -> T {
    let mut value = col
        .local
        .map(|local_col| local_matrix[(local_row, local_col)])
        .unwrap_or_else(T::zero);
    for &(local_col, weight) in &col.indirect {
        value += local_matrix[(local_row, local_col)] * weight;
    }
    value
}

fn assert_local_matrix_dims<T: Real>(local_matrix: &DMatrixView<T>, local_dof_indices: &[usize]) {
    let n = local_dof_indices.len();
    assert_eq!(
        local_matrix.shape(),
        (n, n),
        "Local matrix must be square with one row per local DoF"
    );
}

fn assert_local_vector_dims<T: Real>(local_vector: &DVectorView<T>, local_dof_indices: &[usize]) {
    assert_eq!(
        local_vector.len(),
        local_dof_indices.len(),
        "Local vector must have one entry per local DoF"
    );
}

fn assert_global_dims(nrows: usize, ncols: usize, vector_len: usize) {
    assert_eq!(nrows, ncols, "Global matrix must be square");
    assert_eq!(nrows, vector_len, "Global matrix and vector dimensions must agree");
}
