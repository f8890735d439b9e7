use fenris_traits::accumulators::PatternAccumulator;
use fenris_traits::Real;
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

/// A row-oriented sparsity pattern that supports insertion of new entries.
///
/// Column indices in each row are kept sorted and free of duplicates, so the pattern can
/// be converted to a [`SparsityPattern`] without any further processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicSparsityPattern {
    ncols: usize,
    rows: Vec<Vec<usize>>,
}

impl DynamicSparsityPattern {
    /// Creates an empty pattern with the given dimensions.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            ncols,
            rows: vec![Vec::new(); nrows],
        }
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// The total number of entries in the pattern.
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// The sorted column indices of the given row.
    pub fn row(&self, row: usize) -> &[usize] {
        &self.rows[row]
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.rows
            .get(row)
            .map(|cols| cols.binary_search(&col).is_ok())
            .unwrap_or(false)
    }

    pub fn add_entry(&mut self, row: usize, col: usize) {
        assert!(col < self.ncols, "Column index {} out of bounds", col);
        let cols = &mut self.rows[row];
        if let Err(pos) = cols.binary_search(&col) {
            cols.insert(pos, col);
        }
    }

    /// Adds the entries `(row, c)` for all `c` in `columns`.
    ///
    /// The columns do not need to be sorted and may contain duplicates.
    pub fn add_entries(&mut self, row: usize, columns: &[usize]) {
        if let Some(&col) = columns.iter().find(|&&col| col >= self.ncols) {
            panic!("Column index {} out of bounds", col);
        }
        let cols = &mut self.rows[row];
        // Few columns are cheaper to insert one by one than to re-sort the row
        if columns.len() <= 4 {
            for &col in columns {
                if let Err(pos) = cols.binary_search(&col) {
                    cols.insert(pos, col);
                }
            }
        } else {
            cols.extend_from_slice(columns);
            cols.sort_unstable();
            cols.dedup();
        }
    }

    /// Iterates over all `(row, col)` entries in row-major order.
    pub fn entries(&self) -> impl '_ + Iterator<Item = (usize, usize)> {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(i, cols)| cols.iter().map(move |&j| (i, j)))
    }

    pub fn to_sparsity_pattern(&self) -> SparsityPattern {
        let mut offsets = Vec::with_capacity(self.nrows() + 1);
        let mut column_indices = Vec::with_capacity(self.nnz());
        offsets.push(0);
        for cols in &self.rows {
            column_indices.extend_from_slice(cols);
            offsets.push(column_indices.len());
        }
        SparsityPattern::try_from_offsets_and_indices(self.nrows(), self.ncols, offsets, column_indices)
            .expect("Internal error: Rows are always sorted and without duplicates")
    }

    /// Allocates a CSR matrix with this pattern and all values set to zero.
    pub fn to_zero_csr<T: Real>(&self) -> CsrMatrix<T> {
        let pattern = self.to_sparsity_pattern();
        let values = vec![T::zero(); pattern.nnz()];
        CsrMatrix::try_from_pattern_and_values(pattern, values)
            .expect("Internal error: Number of values matches the pattern")
    }
}

impl From<&SparsityPattern> for DynamicSparsityPattern {
    fn from(pattern: &SparsityPattern) -> Self {
        let rows = (0..pattern.major_dim())
            .map(|i| pattern.lane(i).to_vec())
            .collect();
        Self {
            ncols: pattern.minor_dim(),
            rows,
        }
    }
}

impl From<&DynamicSparsityPattern> for SparsityPattern {
    fn from(pattern: &DynamicSparsityPattern) -> Self {
        pattern.to_sparsity_pattern()
    }
}

impl PatternAccumulator for DynamicSparsityPattern {
    fn nrows(&self) -> usize {
        self.rows.len()
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn add_entries(&mut self, row: usize, columns: &[usize]) {
        DynamicSparsityPattern::add_entries(self, row, columns)
    }

    fn add_entry(&mut self, row: usize, col: usize) {
        DynamicSparsityPattern::add_entry(self, row, col)
    }
}
