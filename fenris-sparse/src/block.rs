use crate::DynamicSparsityPattern;
use fenris_traits::accumulators::{DofVector, MatrixAccumulator, PatternAccumulator};
use fenris_traits::block::{BlockIndices, BlockMatrixAccumulator, BlockPatternAccumulator};
use fenris_traits::Real;
use nalgebra::DVector;
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

/// A square sparsity pattern partitioned into a grid of growable blocks.
///
/// Block `(I, J)` holds the entries whose row lies in block `I` and whose column lies in
/// block `J`, with indices local to the respective blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDynamicSparsityPattern {
    indices: BlockIndices,
    // Row-major grid of num_blocks x num_blocks patterns
    blocks: Vec<DynamicSparsityPattern>,
}

impl BlockDynamicSparsityPattern {
    pub fn new(indices: BlockIndices) -> Self {
        let n = indices.num_blocks();
        let mut blocks = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                blocks.push(DynamicSparsityPattern::new(indices.block_size(i), indices.block_size(j)));
            }
        }
        Self { indices, blocks }
    }

    pub fn from_block_sizes(block_sizes: impl IntoIterator<Item = usize>) -> Self {
        Self::new(BlockIndices::from_block_sizes(block_sizes))
    }

    pub fn block_indices(&self) -> &BlockIndices {
        &self.indices
    }

    pub fn num_blocks(&self) -> usize {
        self.indices.num_blocks()
    }

    /// The size of the (square) global index space.
    pub fn nrows(&self) -> usize {
        self.indices.total_size()
    }

    pub fn nnz(&self) -> usize {
        self.blocks.iter().map(DynamicSparsityPattern::nnz).sum()
    }

    pub fn block(&self, block_row: usize, block_col: usize) -> &DynamicSparsityPattern {
        &self.blocks[self.linear_block_index(block_row, block_col)]
    }

    pub fn block_mut(&mut self, block_row: usize, block_col: usize) -> &mut DynamicSparsityPattern {
        let idx = self.linear_block_index(block_row, block_col);
        &mut self.blocks[idx]
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        let (block_row, local_row) = self.indices.global_to_local(row);
        let (block_col, local_col) = self.indices.global_to_local(col);
        self.block(block_row, block_col).contains(local_row, local_col)
    }

    /// The sorted global column indices of the given global row.
    pub fn row_columns(&self, row: usize) -> impl '_ + Iterator<Item = usize> {
        let (block_row, local_row) = self.indices.global_to_local(row);
        (0..self.num_blocks()).flat_map(move |block_col| {
            let offset = self.indices.block_start(block_col);
            self.block(block_row, block_col)
                .row(local_row)
                .iter()
                .map(move |&c| offset + c)
        })
    }

    pub fn add_entry(&mut self, row: usize, col: usize) {
        let (block_row, local_row) = self.indices.global_to_local(row);
        let (block_col, local_col) = self.indices.global_to_local(col);
        self.block_mut(block_row, block_col)
            .add_entry(local_row, local_col);
    }

    /// Merges all blocks into a single pattern over the global index space.
    pub fn to_flat(&self) -> DynamicSparsityPattern {
        let n = self.nrows();
        let mut flat = DynamicSparsityPattern::new(n, n);
        let mut columns = Vec::new();
        for row in 0..n {
            columns.clear();
            columns.extend(self.row_columns(row));
            flat.add_entries(row, &columns);
        }
        flat
    }

    fn linear_block_index(&self, block_row: usize, block_col: usize) -> usize {
        let n = self.num_blocks();
        assert!(block_row < n && block_col < n, "Block ({}, {}) out of bounds", block_row, block_col);
        n * block_row + block_col
    }
}

impl BlockPatternAccumulator for BlockDynamicSparsityPattern {
    fn block_indices(&self) -> BlockIndices {
        self.indices.clone()
    }

    fn add_entries_to_block_row(
        &mut self,
        block_row: usize,
        block_col: usize,
        local_row: usize,
        local_columns: &[usize],
    ) {
        self.block_mut(block_row, block_col)
            .add_entries(local_row, local_columns);
    }
}

impl PatternAccumulator for BlockDynamicSparsityPattern {
    fn nrows(&self) -> usize {
        self.indices.total_size()
    }

    fn ncols(&self) -> usize {
        self.indices.total_size()
    }

    fn add_entries(&mut self, row: usize, columns: &[usize]) {
        for &col in columns {
            BlockDynamicSparsityPattern::add_entry(self, row, col);
        }
    }
}

/// A square sparse matrix stored as a grid of CSR blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockCsrMatrix<T> {
    indices: BlockIndices,
    // Row-major grid of num_blocks x num_blocks matrices
    blocks: Vec<CsrMatrix<T>>,
}

impl<T: Real> BlockCsrMatrix<T> {
    /// Allocates a block matrix with the given pattern and all values set to zero.
    pub fn from_pattern(pattern: &BlockDynamicSparsityPattern) -> Self {
        Self {
            indices: pattern.block_indices().clone(),
            blocks: pattern
                .blocks
                .iter()
                .map(DynamicSparsityPattern::to_zero_csr)
                .collect(),
        }
    }

    pub fn block_indices(&self) -> &BlockIndices {
        &self.indices
    }

    pub fn num_blocks(&self) -> usize {
        self.indices.num_blocks()
    }

    pub fn nrows(&self) -> usize {
        self.indices.total_size()
    }

    pub fn block(&self, block_row: usize, block_col: usize) -> &CsrMatrix<T> {
        &self.blocks[self.linear_block_index(block_row, block_col)]
    }

    pub fn block_mut(&mut self, block_row: usize, block_col: usize) -> &mut CsrMatrix<T> {
        let idx = self.linear_block_index(block_row, block_col);
        &mut self.blocks[idx]
    }

    /// Returns the value stored at the given global position, or `None` if the position
    /// is not part of the pattern.
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        let (block_row, local_row) = self.indices.global_to_local(row);
        let (block_col, local_col) = self.indices.global_to_local(col);
        let csr_row = self.block(block_row, block_col).row(local_row);
        csr_row
            .col_indices()
            .binary_search(&local_col)
            .ok()
            .map(|idx| csr_row.values()[idx])
    }

    /// Calls `f(col, value)` for every stored entry of the given global row, in order of
    /// increasing global column index.
    pub fn for_each_in_row_mut(&mut self, row: usize, mut f: impl FnMut(usize, &mut T)) {
        let (block_row, local_row) = self.indices.global_to_local(row);
        for block_col in 0..self.num_blocks() {
            let offset = self.indices.block_start(block_col);
            let mut csr_row = self.block_mut(block_row, block_col).row_mut(local_row);
            let (cols, values) = csr_row.cols_and_values_mut();
            for (&c, v) in cols.iter().zip(values) {
                f(offset + c, v);
            }
        }
    }

    pub fn set_zero(&mut self) {
        for block in &mut self.blocks {
            block.values_mut().fill(T::zero());
        }
    }

    /// Merges all blocks into a single CSR matrix over the global index space.
    pub fn to_csr(&self) -> CsrMatrix<T> {
        let n = self.nrows();
        let nnz = self.blocks.iter().map(CsrMatrix::nnz).sum();
        let mut offsets = Vec::with_capacity(n + 1);
        let mut column_indices = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        offsets.push(0);
        for row in 0..n {
            let (block_row, local_row) = self.indices.global_to_local(row);
            for block_col in 0..self.num_blocks() {
                let offset = self.indices.block_start(block_col);
                let csr_row = self.block(block_row, block_col).row(local_row);
                column_indices.extend(csr_row.col_indices().iter().map(|&c| offset + c));
                values.extend_from_slice(csr_row.values());
            }
            offsets.push(column_indices.len());
        }
        let pattern = SparsityPattern::try_from_offsets_and_indices(n, n, offsets, column_indices)
            .expect("Internal error: Block columns are disjoint and sorted");
        CsrMatrix::try_from_pattern_and_values(pattern, values)
            .expect("Internal error: Number of values matches the pattern")
    }

    fn linear_block_index(&self, block_row: usize, block_col: usize) -> usize {
        let n = self.num_blocks();
        assert!(block_row < n && block_col < n, "Block ({}, {}) out of bounds", block_row, block_col);
        n * block_row + block_col
    }
}

impl<T: Real> BlockMatrixAccumulator<T> for BlockCsrMatrix<T> {
    fn block_indices(&self) -> BlockIndices {
        self.indices.clone()
    }

    fn add_to_block_row(
        &mut self,
        block_row: usize,
        block_col: usize,
        local_row: usize,
        local_columns: &[usize],
        values: &[T],
    ) {
        self.block_mut(block_row, block_col)
            .add_to_row(local_row, local_columns, values);
    }
}

impl<T: Real> MatrixAccumulator<T> for BlockCsrMatrix<T> {
    fn nrows(&self) -> usize {
        self.indices.total_size()
    }

    fn ncols(&self) -> usize {
        self.indices.total_size()
    }

    fn add_to_row(&mut self, row: usize, columns: &[usize], values: &[T]) {
        assert_eq!(columns.len(), values.len(), "Number of columns and values must agree");
        for (&col, &value) in columns.iter().zip(values) {
            BlockMatrixAccumulator::add_entry(self, row, col, value);
        }
    }
}

/// A vector partitioned into blocks that share a single global index space.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockVector<T: Real> {
    indices: BlockIndices,
    blocks: Vec<DVector<T>>,
}

impl<T: Real> BlockVector<T> {
    pub fn zeros(indices: BlockIndices) -> Self {
        let blocks = indices.block_sizes().map(DVector::zeros).collect();
        Self { indices, blocks }
    }

    /// Splits a vector over the global index space into blocks.
    pub fn from_flat(indices: BlockIndices, vector: &DVector<T>) -> Self {
        assert_eq!(vector.len(), indices.total_size(), "Vector length must match the block partition");
        let blocks = (0..indices.num_blocks())
            .map(|b| {
                vector
                    .rows(indices.block_start(b), indices.block_size(b))
                    .into_owned()
            })
            .collect();
        Self { indices, blocks }
    }

    pub fn block_indices(&self) -> &BlockIndices {
        &self.indices
    }

    pub fn block(&self, block: usize) -> &DVector<T> {
        &self.blocks[block]
    }

    pub fn block_mut(&mut self, block: usize) -> &mut DVector<T> {
        &mut self.blocks[block]
    }

    pub fn to_flat(&self) -> DVector<T> {
        let mut flat = DVector::zeros(self.indices.total_size());
        for (b, block) in self.blocks.iter().enumerate() {
            flat.rows_mut(self.indices.block_start(b), block.len())
                .copy_from(block);
        }
        flat
    }
}

impl<T: Real> DofVector<T> for BlockVector<T> {
    fn len(&self) -> usize {
        self.indices.total_size()
    }

    fn get(&self, index: usize) -> T {
        let (block, local) = self.indices.global_to_local(index);
        self.blocks[block][local]
    }

    fn set(&mut self, index: usize, value: T) {
        let (block, local) = self.indices.global_to_local(index);
        self.blocks[block][local] = value;
    }
}
