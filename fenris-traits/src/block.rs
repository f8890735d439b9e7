//! Block partitioning of global index spaces.
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Translation between global indices and `(block, local offset)` pairs.
///
/// A block partition of the index range `0 .. n` is described by the start index of each
/// block. Cloning is cheap: the block starts are shared between clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndices {
    // Has length num_blocks + 1, the last entry is the total size
    block_starts: Arc<[usize]>,
}

impl BlockIndices {
    pub fn from_block_sizes(block_sizes: impl IntoIterator<Item = usize>) -> Self {
        let mut block_starts = vec![0];
        let mut offset = 0;
        for size in block_sizes {
            offset += size;
            block_starts.push(offset);
        }
        Self {
            block_starts: block_starts.into(),
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.block_starts.len() - 1
    }

    pub fn total_size(&self) -> usize {
        *self
            .block_starts
            .last()
            .expect("Block starts always contain the total size")
    }

    pub fn block_start(&self, block: usize) -> usize {
        assert!(block < self.num_blocks(), "Block index {} out of bounds", block);
        self.block_starts[block]
    }

    pub fn block_size(&self, block: usize) -> usize {
        assert!(block < self.num_blocks(), "Block index {} out of bounds", block);
        self.block_starts[block + 1] - self.block_starts[block]
    }

    pub fn block_sizes(&self) -> impl '_ + Iterator<Item = usize> {
        self.block_starts.windows(2).map(|w| w[1] - w[0])
    }

    /// Returns the block containing the given global index and the offset of the index
    /// inside of that block.
    pub fn global_to_local(&self, index: usize) -> (usize, usize) {
        assert!(
            index < self.total_size(),
            "Global index {} out of bounds for block partition of size {}",
            index,
            self.total_size()
        );
        // Empty blocks share their start with the next block, so we look for the last
        // block start not exceeding the index
        let block = self.block_starts.partition_point(|&start| start <= index) - 1;
        (block, index - self.block_starts[block])
    }

    pub fn local_to_global(&self, block: usize, local_index: usize) -> usize {
        assert!(
            local_index < self.block_size(block),
            "Local index {} out of bounds for block {}",
            local_index,
            block
        );
        self.block_starts[block] + local_index
    }
}

/// A square block matrix that local contributions can be added into.
///
/// Rows and columns share the same block partition.
pub trait BlockMatrixAccumulator<T> {
    fn block_indices(&self) -> BlockIndices;

    /// Adds `values[k]` to the entry `(local_row, local_columns[k])` of block `(block_row, block_col)`.
    fn add_to_block_row(
        &mut self,
        block_row: usize,
        block_col: usize,
        local_row: usize,
        local_columns: &[usize],
        values: &[T],
    );

    /// Adds a row that has already been split into contiguous segments, one per block column.
    ///
    /// The columns of block column `k` are `local_columns[segment_ends[k - 1] .. segment_ends[k]]`
    /// (starting at zero for `k = 0`). The columns are local to their respective block.
    fn add_to_row_segments(
        &mut self,
        block_row: usize,
        local_row: usize,
        local_columns: &[usize],
        values: &[T],
        segment_ends: &[usize],
    ) {
        let mut begin = 0;
        for (block_col, &end) in segment_ends.iter().enumerate() {
            if end > begin {
                self.add_to_block_row(
                    block_row,
                    block_col,
                    local_row,
                    &local_columns[begin..end],
                    &values[begin..end],
                );
            }
            begin = end;
        }
    }

    fn add_entry(&mut self, row: usize, col: usize, value: T) {
        let indices = self.block_indices();
        let (block_row, local_row) = indices.global_to_local(row);
        let (block_col, local_col) = indices.global_to_local(col);
        self.add_to_block_row(block_row, block_col, local_row, &[local_col], &[value]);
    }
}

/// A square block sparsity pattern that can be extended with new entries.
pub trait BlockPatternAccumulator {
    fn block_indices(&self) -> BlockIndices;

    fn add_entries_to_block_row(
        &mut self,
        block_row: usize,
        block_col: usize,
        local_row: usize,
        local_columns: &[usize],
    );

    /// Pattern analogue of [`BlockMatrixAccumulator::add_to_row_segments`].
    fn add_entries_to_row_segments(
        &mut self,
        block_row: usize,
        local_row: usize,
        local_columns: &[usize],
        segment_ends: &[usize],
    ) {
        let mut begin = 0;
        for (block_col, &end) in segment_ends.iter().enumerate() {
            if end > begin {
                self.add_entries_to_block_row(block_row, block_col, local_row, &local_columns[begin..end]);
            }
            begin = end;
        }
    }

    fn add_entry(&mut self, row: usize, col: usize) {
        let indices = self.block_indices();
        let (block_row, local_row) = indices.global_to_local(row);
        let (block_col, local_col) = indices.global_to_local(col);
        self.add_entries_to_block_row(block_row, block_col, local_row, &[local_col]);
    }
}

impl<T, M> BlockMatrixAccumulator<T> for &mut M
where
    M: ?Sized + BlockMatrixAccumulator<T>,
{
    fn block_indices(&self) -> BlockIndices {
        M::block_indices(self)
    }

    fn add_to_block_row(
        &mut self,
        block_row: usize,
        block_col: usize,
        local_row: usize,
        local_columns: &[usize],
        values: &[T],
    ) {
        M::add_to_block_row(self, block_row, block_col, local_row, local_columns, values)
    }

    fn add_to_row_segments(
        &mut self,
        block_row: usize,
        local_row: usize,
        local_columns: &[usize],
        values: &[T],
        segment_ends: &[usize],
    ) {
        M::add_to_row_segments(self, block_row, local_row, local_columns, values, segment_ends)
    }

    fn add_entry(&mut self, row: usize, col: usize, value: T) {
        M::add_entry(self, row, col, value)
    }
}

impl<T, M> BlockMatrixAccumulator<T> for &Mutex<M>
where
    M: BlockMatrixAccumulator<T>,
{
    fn block_indices(&self) -> BlockIndices {
        self.lock().block_indices()
    }

    fn add_to_block_row(
        &mut self,
        block_row: usize,
        block_col: usize,
        local_row: usize,
        local_columns: &[usize],
        values: &[T],
    ) {
        self.lock()
            .add_to_block_row(block_row, block_col, local_row, local_columns, values)
    }

    // A single critical section for all segments of the row
    fn add_to_row_segments(
        &mut self,
        block_row: usize,
        local_row: usize,
        local_columns: &[usize],
        values: &[T],
        segment_ends: &[usize],
    ) {
        self.lock()
            .add_to_row_segments(block_row, local_row, local_columns, values, segment_ends)
    }

    fn add_entry(&mut self, row: usize, col: usize, value: T) {
        self.lock().add_entry(row, col, value)
    }
}

impl<P> BlockPatternAccumulator for &mut P
where
    P: ?Sized + BlockPatternAccumulator,
{
    fn block_indices(&self) -> BlockIndices {
        P::block_indices(self)
    }

    fn add_entries_to_block_row(
        &mut self,
        block_row: usize,
        block_col: usize,
        local_row: usize,
        local_columns: &[usize],
    ) {
        P::add_entries_to_block_row(self, block_row, block_col, local_row, local_columns)
    }

    fn add_entries_to_row_segments(
        &mut self,
        block_row: usize,
        local_row: usize,
        local_columns: &[usize],
        segment_ends: &[usize],
    ) {
        P::add_entries_to_row_segments(self, block_row, local_row, local_columns, segment_ends)
    }

    fn add_entry(&mut self, row: usize, col: usize) {
        P::add_entry(self, row, col)
    }
}

impl<P> BlockPatternAccumulator for &Mutex<P>
where
    P: BlockPatternAccumulator,
{
    fn block_indices(&self) -> BlockIndices {
        self.lock().block_indices()
    }

    fn add_entries_to_block_row(
        &mut self,
        block_row: usize,
        block_col: usize,
        local_row: usize,
        local_columns: &[usize],
    ) {
        self.lock()
            .add_entries_to_block_row(block_row, block_col, local_row, local_columns)
    }

    fn add_entries_to_row_segments(
        &mut self,
        block_row: usize,
        local_row: usize,
        local_columns: &[usize],
        segment_ends: &[usize],
    ) {
        self.lock()
            .add_entries_to_row_segments(block_row, local_row, local_columns, segment_ends)
    }

    fn add_entry(&mut self, row: usize, col: usize) {
        self.lock().add_entry(row, col)
    }
}
