//! Additive targets for assembly.
//!
//! All traits are implemented for `&mut X` and for `&Mutex<X>` whenever `X` implements them.
//! The former is used for exclusive access from a single thread, the latter when several
//! threads write into the same global object. With a mutex, every call to an accumulator
//! method is its own critical section, so callers should prefer the bulk methods
//! ([`MatrixAccumulator::add_to_row`], [`PatternAccumulator::add_entries`]).
use crate::Real;
use nalgebra::DMatrix;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use parking_lot::Mutex;

/// A matrix that local contributions can be added into.
pub trait MatrixAccumulator<T> {
    fn nrows(&self) -> usize;

    fn ncols(&self) -> usize;

    /// Adds `values[k]` to the entry `(row, columns[k])` for every `k`.
    ///
    /// # Panics
    ///
    /// Panics if `columns` and `values` have different lengths. Storage with a fixed sparsity
    /// pattern panics if one of the entries is not part of the pattern.
    fn add_to_row(&mut self, row: usize, columns: &[usize], values: &[T]);

    fn add_entry(&mut self, row: usize, col: usize, value: T) {
        self.add_to_row(row, &[col], &[value]);
    }
}

/// A vector indexed by global degrees of freedom.
pub trait DofVector<T: Real> {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> T;

    fn set(&mut self, index: usize, value: T);

    fn add_to_entry(&mut self, index: usize, value: T) {
        let current = self.get(index);
        self.set(index, current + value);
    }
}

/// A sparsity pattern that can be extended with new entries.
pub trait PatternAccumulator {
    fn nrows(&self) -> usize;

    fn ncols(&self) -> usize;

    /// Adds the entries `(row, c)` for every `c` in `columns`. Entries that are already
    /// present are ignored.
    fn add_entries(&mut self, row: usize, columns: &[usize]);

    fn add_entry(&mut self, row: usize, col: usize) {
        self.add_entries(row, &[col]);
    }
}

impl<T: Real> MatrixAccumulator<T> for CsrMatrix<T> {
    fn nrows(&self) -> usize {
        CsrMatrix::nrows(self)
    }

    fn ncols(&self) -> usize {
        CsrMatrix::ncols(self)
    }

    fn add_to_row(&mut self, row: usize, columns: &[usize], values: &[T]) {
        assert_eq!(columns.len(), values.len(), "Number of columns and values must agree");
        assert!(row < CsrMatrix::nrows(self), "Row index {} out of bounds", row);
        let mut csr_row = self.row_mut(row);
        let (row_columns, row_values) = csr_row.cols_and_values_mut();

        // Incoming columns are usually sorted, so we only search the remainder of the row
        // and fall back to a full search if that fails
        let mut offset = 0;
        for (&col, &value) in columns.iter().zip(values) {
            let local_idx = match row_columns[offset..].binary_search(&col) {
                Ok(idx) => offset + idx,
                Err(_) => row_columns.binary_search(&col).unwrap_or_else(|_| {
                    panic!("Entry ({}, {}) is not part of the sparsity pattern", row, col)
                }),
            };
            row_values[local_idx] += value;
            offset = local_idx;
        }
    }
}

impl<T: Real> MatrixAccumulator<T> for DMatrix<T> {
    fn nrows(&self) -> usize {
        self.shape().0
    }

    fn ncols(&self) -> usize {
        self.shape().1
    }

    fn add_to_row(&mut self, row: usize, columns: &[usize], values: &[T]) {
        assert_eq!(columns.len(), values.len(), "Number of columns and values must agree");
        for (&col, &value) in columns.iter().zip(values) {
            self[(row, col)] += value;
        }
    }
}

impl<T, M> MatrixAccumulator<T> for &mut M
where
    M: ?Sized + MatrixAccumulator<T>,
{
    fn nrows(&self) -> usize {
        M::nrows(self)
    }

    fn ncols(&self) -> usize {
        M::ncols(self)
    }

    fn add_to_row(&mut self, row: usize, columns: &[usize], values: &[T]) {
        M::add_to_row(self, row, columns, values)
    }

    fn add_entry(&mut self, row: usize, col: usize, value: T) {
        M::add_entry(self, row, col, value)
    }
}

impl<T, M> MatrixAccumulator<T> for &Mutex<M>
where
    M: MatrixAccumulator<T>,
{
    fn nrows(&self) -> usize {
        self.lock().nrows()
    }

    fn ncols(&self) -> usize {
        self.lock().ncols()
    }

    fn add_to_row(&mut self, row: usize, columns: &[usize], values: &[T]) {
        self.lock().add_to_row(row, columns, values)
    }

    fn add_entry(&mut self, row: usize, col: usize, value: T) {
        self.lock().add_entry(row, col, value)
    }
}

impl<T: Real> DofVector<T> for DVector<T> {
    fn len(&self) -> usize {
        self.nrows()
    }

    fn get(&self, index: usize) -> T {
        self[index]
    }

    fn set(&mut self, index: usize, value: T) {
        self[index] = value;
    }

    fn add_to_entry(&mut self, index: usize, value: T) {
        self[index] += value;
    }
}

impl<T: Real> DofVector<T> for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn get(&self, index: usize) -> T {
        self[index]
    }

    fn set(&mut self, index: usize, value: T) {
        self[index] = value;
    }

    fn add_to_entry(&mut self, index: usize, value: T) {
        self[index] += value;
    }
}

impl<T, V> DofVector<T> for &mut V
where
    T: Real,
    V: ?Sized + DofVector<T>,
{
    fn len(&self) -> usize {
        V::len(self)
    }

    fn get(&self, index: usize) -> T {
        V::get(self, index)
    }

    fn set(&mut self, index: usize, value: T) {
        V::set(self, index, value)
    }

    fn add_to_entry(&mut self, index: usize, value: T) {
        V::add_to_entry(self, index, value)
    }
}

impl<T, V> DofVector<T> for &Mutex<V>
where
    T: Real,
    V: DofVector<T>,
{
    fn len(&self) -> usize {
        self.lock().len()
    }

    fn get(&self, index: usize) -> T {
        self.lock().get(index)
    }

    fn set(&mut self, index: usize, value: T) {
        self.lock().set(index, value)
    }

    fn add_to_entry(&mut self, index: usize, value: T) {
        self.lock().add_to_entry(index, value)
    }
}

impl<P> PatternAccumulator for &mut P
where
    P: ?Sized + PatternAccumulator,
{
    fn nrows(&self) -> usize {
        P::nrows(self)
    }

    fn ncols(&self) -> usize {
        P::ncols(self)
    }

    fn add_entries(&mut self, row: usize, columns: &[usize]) {
        P::add_entries(self, row, columns)
    }

    fn add_entry(&mut self, row: usize, col: usize) {
        P::add_entry(self, row, col)
    }
}

impl<P> PatternAccumulator for &Mutex<P>
where
    P: PatternAccumulator,
{
    fn nrows(&self) -> usize {
        self.lock().nrows()
    }

    fn ncols(&self) -> usize {
        self.lock().ncols()
    }

    fn add_entries(&mut self, row: usize, columns: &[usize]) {
        self.lock().add_entries(row, columns)
    }

    fn add_entry(&mut self, row: usize, col: usize) {
        self.lock().add_entry(row, col)
    }
}
