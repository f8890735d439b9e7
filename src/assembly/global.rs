//! Assembly of constrained global systems from element contributions.
use crate::assembly::local::{ElementDofAssembler, ElementMatrixAssembler, ElementVectorAssembler};
use crate::constraints::AffineConstraints;
use fenris_sparse::DynamicSparsityPattern;
use fenris_traits::Real;
use log::debug;
use nalgebra::{DMatrix, DMatrixViewMut, DVector, DVectorViewMut};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use parking_lot::Mutex;
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use std::cell::RefCell;
use thread_local::ThreadLocal;

/// An assembler for CSR matrices that eliminates constraints during assembly.
///
/// Element matrices and vectors are added to the global system with
/// [`AffineConstraints::distribute_local_to_global`]. The matrix must have been allocated
/// with a pattern from [`assemble_pattern`](Self::assemble_pattern) (or a superset thereof).
#[derive(Debug)]
pub struct ConstrainedCsrAssembler<T: Real> {
    // All members are buffers that help prevent unnecessary allocations
    // when assembling multiple matrices with the same assembler
    workspace: RefCell<ElementWorkspace<T>>,
}

impl<T: Real> Default for ConstrainedCsrAssembler<T> {
    fn default() -> Self {
        Self {
            workspace: RefCell::new(ElementWorkspace::default()),
        }
    }
}

#[derive(Debug, Clone)]
struct ElementWorkspace<T: Real> {
    element_dofs: Vec<usize>,
    element_matrix: DMatrix<T>,
    element_vector: DVector<T>,
}

impl<T: Real> Default for ElementWorkspace<T> {
    fn default() -> Self {
        Self {
            element_dofs: Vec::new(),
            element_matrix: DMatrix::zeros(0, 0),
            element_vector: DVector::zeros(0),
        }
    }
}

impl<T: Real> ElementWorkspace<T> {
    fn populate_dofs<E>(&mut self, element_assembler: &E, element_index: usize)
    where
        E: ?Sized + ElementDofAssembler,
    {
        let count = element_assembler.element_dof_count(element_index);
        self.element_dofs.resize(count, usize::MAX);
        element_assembler.populate_element_dofs(&mut self.element_dofs, element_index);
    }

    fn assemble_element_matrix<E>(&mut self, element_assembler: &E, element_index: usize) -> eyre::Result<()>
    where
        E: ?Sized + ElementMatrixAssembler<T>,
    {
        let n = self.element_dofs.len();
        self.element_matrix.resize_mut(n, n, T::zero());
        self.element_matrix.fill(T::zero());
        let matrix_view = DMatrixViewMut::from(&mut self.element_matrix);
        element_assembler.assemble_element_matrix_into(element_index, matrix_view)
    }

    fn assemble_element_vector<E>(&mut self, element_assembler: &E, element_index: usize) -> eyre::Result<()>
    where
        E: ?Sized + ElementVectorAssembler<T>,
    {
        let n = self.element_dofs.len();
        self.element_vector.resize_vertically_mut(n, T::zero());
        self.element_vector.fill(T::zero());
        let vector_view = DVectorViewMut::from(&mut self.element_vector);
        element_assembler.assemble_element_vector_into(element_index, vector_view)
    }
}

impl<T: Real> ConstrainedCsrAssembler<T> {
    /// Computes the sparsity pattern of the constrained system.
    ///
    /// See [`AffineConstraints::add_entries_local_to_global`] for the meaning of
    /// `keep_constrained_entries`.
    pub fn assemble_pattern<E>(
        &self,
        constraints: &AffineConstraints<T>,
        element_assembler: &E,
        keep_constrained_entries: bool,
    ) -> SparsityPattern
    where
        E: ?Sized + ElementDofAssembler,
    {
        let ws = &mut *self.workspace.borrow_mut();
        let n = element_assembler.num_dofs();
        let mut pattern = DynamicSparsityPattern::new(n, n);
        for element_index in 0..element_assembler.num_elements() {
            ws.populate_dofs(element_assembler, element_index);
            constraints.add_entries_local_to_global(&ws.element_dofs, &mut pattern, keep_constrained_entries, None);
        }
        debug!("Assembled constrained sparsity pattern with {} entries", pattern.nnz());
        pattern.to_sparsity_pattern()
    }

    pub fn assemble_matrix<E>(
        &self,
        constraints: &AffineConstraints<T>,
        element_assembler: &E,
    ) -> eyre::Result<CsrMatrix<T>>
    where
        E: ?Sized + ElementMatrixAssembler<T>,
    {
        let pattern = self.assemble_pattern(constraints, element_assembler, false);
        let initial_matrix_values = vec![T::zero(); pattern.nnz()];
        let mut matrix = CsrMatrix::try_from_pattern_and_values(pattern, initial_matrix_values)
            .expect("Internal error: Number of values matches the pattern");
        self.assemble_matrix_into(&mut matrix, constraints, element_assembler)?;
        Ok(matrix)
    }

    /// Adds the constrained element matrices to the given matrix.
    pub fn assemble_matrix_into<E>(
        &self,
        csr: &mut CsrMatrix<T>,
        constraints: &AffineConstraints<T>,
        element_assembler: &E,
    ) -> eyre::Result<()>
    where
        E: ?Sized + ElementMatrixAssembler<T>,
    {
        let ws = &mut *self.workspace.borrow_mut();
        for element_index in 0..element_assembler.num_elements() {
            ws.populate_dofs(element_assembler, element_index);
            ws.assemble_element_matrix(element_assembler, element_index)?;
            constraints.distribute_local_to_global_matrix(&ws.element_matrix, &ws.element_dofs, &mut *csr);
        }
        Ok(())
    }

    /// Adds the constrained element matrices and vectors to the given matrix and vector.
    pub fn assemble_system_into<E>(
        &self,
        csr: &mut CsrMatrix<T>,
        rhs: &mut DVector<T>,
        constraints: &AffineConstraints<T>,
        element_assembler: &E,
    ) -> eyre::Result<()>
    where
        E: ?Sized + ElementMatrixAssembler<T> + ElementVectorAssembler<T>,
    {
        let ws = &mut *self.workspace.borrow_mut();
        for element_index in 0..element_assembler.num_elements() {
            ws.populate_dofs(element_assembler, element_index);
            ws.assemble_element_matrix(element_assembler, element_index)?;
            ws.assemble_element_vector(element_assembler, element_index)?;
            constraints.distribute_local_to_global(
                &ws.element_matrix,
                &ws.element_vector,
                &ws.element_dofs,
                &mut *csr,
                &mut *rhs,
            );
        }
        Ok(())
    }
}

/// A parallel counterpart of [`ConstrainedCsrAssembler`].
///
/// Elements are processed in parallel with `rayon`. The global matrix and vector are shared
/// behind mutexes, and each element locks them only to add its already condensed rows.
#[derive(Debug)]
pub struct ConstrainedCsrParAssembler<T: Real> {
    workspace: ThreadLocal<RefCell<ElementWorkspace<T>>>,
}

impl<T: Real> Default for ConstrainedCsrParAssembler<T> {
    fn default() -> Self {
        Self {
            workspace: ThreadLocal::new(),
        }
    }
}

impl<T: Real> ConstrainedCsrParAssembler<T> {
    pub fn assemble_pattern<E>(
        &self,
        constraints: &AffineConstraints<T>,
        element_assembler: &E,
        keep_constrained_entries: bool,
    ) -> SparsityPattern
    where
        E: ?Sized + Sync + ElementDofAssembler,
    {
        let n = element_assembler.num_dofs();
        let pattern = Mutex::new(DynamicSparsityPattern::new(n, n));
        (0..element_assembler.num_elements())
            .into_par_iter()
            .with_min_len(50)
            .for_each(|element_index| {
                let ws = &mut *self.workspace.get_or_default().borrow_mut();
                ws.populate_dofs(element_assembler, element_index);
                constraints.add_entries_local_to_global(&ws.element_dofs, &pattern, keep_constrained_entries, None);
            });
        let pattern = pattern.into_inner();
        debug!("Assembled constrained sparsity pattern with {} entries", pattern.nnz());
        pattern.to_sparsity_pattern()
    }

    /// Adds the constrained element matrices and vectors to the given matrix and vector.
    ///
    /// The result equals that of [`ConstrainedCsrAssembler::assemble_system_into`] up to the
    /// order of floating-point summation.
    pub fn assemble_system_into<E>(
        &self,
        csr: &mut CsrMatrix<T>,
        rhs: &mut DVector<T>,
        constraints: &AffineConstraints<T>,
        element_assembler: &E,
    ) -> eyre::Result<()>
    where
        E: ?Sized + Sync + ElementMatrixAssembler<T> + ElementVectorAssembler<T>,
    {
        let csr = Mutex::new(csr);
        let rhs = Mutex::new(rhs);
        (0..element_assembler.num_elements())
            .into_par_iter()
            .with_min_len(50)
            .try_for_each(|element_index| {
                let ws = &mut *self.workspace.get_or_default().borrow_mut();
                ws.populate_dofs(element_assembler, element_index);
                ws.assemble_element_matrix(element_assembler, element_index)?;
                ws.assemble_element_vector(element_assembler, element_index)?;
                constraints.distribute_local_to_global(
                    &ws.element_matrix,
                    &ws.element_vector,
                    &ws.element_dofs,
                    &csr,
                    &rhs,
                );
                Ok(())
            })
    }
}
