use fenris_traits::Real;
use nalgebra::{DMatrixViewMut, DVectorViewMut};

/// Describes which global DoFs each element of a discretization couples.
pub trait ElementDofAssembler {
    fn num_elements(&self) -> usize;

    /// The total number of DoFs in the global system.
    fn num_dofs(&self) -> usize;

    fn element_dof_count(&self, element_index: usize) -> usize;

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize);

    /// Returns an adapter that modifies element DoF indices according to the provided function.
    ///
    /// Changing the DoF indices is usually accompanied by a change in the total number of DoFs,
    /// which must therefore be provided.
    ///
    /// This is typically used to assemble a single body into a larger system containing
    /// several bodies, by offsetting its indices.
    fn map_element_dofs<F>(self, new_num_dofs: usize, f: F) -> MapElementDofs<Self, F>
    where
        Self: Sized,
    {
        MapElementDofs {
            mapped: self,
            function: f,
            num_dofs: new_num_dofs,
        }
    }
}

pub trait ElementMatrixAssembler<T: Real>: ElementDofAssembler {
    fn assemble_element_matrix_into(&self, element_index: usize, output: DMatrixViewMut<T>) -> eyre::Result<()>;
}

pub trait ElementVectorAssembler<T: Real>: ElementDofAssembler {
    fn assemble_element_vector_into(&self, element_index: usize, output: DVectorViewMut<T>) -> eyre::Result<()>;
}

impl<A: ?Sized + ElementDofAssembler> ElementDofAssembler for &A {
    fn num_elements(&self) -> usize {
        A::num_elements(self)
    }

    fn num_dofs(&self) -> usize {
        A::num_dofs(self)
    }

    fn element_dof_count(&self, element_index: usize) -> usize {
        A::element_dof_count(self, element_index)
    }

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize) {
        A::populate_element_dofs(self, output, element_index)
    }
}

impl<T: Real, A: ?Sized + ElementMatrixAssembler<T>> ElementMatrixAssembler<T> for &A {
    fn assemble_element_matrix_into(&self, element_index: usize, output: DMatrixViewMut<T>) -> eyre::Result<()> {
        A::assemble_element_matrix_into(self, element_index, output)
    }
}

impl<T: Real, A: ?Sized + ElementVectorAssembler<T>> ElementVectorAssembler<T> for &A {
    fn assemble_element_vector_into(&self, element_index: usize, output: DVectorViewMut<T>) -> eyre::Result<()> {
        A::assemble_element_vector_into(self, element_index, output)
    }
}

#[derive(Debug, Clone)]
pub struct MapElementDofs<Mapped, F> {
    mapped: Mapped,
    function: F,
    num_dofs: usize,
}

impl<Assembler, F> ElementDofAssembler for MapElementDofs<Assembler, F>
where
    Assembler: ElementDofAssembler,
    F: Fn(usize) -> usize,
{
    fn num_elements(&self) -> usize {
        self.mapped.num_elements()
    }

    fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    fn element_dof_count(&self, element_index: usize) -> usize {
        self.mapped.element_dof_count(element_index)
    }

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize) {
        self.mapped.populate_element_dofs(output, element_index);
        for idx in output {
            *idx = (self.function)(*idx);
        }
    }
}

impl<T, Assembler, F> ElementMatrixAssembler<T> for MapElementDofs<Assembler, F>
where
    T: Real,
    Assembler: ElementMatrixAssembler<T>,
    F: Fn(usize) -> usize,
{
    fn assemble_element_matrix_into(&self, element_index: usize, output: DMatrixViewMut<T>) -> eyre::Result<()> {
        self.mapped
            .assemble_element_matrix_into(element_index, output)
    }
}

impl<T, Assembler, F> ElementVectorAssembler<T> for MapElementDofs<Assembler, F>
where
    T: Real,
    Assembler: ElementVectorAssembler<T>,
    F: Fn(usize) -> usize,
{
    fn assemble_element_vector_into(&self, element_index: usize, output: DVectorViewMut<T>) -> eyre::Result<()> {
        self.mapped
            .assemble_element_vector_into(element_index, output)
    }
}
