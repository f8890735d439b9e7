use crate::{closed_constraints, constraint_lines, dense_constraint_operator, spd_chain_matrix};
use fenris_constraints::constraints::{AffineConstraints, ConstraintLine};
use fenris_sparse::DynamicSparsityPattern;
use fenris_traits::accumulators::MatrixAccumulator;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use proptest::collection::vec;
use proptest::prelude::*;

/// DoF 2 is the average of its neighbors, DoF 4 is fixed to 1.
fn hanging_and_dirichlet_constraints() -> AffineConstraints<f64> {
    closed_constraints(vec![
        ConstraintLine::new(2).with_entries([(1, 0.5), (3, 0.5)]),
        ConstraintLine::new(4).with_inhomogeneity(1.0),
    ])
}

/// Solves the constrained problem with dense linear algebra.
fn dense_constrained_solution(constraints: &AffineConstraints<f64>, matrix: &DMatrix<f64>, rhs: &DVector<f64>) -> DVector<f64> {
    let n = matrix.nrows();
    let (c, g) = dense_constraint_operator(constraints, n);
    let mut reduced_matrix = c.transpose() * matrix * &c;
    for line in constraints.lines() {
        reduced_matrix[(line.line, line.line)] = 1.0;
    }
    let reduced_rhs = c.transpose() * (rhs - matrix * &g);
    let y = reduced_matrix.lu().solve(&reduced_rhs).unwrap();
    c * y + g
}

/// A CSR matrix with the values of the dense matrix, whose pattern is extended to support
/// in-place condensation.
fn csr_prepared_for_in_place_condense(constraints: &AffineConstraints<f64>, matrix: &DMatrix<f64>) -> CsrMatrix<f64> {
    let n = matrix.nrows();
    let mut pattern = DynamicSparsityPattern::new(n, n);
    for i in 0..n {
        for j in 0..n {
            if matrix[(i, j)] != 0.0 {
                pattern.add_entry(i, j);
            }
        }
    }
    constraints.condense_sparsity_pattern_in_place(&mut pattern);
    let mut csr = pattern.to_zero_csr();
    for i in 0..n {
        for j in 0..n {
            if matrix[(i, j)] != 0.0 {
                MatrixAccumulator::add_entry(&mut csr, i, j, matrix[(i, j)]);
            }
        }
    }
    csr
}

#[test]
fn shrinking_condense_reproduces_constrained_solution() {
    let constraints = hanging_and_dirichlet_constraints();
    let matrix = spd_chain_matrix(6);
    let rhs = DVector::from_fn(6, |i, _| 1.0 + i as f64);
    let expected = dense_constrained_solution(&constraints, &matrix, &rhs);

    let csr = CsrMatrix::from(&matrix);
    let pattern = constraints.condensed_sparsity_pattern(csr.pattern());
    let nnz = pattern.nnz();
    let mut condensed = CsrMatrix::try_from_pattern_and_values(pattern, vec![0.0; nnz]).unwrap();
    let mut condensed_rhs = DVector::zeros(4);
    constraints.condense_system(&csr, &rhs, &mut condensed, &mut condensed_rhs);

    let condensed_solution = DMatrix::from(&condensed)
        .lu()
        .solve(&condensed_rhs)
        .unwrap();
    let mut solution = DVector::zeros(6);
    constraints.distribute_condensed(&condensed_solution, &mut solution);

    assert_matrix_eq!(solution, expected, comp = abs, tol = 1e-12);
    assert_eq!(solution[4], 1.0);
}

#[test]
fn in_place_condense_reproduces_constrained_solution() {
    let constraints = hanging_and_dirichlet_constraints();
    let matrix = spd_chain_matrix(6);
    let rhs = DVector::from_fn(6, |i, _| 1.0 - 0.5 * i as f64);
    let expected = dense_constrained_solution(&constraints, &matrix, &rhs);

    let mut csr = csr_prepared_for_in_place_condense(&constraints, &matrix);
    let mut condensed_rhs = rhs.clone();
    constraints.condense_system_in_place(&mut csr, &mut condensed_rhs);

    let condensed = DMatrix::from(&csr);
    let mean_diagonal = matrix.diagonal().mean();
    for line in constraints.lines() {
        let dof = line.line;
        assert_eq!(condensed[(dof, dof)], mean_diagonal);
        assert_eq!(condensed_rhs[dof], 0.0);
        for other in (0..6).filter(|&other| other != dof) {
            assert_eq!(condensed[(dof, other)], 0.0);
            assert_eq!(condensed[(other, dof)], 0.0);
        }
    }

    let mut solution = condensed.lu().solve(&condensed_rhs).unwrap();
    constraints.distribute(&mut solution);
    assert_matrix_eq!(solution, expected, comp = abs, tol = 1e-12);
}

#[test]
fn condense_vector_moves_constrained_entries() {
    let constraints = closed_constraints(vec![ConstraintLine::new(1).with_entries([(0, 0.25), (2, 0.75)])]);
    let uncondensed = vec![1.0, 4.0, 2.0];

    let mut condensed = vec![0.0; 2];
    constraints.condense_vector(&uncondensed, &mut condensed);
    assert_eq!(condensed, vec![2.0, 5.0]);

    let mut in_place = uncondensed.clone();
    constraints.condense_vector_in_place(&mut in_place);
    assert_eq!(in_place, vec![2.0, 0.0, 5.0]);
}

#[test]
fn condense_vector_is_a_right_hand_side_condensation() {
    // x1 = 0.5 x0 + 0.5 x2 holds for the constant vector, but condensing adds the
    // weighted constrained entry to its targets instead of dropping it
    let constraints = closed_constraints(vec![ConstraintLine::new(1).with_entries([(0, 0.5), (2, 0.5)])]);
    let x = DVector::from_column_slice(&[1.0, 1.0, 1.0]);

    let mut condensed = DVector::zeros(2);
    constraints.condense_vector(&x, &mut condensed);
    assert_eq!(condensed, DVector::from_column_slice(&[1.5, 1.5]));
    let mut expanded = DVector::zeros(3);
    constraints.distribute_condensed(&condensed, &mut expanded);
    assert_eq!(expanded, DVector::from_column_slice(&[1.5, 1.5, 1.5]));

    let mut in_place = x.clone();
    constraints.condense_vector_in_place(&mut in_place);
    assert_eq!(in_place, DVector::from_column_slice(&[1.5, 0.0, 1.5]));
    constraints.distribute(&mut in_place);
    assert_eq!(in_place, DVector::from_column_slice(&[1.5, 1.5, 1.5]));
}

#[test]
#[should_panic(expected = "Inhomogeneous constraints")]
fn condense_vector_with_inhomogeneity_panics() {
    let constraints = hanging_and_dirichlet_constraints();
    let mut vector = DVector::<f64>::zeros(6);
    constraints.condense_vector_in_place(&mut vector);
}

#[test]
#[should_panic(expected = "Condensed size must equal uncondensed size")]
fn condense_into_wrong_size_panics() {
    let constraints = hanging_and_dirichlet_constraints();
    let csr = CsrMatrix::from(&spd_chain_matrix(6));
    let mut condensed = CsrMatrix::from(&DMatrix::<f64>::identity(5, 5));
    constraints.condense_matrix(&csr, &mut condensed);
}

#[test]
fn distribute_averages_independent_dofs() {
    let constraints = closed_constraints(vec![ConstraintLine::new(1).with_entries([(0, 0.5), (2, 0.5)])]);
    let mut vector = DVector::from_column_slice(&[1.0, -7.0, 1.0]);
    constraints.distribute(&mut vector);
    assert_eq!(vector, DVector::from_column_slice(&[1.0, 1.0, 1.0]));
}

#[test]
fn set_zero_clears_constrained_entries() {
    let constraints = hanging_and_dirichlet_constraints();
    let mut vector = vec![1.0; 6];
    constraints.set_zero(&mut vector);
    assert_eq!(vector, vec![1.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
}

proptest! {
    #[test]
    fn condense_then_distribute_reproduces_constrained_solution(
        lines in constraint_lines(7),
        rhs in vec(-1.0..1.0, 7)
    ) {
        let constraints = closed_constraints(lines);
        prop_assume!(constraints.n_constraints() < 7);
        let matrix = spd_chain_matrix(7);
        let rhs = DVector::from_vec(rhs);
        let expected = dense_constrained_solution(&constraints, &matrix, &rhs);

        // Shrinking
        let csr = CsrMatrix::from(&matrix);
        let pattern = constraints.condensed_sparsity_pattern(csr.pattern());
        let nnz = pattern.nnz();
        let mut condensed = CsrMatrix::try_from_pattern_and_values(pattern, vec![0.0; nnz]).unwrap();
        let condensed_size = 7 - constraints.n_constraints();
        let mut condensed_rhs = DVector::zeros(condensed_size);
        constraints.condense_system(&csr, &rhs, &mut condensed, &mut condensed_rhs);
        let condensed_solution = DMatrix::from(&condensed).lu().solve(&condensed_rhs).unwrap();
        let mut solution = DVector::zeros(7);
        constraints.distribute_condensed(&condensed_solution, &mut solution);
        assert_matrix_eq!(solution, expected, comp = abs, tol = 1e-6);

        // In place
        let mut csr = csr_prepared_for_in_place_condense(&constraints, &matrix);
        let mut condensed_rhs = rhs.clone();
        constraints.condense_system_in_place(&mut csr, &mut condensed_rhs);
        let mut solution = DMatrix::from(&csr).lu().solve(&condensed_rhs).unwrap();
        constraints.distribute(&mut solution);
        assert_matrix_eq!(solution, expected, comp = abs, tol = 1e-6);
    }
}
